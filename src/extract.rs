//! Section extraction from engine output
//!
//! The engine is asked to wrap deliverables in marker pairs:
//!
//! ```text
//! [[SUMMARY]]
//! ...section body...
//! [[/SUMMARY]]
//! ```
//!
//! Markers are matched case-insensitively and `[[END SUMMARY]]` is accepted
//! as an alternate close. Model output is an untrusted boundary, so the
//! outcome is a tagged result rather than a silent fallback; callers that
//! want graceful degradation use [`extract_text`].

use regex::RegexBuilder;
use tracing::warn;

/// Outcome of one extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionOutcome {
    /// Both markers found; the enclosed body, trimmed.
    Parsed(String),
    /// An open marker exists but no matching close; the tail after it.
    Malformed(String),
    /// No open marker at all.
    Absent,
}

impl SectionOutcome {
    /// The body when both markers were found.
    pub fn parsed(self) -> Option<String> {
        match self {
            SectionOutcome::Parsed(body) => Some(body),
            _ => None,
        }
    }
}

/// Match a `[[id]] ... [[/id]]` pair. Never fails; side-effect-free.
pub fn extract(raw: &str, section_id: &str) -> SectionOutcome {
    let id = regex::escape(section_id);

    let pair = RegexBuilder::new(&format!(
        r"\[\[\s*{id}\s*\]\](.*?)\[\[\s*(?:/|END\s+){id}\s*\]\]"
    ))
    .case_insensitive(true)
    .dot_matches_new_line(true)
    .build();

    let open = RegexBuilder::new(&format!(r"\[\[\s*{id}\s*\]\]"))
        .case_insensitive(true)
        .build();

    // The patterns are built from an escaped id; a build failure would be a
    // bug in the grammar itself, so treat it as no match.
    if let Ok(re) = pair {
        if let Some(caps) = re.captures(raw) {
            return SectionOutcome::Parsed(caps[1].trim().to_string());
        }
    }

    if let Ok(re) = open {
        if let Some(m) = re.find(raw) {
            return SectionOutcome::Malformed(raw[m.end()..].trim().to_string());
        }
    }

    SectionOutcome::Absent
}

/// Degrading wrapper: the parsed body when markers exist, the unclosed tail
/// when only the open marker exists, the raw text otherwise.
pub fn extract_text(raw: &str, section_id: &str) -> String {
    match extract(raw, section_id) {
        SectionOutcome::Parsed(body) => body,
        SectionOutcome::Malformed(tail) => {
            warn!(section = %section_id, "Unclosed section marker, using tail");
            tail
        }
        SectionOutcome::Absent => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_extraction() {
        let raw = "preamble\n[[SUMMARY]]\nThe margin story.\n[[/SUMMARY]]\ntrailer";
        assert_eq!(
            extract(raw, "SUMMARY"),
            SectionOutcome::Parsed("The margin story.".to_string())
        );
    }

    #[test]
    fn test_case_insensitive_markers() {
        let raw = "[[summary]]body[[/Summary]]";
        assert_eq!(
            extract(raw, "SUMMARY"),
            SectionOutcome::Parsed("body".to_string())
        );
    }

    #[test]
    fn test_alternate_close_form() {
        let raw = "[[THESIS]]hold[[END THESIS]]";
        assert_eq!(
            extract(raw, "thesis"),
            SectionOutcome::Parsed("hold".to_string())
        );
    }

    #[test]
    fn test_absent_markers() {
        assert_eq!(extract("plain prose", "SUMMARY"), SectionOutcome::Absent);
        assert_eq!(extract_text("plain prose", "SUMMARY"), "plain prose");
    }

    #[test]
    fn test_malformed_open_without_close() {
        let raw = "[[SUMMARY]]never closed";
        assert_eq!(
            extract(raw, "SUMMARY"),
            SectionOutcome::Malformed("never closed".to_string())
        );
        assert_eq!(extract_text(raw, "SUMMARY"), "never closed");
    }

    #[test]
    fn test_wrong_section_id_is_absent() {
        let raw = "[[SUMMARY]]body[[/SUMMARY]]";
        assert_eq!(extract(raw, "THESIS"), SectionOutcome::Absent);
    }

    #[test]
    fn test_extraction_idempotent() {
        let raw = "x[[RECORD]]{\"confidence\": 0.8}[[/RECORD]]y";
        let once = extract_text(raw, "RECORD");
        let twice = extract_text(&once, "RECORD");
        assert_eq!(once, twice);

        let plain = extract_text("no markers here", "RECORD");
        assert_eq!(extract_text(&plain, "RECORD"), plain);
    }

    #[test]
    fn test_multiline_body() {
        let raw = "[[ANALYSIS]]\nline one\n\nline two\n[[/ANALYSIS]]";
        match extract(raw, "ANALYSIS") {
            SectionOutcome::Parsed(body) => {
                assert!(body.contains("line one"));
                assert!(body.contains("line two"));
            }
            other => panic!("expected parse, got {:?}", other),
        }
    }
}
