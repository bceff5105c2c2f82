//! Section-aware editing of bracketed configuration files
//!
//! Documents such as an oxidized `router.db` group entries under `[NAME]`
//! header lines:
//!
//! ```text
//! [CORE]
//! rt-core-01:ios
//! [BKP]
//! sw-bkp-01:eos
//! ```
//!
//! A section runs from its header to the next header or the end of the
//! document. Section names are matched case-insensitively and the first
//! matching header wins.

use std::ops::Range;

use crate::error::SectionError;

/// Name of the section opened by `line`, if it is a header.
///
/// A header is `[name]` once surrounding whitespace is trimmed; the name
/// itself is trimmed too.
pub fn header_name(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.len() > 2 && trimmed.starts_with('[') && trimmed.ends_with(']') {
        Some(trimmed[1..trimmed.len() - 1].trim()).filter(|name| !name.is_empty())
    } else {
        None
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Location of one section inside a [`ConfigDocument`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSpan {
    /// Name as written in the header
    pub name: String,
    /// Index of the header line
    pub header: usize,
    /// Body lines: after the header up to the next header or end
    pub body: Range<usize>,
}

#[derive(Debug, Clone, Copy)]
enum ScanState {
    Outside,
    InTarget { header: usize },
}

/// A configuration text split into lines
#[derive(Debug, Clone)]
pub struct ConfigDocument<'a> {
    lines: Vec<&'a str>,
}

impl<'a> ConfigDocument<'a> {
    pub fn parse(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
        }
    }

    pub fn lines(&self) -> &[&'a str] {
        &self.lines
    }

    /// Every section in document order
    pub fn sections(&self) -> Vec<SectionSpan> {
        let headers: Vec<(usize, &str)> = self
            .lines
            .iter()
            .enumerate()
            .filter_map(|(i, line)| header_name(line).map(|name| (i, name)))
            .collect();

        headers
            .iter()
            .enumerate()
            .map(|(n, &(header, name))| {
                let end = headers
                    .get(n + 1)
                    .map_or(self.lines.len(), |&(next, _)| next);
                SectionSpan {
                    name: name.to_string(),
                    header,
                    body: header + 1..end,
                }
            })
            .collect()
    }

    /// First section named `name` (case-insensitive)
    pub fn find_section(&self, name: &str) -> Option<SectionSpan> {
        let mut state = ScanState::Outside;

        for (i, line) in self.lines.iter().enumerate() {
            let header = header_name(line);
            match (state, header) {
                (ScanState::Outside, Some(found)) if same_name(found, name) => {
                    state = ScanState::InTarget { header: i };
                }
                (ScanState::InTarget { header }, Some(_)) => {
                    return Some(self.span(header, i));
                }
                _ => {}
            }
        }

        match state {
            ScanState::InTarget { header } => Some(self.span(header, self.lines.len())),
            ScanState::Outside => None,
        }
    }

    fn span(&self, header: usize, end: usize) -> SectionSpan {
        SectionSpan {
            name: header_name(self.lines[header])
                .unwrap_or_default()
                .to_string(),
            header,
            body: header + 1..end,
        }
    }

    /// Body lines of `span`
    pub fn body(&self, span: &SectionSpan) -> &[&'a str] {
        &self.lines[span.body.clone()]
    }

    /// Whether `entry` is already present in the section body.
    ///
    /// Compared on trimmed text. A multi-line entry also counts as present
    /// when any of its non-blank lines is.
    pub fn contains_entry(&self, span: &SectionSpan, entry: &str) -> bool {
        let body = self.body(span);
        let entry = entry.trim();

        if body.iter().any(|line| line.trim() == entry) {
            return true;
        }

        entry
            .lines()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .any(|part| body.iter().any(|line| line.trim() == part))
    }

    /// Return the document text with `entry` appended to `section`.
    ///
    /// The entry goes right before the next header, or at the end when the
    /// section is last. Every other line is kept as-is; the result ends with
    /// exactly one newline.
    pub fn insert(&self, section: &str, entry: &str) -> Result<String, SectionError> {
        let span = self
            .find_section(section)
            .ok_or_else(|| SectionError::SectionNotFound {
                section: section.to_string(),
            })?;

        if self.contains_entry(&span, entry) {
            return Err(SectionError::DuplicateEntry {
                section: section.to_string(),
                entry: entry.trim().to_string(),
            });
        }

        let mut lines = self.lines.clone();
        lines.insert(span.body.end, entry);

        let mut text = lines.join("\n");
        text.push('\n');
        Ok(text)
    }
}

/// Insert `new_entry` at the end of `section_name` in `document_text`.
///
/// Fails with [`SectionError::SectionNotFound`] when no such section exists
/// and with [`SectionError::DuplicateEntry`] when the entry is already there;
/// the input is never modified.
pub fn insert_into_section(
    document_text: &str,
    section_name: &str,
    new_entry: &str,
) -> Result<String, SectionError> {
    ConfigDocument::parse(document_text).insert(section_name, new_entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "[A]\nfoo\n[BKP]\nbar\n[C]\nbaz\n";

    #[test]
    fn test_header_name() {
        assert_eq!(header_name("[BKP]"), Some("BKP"));
        assert_eq!(header_name("  [ core ]  "), Some("core"));
        assert_eq!(header_name("[]"), None);
        assert_eq!(header_name("[ ]"), None);
        assert_eq!(header_name("[\t]"), None);
        assert_eq!(header_name("host:[ios]x"), None);
        assert_eq!(header_name("rt-01:ios"), None);
    }

    #[test]
    fn test_insert_into_middle_section() {
        let result = insert_into_section(DOC, "BKP", "qux").unwrap();
        assert_eq!(result, "[A]\nfoo\n[BKP]\nbar\nqux\n[C]\nbaz\n");
    }

    #[test]
    fn test_insert_is_case_insensitive() {
        let result = insert_into_section(DOC, "bkp", "qux").unwrap();
        assert_eq!(result, "[A]\nfoo\n[BKP]\nbar\nqux\n[C]\nbaz\n");
    }

    #[test]
    fn test_insert_into_last_section_appends_at_end() {
        let result = insert_into_section("[A]\nfoo\n[BKP]\nbar", "BKP", "qux").unwrap();
        assert_eq!(result, "[A]\nfoo\n[BKP]\nbar\nqux\n");
        assert!(!result.ends_with("\n\n"));
    }

    #[test]
    fn test_insert_into_empty_section() {
        let result = insert_into_section("[BKP]\n[C]\nbaz\n", "BKP", "qux").unwrap();
        assert_eq!(result, "[BKP]\nqux\n[C]\nbaz\n");
    }

    #[test]
    fn test_insert_twice_is_duplicate() {
        let once = insert_into_section(DOC, "BKP", "X").unwrap();
        let err = insert_into_section(&once, "BKP", "X").unwrap_err();
        assert_eq!(
            err,
            SectionError::DuplicateEntry {
                section: "BKP".to_string(),
                entry: "X".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_ignores_surrounding_whitespace() {
        let err = insert_into_section("[BKP]\n  sw-01:ios  \n", "BKP", "sw-01:ios ").unwrap_err();
        assert!(matches!(err, SectionError::DuplicateEntry { .. }));
    }

    #[test]
    fn test_same_entry_in_other_section_is_not_duplicate() {
        let result = insert_into_section(DOC, "BKP", "foo").unwrap();
        assert_eq!(result, "[A]\nfoo\n[BKP]\nbar\nfoo\n[C]\nbaz\n");
    }

    #[test]
    fn test_section_not_found() {
        let err = insert_into_section(DOC, "MISSING", "x").unwrap_err();
        assert_eq!(
            err,
            SectionError::SectionNotFound {
                section: "MISSING".to_string()
            }
        );
        assert!(matches!(
            insert_into_section("", "BKP", "x"),
            Err(SectionError::SectionNotFound { .. })
        ));
    }

    #[test]
    fn test_first_matching_section_wins() {
        let doc = "[BKP]\none\n[X]\n[bkp]\ntwo\n";
        let result = insert_into_section(doc, "BKP", "three").unwrap();
        assert_eq!(result, "[BKP]\none\nthree\n[X]\n[bkp]\ntwo\n");
    }

    #[test]
    fn test_other_sections_untouched() {
        let doc = "# managed by ops\n[A]\n  keep   spacing\t\n[B]\nb1\n\n[C]\n\tc1\n";
        let result = insert_into_section(doc, "B", "b2").unwrap();

        let before = ConfigDocument::parse(doc);
        let after = ConfigDocument::parse(&result);
        let span_a = before.find_section("A").unwrap();
        let span_c_before = before.find_section("C").unwrap();
        let span_c_after = after.find_section("C").unwrap();

        assert_eq!(before.body(&span_a), after.body(&after.find_section("A").unwrap()));
        assert_eq!(before.body(&span_c_before), after.body(&span_c_after));
        assert_eq!(before.lines()[0], after.lines()[0]);
        assert_eq!(
            after.body(&after.find_section("B").unwrap()),
            &["b1", "", "b2"]
        );
    }

    #[test]
    fn test_multiline_entry() {
        let entry = "sw-01:ios\nsw-02:ios";
        let once = insert_into_section(DOC, "BKP", entry).unwrap();
        assert_eq!(once, "[A]\nfoo\n[BKP]\nbar\nsw-01:ios\nsw-02:ios\n[C]\nbaz\n");

        let err = insert_into_section(&once, "BKP", entry).unwrap_err();
        assert!(matches!(err, SectionError::DuplicateEntry { .. }));
    }

    #[test]
    fn test_blank_header_is_not_a_section() {
        let doc = "[ ]\nx\n[BKP]\n";
        assert!(matches!(
            insert_into_section(doc, "", "e"),
            Err(SectionError::SectionNotFound { .. })
        ));
        // The blank bracket line is ordinary content, not a boundary
        assert_eq!(ConfigDocument::parse(doc).sections().len(), 1);
    }

    #[test]
    fn test_every_section_edit_keeps_other_lines() {
        let doc = "# router.db\r\n[CORE]\r\n\trt-01:ios  \r\n\r\n[BKP]\r\n  sw-01:eos\t\r\n[LAB]\r\n\t\r\n";
        let original: Vec<&str> = doc.lines().collect();

        for name in ["CORE", "bkp", "Lab"] {
            let result = insert_into_section(doc, name, "NEW-ENTRY").unwrap();
            let kept: Vec<&str> = result.lines().filter(|l| *l != "NEW-ENTRY").collect();

            assert_eq!(kept, original, "section {name}");
            assert_eq!(result.lines().filter(|l| *l == "NEW-ENTRY").count(), 1);
            assert!(result.ends_with('\n') && !result.ends_with("\n\n"));

            let edited = ConfigDocument::parse(&result);
            let span = edited.find_section(name).unwrap();
            assert_eq!(edited.body(&span).last(), Some(&"NEW-ENTRY"));
        }
    }

    #[test]
    fn test_sections_listing() {
        let doc = ConfigDocument::parse("preamble\n[A]\na\n[B]\n");
        let sections = doc.sections();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].name, "A");
        assert_eq!(sections[0].body, 2..3);
        assert_eq!(sections[1].name, "B");
        assert_eq!(sections[1].body, 4..4);
    }
}
