//! Parsing and merging of the lock file metadata header.
//!
//! A lock file starts with a contiguous run of `key: value` lines terminated by
//! the first blank line; everything from that blank line on is free-form body.
//! Lines inside the leading block that are not `key: value` pairs are kept
//! verbatim, so a rewrite never loses or reorders human-written text.

use std::sync::LazyLock;

use regex::Regex;

static FIELD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9_-]+)\s*:\s*(.+)$").expect("field line regex")
});

static FIELD_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("field key regex"));

/// One line of the leading metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderLine {
    Field {
        key: String,
        value: String,
        /// Original text, reused on render while the value is unchanged.
        raw: String,
    },
    Verbatim(String),
}

/// A lock file split into header lines and untouched body text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    lines: Vec<HeaderLine>,
    body: String,
}

impl Document {
    /// Split `text` into header and body.
    ///
    /// If the leading block holds no `key: value` line at all, the header is
    /// empty and the whole text is body.
    pub fn parse(text: &str) -> Self {
        let mut lines = Vec::new();
        let mut offset = 0usize;

        for segment in text.split_inclusive('\n') {
            let line = segment.trim_end_matches('\n').trim_end_matches('\r');
            if line.trim().is_empty() {
                break;
            }
            lines.push(parse_line(segment.trim_end_matches('\n')));
            offset += segment.len();
        }

        if !lines
            .iter()
            .any(|line| matches!(line, HeaderLine::Field { .. }))
        {
            return Self {
                lines: Vec::new(),
                body: text.to_string(),
            };
        }

        Self {
            lines,
            body: text[offset..].to_string(),
        }
    }

    /// First value for `key` (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            HeaderLine::Field { key: k, value, .. } if k.eq_ignore_ascii_case(key) => {
                Some(value.as_str())
            }
            _ => None,
        })
    }

    /// All fields in header order, keys as written.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().filter_map(|line| match line {
            HeaderLine::Field { key, value, .. } => Some((key.as_str(), value.as_str())),
            HeaderLine::Verbatim(_) => None,
        })
    }

    pub fn lines(&self) -> &[HeaderLine] {
        &self.lines
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Overwrite the first field matching `key` (case-insensitive) or append a
    /// new field at the end of the header.
    ///
    /// The existing key spelling is kept when overwriting.
    pub fn set(&mut self, key: &str, value: &str) {
        for line in &mut self.lines {
            if let HeaderLine::Field {
                key: existing,
                value: current,
                raw,
            } = line
                && existing.eq_ignore_ascii_case(key)
            {
                if current != value {
                    *current = value.to_string();
                    *raw = format!("{existing}: {value}");
                }
                return;
            }
        }
        self.lines.push(HeaderLine::Field {
            key: key.to_string(),
            value: value.to_string(),
            raw: format!("{key}: {value}"),
        });
    }

    /// Render back to text. Unchanged lines keep their original bytes.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                HeaderLine::Field { raw, .. } => out.push_str(raw),
                HeaderLine::Verbatim(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        if !self.lines.is_empty() && !self.body.is_empty() && !starts_with_blank_line(&self.body)
        {
            out.push('\n');
        }
        out.push_str(&self.body);
        out
    }
}

/// Validate a `key=value` update before it is merged into a header.
pub fn validate_field(key: &str, value: &str) -> Result<(), String> {
    if !FIELD_KEY.is_match(key) {
        return Err(format!("invalid field key '{key}' (expected [A-Za-z0-9_-]+)"));
    }
    if value.trim().is_empty() {
        return Err(format!("field '{key}' must have a non-empty value"));
    }
    if value.contains('\n') || value.contains('\r') {
        return Err(format!("field '{key}' must be a single line"));
    }
    Ok(())
}

/// Split `k=v` into its parts.
pub fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim().to_string();
    let value = value.trim().to_string();
    validate_field(&key, &value)?;
    Ok((key, value))
}

fn parse_line(raw: &str) -> HeaderLine {
    let text = raw.trim_end_matches('\r');
    match FIELD_LINE.captures(text) {
        Some(caps) => HeaderLine::Field {
            key: caps[1].to_string(),
            value: caps[2].trim().to_string(),
            raw: raw.to_string(),
        },
        None => HeaderLine::Verbatim(raw.to_string()),
    }
}

fn starts_with_blank_line(text: &str) -> bool {
    let first = text.split('\n').next().unwrap_or_default();
    first.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fields_until_first_blank_line() {
        let doc = Document::parse("owner: alice\nstatus: active\n\nstatus: released\n");
        assert_eq!(doc.get("owner"), Some("alice"));
        assert_eq!(doc.get("STATUS"), Some("active"));
        assert_eq!(doc.body(), "\nstatus: released\n");
    }

    #[test]
    fn keeps_non_field_lines_in_header() {
        let text = "# Lock: db migration\nowner: bob\n\nbody\n";
        let doc = Document::parse(text);
        assert_eq!(doc.lines()[0], HeaderLine::Verbatim("# Lock: db migration".to_string()));
        assert_eq!(doc.get("owner"), Some("bob"));
        assert_eq!(doc.render(), text);
    }

    #[test]
    fn free_form_file_has_empty_header() {
        let text = "Locked by someone\nworking on it\n";
        let doc = Document::parse(text);
        assert_eq!(doc.fields().count(), 0);
        assert_eq!(doc.body(), text);
    }

    #[test]
    fn set_overwrites_case_insensitively_and_keeps_key_spelling() {
        let mut doc = Document::parse("Status: active\nowner: a\n\nbody\n");
        doc.set("status", "released");
        assert_eq!(doc.render(), "Status: released\nowner: a\n\nbody\n");
    }

    #[test]
    fn set_appends_new_field_at_end_of_header() {
        let mut doc = Document::parse("owner: a\n\nbody\n");
        doc.set("expires", "2026-02-10");
        assert_eq!(doc.render(), "owner: a\nexpires: 2026-02-10\n\nbody\n");
    }

    #[test]
    fn set_on_free_form_file_prepends_header_with_separator() {
        let mut doc = Document::parse("just some notes\n");
        doc.set("status", "released");
        let rendered = doc.render();
        assert_eq!(rendered, "status: released\n\njust some notes\n");

        let mut again = Document::parse(&rendered);
        again.set("status", "released");
        assert_eq!(again.render(), rendered);
    }

    #[test]
    fn unchanged_value_keeps_original_spacing() {
        let text = "owner:    alice\n\n";
        let mut doc = Document::parse(text);
        doc.set("OWNER", "alice");
        assert_eq!(doc.render(), text);
    }

    #[test]
    fn parse_assignment_rejects_bad_keys() {
        assert!(parse_assignment("status=released").is_ok());
        assert!(parse_assignment("no-equals").is_err());
        assert!(parse_assignment("bad key=x").is_err());
        assert!(parse_assignment("status=").is_err());
    }
}
