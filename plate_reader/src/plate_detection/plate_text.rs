use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineTerminator {
    None,
    Lf,
    CrLf,
}

impl LineTerminator {
    pub fn as_str(self) -> &'static str {
        match self {
            LineTerminator::None => "",
            LineTerminator::Lf => "\n",
            LineTerminator::CrLf => "\r\n",
        }
    }
}

/// Turns raw OCR output into what goes over the serial link.
///
/// With `keep_last` set only that many trailing characters are transmitted,
/// followed by `marker` so the board can tell a partial plate from a full one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPolicy {
    #[serde(default, deserialize_with = "crate::config::switchable")]
    pub keep_last: Option<usize>,
    #[serde(default, deserialize_with = "crate::config::switchable")]
    pub marker: Option<char>,
    pub terminator: LineTerminator,
}

impl TextPolicy {
    pub fn masked_suffix() -> Self {
        Self {
            keep_last: Some(4),
            marker: Some('*'),
            terminator: LineTerminator::None,
        }
    }

    pub fn full_line() -> Self {
        Self {
            keep_last: None,
            marker: None,
            terminator: LineTerminator::Lf,
        }
    }

    /// Trimmed text, `None` when OCR produced nothing but whitespace.
    pub fn clean(&self, raw: &str) -> Option<String> {
        let text = raw.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }

    pub fn truncate(&self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();

        // Already marked and short enough: leave it alone.
        if let Some(marker) = self.marker {
            if chars.last() == Some(&marker)
                && self.keep_last.map_or(true, |keep| chars.len() - 1 <= keep)
            {
                return text.to_string();
            }
        }

        let start = self
            .keep_last
            .map_or(0, |keep| chars.len().saturating_sub(keep));
        let mut out: String = chars[start..].iter().collect();
        if let Some(marker) = self.marker {
            out.push(marker);
        }
        out
    }

    pub fn format(&self, raw: &str) -> Option<String> {
        self.clean(raw).map(|text| self.truncate(&text))
    }

    pub fn payload(&self, text: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(text.len() + 2);
        bytes.extend_from_slice(text.as_bytes());
        bytes.extend_from_slice(self.terminator.as_str().as_bytes());
        bytes
    }
}

impl Default for TextPolicy {
    fn default() -> Self {
        Self::masked_suffix()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn long_plates_keep_the_last_four_characters() {
        let policy = TextPolicy::masked_suffix();
        assert_eq!(policy.truncate("KA01AB1234"), "1234*");
        assert_eq!(policy.truncate("ABCD"), "ABCD*");
    }

    #[test]
    fn short_plates_are_marked_whole() {
        let policy = TextPolicy::masked_suffix();
        assert_eq!(policy.truncate("X9"), "X9*");
        assert_eq!(policy.truncate(""), "*");
    }

    #[test]
    fn truncation_is_idempotent() {
        let policy = TextPolicy::masked_suffix();
        for plate in ["KA01AB1234", "AB12", "Z", "7XYZ9"] {
            let once = policy.truncate(plate);
            assert_eq!(policy.truncate(&once), once, "input {plate}");
        }
    }

    #[test]
    fn full_line_policy_passes_text_through() {
        let policy = TextPolicy::full_line();
        assert_eq!(policy.truncate("KA01AB1234"), "KA01AB1234");
        assert_eq!(policy.payload("KA01AB1234"), b"KA01AB1234\n".to_vec());
    }

    #[test]
    fn clean_trims_and_drops_blank_output() {
        let policy = TextPolicy::default();
        assert_eq!(policy.clean("  MH12DE1433\n\x0c"), Some("MH12DE1433".to_string()));
        assert_eq!(policy.clean(" \n "), None);
        assert_eq!(policy.format("\nMH12DE1433 \n"), Some("1433*".to_string()));
    }

    #[test]
    fn payload_appends_the_configured_terminator() {
        let mut policy = TextPolicy::masked_suffix();
        assert_eq!(policy.payload("1234*"), b"1234*".to_vec());

        policy.terminator = LineTerminator::CrLf;
        assert_eq!(policy.payload("1234*"), b"1234*\r\n".to_vec());
    }
}
