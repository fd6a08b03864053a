//! Raw OCR text to canonical plate text
//!
//! Canonical text is upper-case, drawn from `A-Z`, `0-9` and `-`, has no
//! leading, trailing or doubled hyphens, and fits the configured length
//! bounds.

use super::confusion;
use crate::config::TextSettings;

/// Punctuation and symbols OCR engines inject around plate glyphs
pub const NOISE_CHARS: &[char] = &[
    '.', ',', ':', ';', '\'', '"', '`', '|', '_', '!', '?', '(', ')', '[', ']', '{', '}', '<', '>',
    '~', '^', '*',
];

/// True for characters allowed in canonical text
pub fn is_plate_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-'
}

#[derive(Debug, Clone)]
pub struct TextNormalizer {
    min_len: usize,
    max_len: usize,
}

impl TextNormalizer {
    pub fn new(settings: &TextSettings) -> Self {
        Self {
            min_len: settings.min_len,
            max_len: settings.max_len,
        }
    }

    /// Canonicalize `raw`, or `None` when it cannot be a plate.
    ///
    /// Confusable letters are turned into digits only inside the trailing
    /// numeric run of each hyphen-separated group, so leading letter blocks
    /// survive. This step is lossy: `ABC-B12` becomes `ABC-812` whether or
    /// not the `B` was printed.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let cleaned: String = raw
            .to_uppercase()
            .chars()
            .filter(|c| !NOISE_CHARS.contains(c) && !c.is_whitespace())
            .collect();

        if !cleaned.chars().all(is_plate_char) {
            return None;
        }

        let mut collapsed = String::with_capacity(cleaned.len());
        for c in cleaned.chars() {
            if c == '-' && collapsed.ends_with('-') {
                continue;
            }
            collapsed.push(c);
        }

        let corrected = collapsed
            .split('-')
            .map(correct_numeric_run)
            .collect::<Vec<_>>()
            .join("-");

        let text = corrected.trim_matches('-');
        let len = text.chars().count();
        if len < self.min_len || len > self.max_len {
            return None;
        }

        Some(text.to_string())
    }
}

/// Rewrite confusable letters as digits inside the group's trailing numeric run.
///
/// The run is the longest suffix made of digits and confusable letters that
/// holds at least one real digit. Inside it a letter is rewritten when it
/// opens the group or directly follows a digit.
fn correct_numeric_run(group: &str) -> String {
    let chars: Vec<char> = group.chars().collect();

    let mut start = chars.len();
    while start > 0 {
        let c = chars[start - 1];
        if c.is_ascii_digit() || confusion::letter_to_digit(c).is_some() {
            start -= 1;
        } else {
            break;
        }
    }

    if !chars[start..].iter().any(|c| c.is_ascii_digit()) {
        return group.to_string();
    }

    let mut out: Vec<char> = chars[..start].to_vec();
    for (i, &c) in chars.iter().enumerate().skip(start) {
        let follows_digit = out.last().map(|p| p.is_ascii_digit()).unwrap_or(false);
        match confusion::letter_to_digit(c) {
            Some(d) if i == 0 || follows_digit => out.push(d),
            _ => out.push(c),
        }
    }

    out.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> TextNormalizer {
        TextNormalizer::new(&TextSettings::default())
    }

    #[test]
    fn test_noise_whitespace_and_confusion() {
        assert_eq!(normalizer().normalize("AB C-l23").as_deref(), Some("ABC-123"));
        assert_eq!(normalizer().normalize(" abc.1234 ").as_deref(), Some("ABC1234"));
        assert_eq!(normalizer().normalize("[XYZ-5678]").as_deref(), Some("XYZ-5678"));
    }

    #[test]
    fn test_letters_kept_in_letter_block() {
        assert_eq!(normalizer().normalize("BOS-1O3").as_deref(), Some("BOS-103"));
        assert_eq!(normalizer().normalize("ABCB123").as_deref(), Some("ABCB123"));
        assert_eq!(normalizer().normalize("ABC-OO7").as_deref(), Some("ABC-007"));
    }

    #[test]
    fn test_hyphens_trimmed_and_collapsed() {
        assert_eq!(normalizer().normalize("--ABC--123-").as_deref(), Some("ABC-123"));
    }

    #[test]
    fn test_rejects_foreign_characters() {
        assert_eq!(normalizer().normalize("ABC@123"), None);
        assert_eq!(normalizer().normalize("ÄBC-123"), None);
    }

    #[test]
    fn test_length_bounds() {
        assert_eq!(normalizer().normalize("A1"), None);
        assert_eq!(normalizer().normalize("-A1-"), None);
        assert_eq!(normalizer().normalize("ABCDEFGHIJKLM"), None);
        assert_eq!(normalizer().normalize("ABCDEFGHIJKL").as_deref(), Some("ABCDEFGHIJKL"));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let n = normalizer();
        for raw in ["AB C-l23", "abcb123", "b0s-1o3", "12 ab 34", "XY-I2345", "ab12cd"] {
            if let Some(once) = n.normalize(raw) {
                assert_eq!(n.normalize(&once).as_deref(), Some(once.as_str()), "{raw}");
            }
        }
    }
}
