//! Plate grammar and bounded repair
//!
//! A text is accepted when it matches one of the grammar patterns as-is, or
//! after one enumerated repair: a hyphen at a letter/digit boundary, a single
//! confusion substitution, a hyphen removed or added, or one character
//! deleted. Nothing further from a valid shape is accepted.

use regex::Regex;
use std::ops::RangeInclusive;
use serde::Serialize;
use tracing::{debug, warn};

use super::confusion;
use super::normalize::is_plate_char;
use crate::config::ValidationPolicy;
use crate::error::ScannerError;

/// Accepted plate shapes, in match order: (name, pattern, example)
pub const PLATE_GRAMMAR: &[(&str, &str, &str)] = &[
    ("standard", r"^[A-Z]{2,3}-?[0-9]{3,4}$", "ABC-1234"),
    ("numeric", r"^[0-9]{3}-[0-9]{4}$", "123-4567"),
    ("motorcycle", r"^[A-Z]{1,2}-[0-9]{5}$", "AB-12345"),
    ("mixed", r"^[A-Z]{2}[0-9]{2}[A-Z]{2}$", "AB12CD"),
    ("digit_led", r"^[0-9]{1,2}[A-Z]{2,3}[0-9]{2,4}$", "12ABC34"),
];

/// Legacy fallback accepts alphanumeric text of this length range
const LEGACY_LEN: RangeInclusive<usize> = 2..=8;

/// How an accepted text was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Repair {
    Exact,
    HyphenInserted,
    Substituted,
    HyphenRemoved,
    HyphenAdded,
    Deleted,
    LegacyFallback,
}

/// A successful validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub text: String,
    /// Grammar pattern name, or `alphanumeric` for the legacy fallback
    pub pattern: String,
    pub repair: Repair,
}

struct PlatePattern {
    name: String,
    regex: Regex,
}

pub struct PlateValidator {
    patterns: Vec<PlatePattern>,
    policy: ValidationPolicy,
    /// Accepted text length, repairs included
    length: RangeInclusive<usize>,
}

impl PlateValidator {
    /// Validator over the built-in grammar
    pub fn new(policy: ValidationPolicy) -> Result<Self, ScannerError> {
        Self::with_patterns(PLATE_GRAMMAR.iter().map(|&(name, pattern, _)| (name, pattern)), policy)
    }

    /// Validator over a custom grammar
    pub fn with_patterns<'a>(
        patterns: impl IntoIterator<Item = (&'a str, &'a str)>,
        policy: ValidationPolicy,
    ) -> Result<Self, ScannerError> {
        let patterns = patterns
            .into_iter()
            .map(|(name, pattern)| {
                Ok(PlatePattern {
                    name: name.to_string(),
                    regex: Regex::new(pattern)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        if policy == ValidationPolicy::AlphanumericFallback {
            warn!("Legacy alphanumeric fallback validation enabled; any 2-8 character alphanumeric text will be accepted");
        }

        Ok(Self {
            patterns,
            policy,
            length: 1..=usize::MAX,
        })
    }

    /// Restrict accepted texts to `min..=max` characters.
    ///
    /// Repairs that add a hyphen or drop a character can leave the
    /// normalizer's bounds, so the same bounds are enforced here.
    pub fn with_length_bounds(mut self, min: usize, max: usize) -> Self {
        self.length = min.max(1)..=max;
        self
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    /// Accepted canonical text, or `None`
    pub fn validate(&self, text: &str) -> Option<String> {
        self.validate_detailed(text).map(|v| v.text)
    }

    /// Like [`validate`](Self::validate) but also reports the pattern and repair used
    pub fn validate_detailed(&self, text: &str) -> Option<Validation> {
        if text.is_empty() || !text.chars().all(is_plate_char) {
            return None;
        }

        let found = self
            .exact(text, Repair::Exact)
            .or_else(|| self.try_hyphen_insertion(text))
            .or_else(|| self.try_substitutions(text))
            .or_else(|| self.try_hyphen_edits(text))
            .or_else(|| self.try_deletions(text))
            .or_else(|| self.legacy_fallback(text));

        match &found {
            Some(v) if v.repair != Repair::Exact => {
                debug!("Repaired {:?} to {:?} ({:?}, {})", text, v.text, v.repair, v.pattern)
            }
            None => debug!("Rejected {:?}", text),
            _ => {}
        }
        found
    }

    fn matching_pattern(&self, text: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(text))
            .map(|p| p.name.as_str())
    }

    fn exact(&self, text: &str, repair: Repair) -> Option<Validation> {
        if !self.length.contains(&text.chars().count()) {
            return None;
        }
        self.matching_pattern(text).map(|pattern| Validation {
            text: text.to_string(),
            pattern: pattern.to_string(),
            repair,
        })
    }

    /// Insert a hyphen where a letter run meets a digit run, leading run first
    fn try_hyphen_insertion(&self, text: &str) -> Option<Validation> {
        if text.contains('-') {
            return None;
        }
        let chars: Vec<char> = text.chars().collect();
        (1..chars.len())
            .filter(|&i| chars[i - 1].is_ascii_digit() != chars[i].is_ascii_digit())
            .find_map(|i| self.exact(&insert_at(&chars, i, '-'), Repair::HyphenInserted))
    }

    /// One confusion pair replaced everywhere, then single-position swaps
    fn try_substitutions(&self, text: &str) -> Option<Validation> {
        let replaced = confusion::all_pairs()
            .filter(|&(from, _)| text.contains(from))
            .find_map(|(from, to)| self.exact(&text.replace(from, &to.to_string()), Repair::Substituted));
        if replaced.is_some() {
            return replaced;
        }

        let chars: Vec<char> = text.chars().collect();
        (0..chars.len()).find_map(|i| {
            confusion::alternatives(chars[i]).find_map(|alt| {
                let mut candidate = chars.clone();
                candidate[i] = alt;
                self.exact(&candidate.iter().collect::<String>(), Repair::Substituted)
            })
        })
    }

    /// Remove one hyphen, or add one anywhere when there is none
    fn try_hyphen_edits(&self, text: &str) -> Option<Validation> {
        let chars: Vec<char> = text.chars().collect();
        if text.contains('-') {
            (0..chars.len()).filter(|&i| chars[i] == '-').find_map(|i| {
                let candidate: String = chars[..i].iter().chain(&chars[i + 1..]).collect();
                self.exact(&candidate, Repair::HyphenRemoved)
            })
        } else {
            (1..chars.len()).find_map(|i| self.exact(&insert_at(&chars, i, '-'), Repair::HyphenAdded))
        }
    }

    fn try_deletions(&self, text: &str) -> Option<Validation> {
        let chars: Vec<char> = text.chars().collect();
        (0..chars.len()).find_map(|i| {
            let candidate: String = chars[..i].iter().chain(&chars[i + 1..]).collect();
            self.exact(&candidate, Repair::Deleted)
        })
    }

    fn legacy_fallback(&self, text: &str) -> Option<Validation> {
        if self.policy != ValidationPolicy::AlphanumericFallback {
            return None;
        }
        let alphanumeric = text.chars().all(|c| c.is_ascii_alphanumeric());
        if alphanumeric && LEGACY_LEN.contains(&text.len()) && self.length.contains(&text.len()) {
            return Some(Validation {
                text: text.to_string(),
                pattern: "alphanumeric".to_string(),
                repair: Repair::LegacyFallback,
            });
        }
        None
    }
}

fn insert_at(chars: &[char], index: usize, c: char) -> String {
    chars[..index].iter().chain(std::iter::once(&c)).chain(&chars[index..]).collect()
}
