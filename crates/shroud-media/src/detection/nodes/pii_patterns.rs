//! Classification of recognized text into PII kinds.

use std::fmt;

use regex::Regex;

use crate::error::{MediaError, MediaResult};

/// Label carried by license plate detections.
pub const LICENSE_PLATE_LABEL: &str = "license_plate";

/// Kind of personal data a text region contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiiKind {
    Email,
    PaymentCard,
    IdNumber,
    Phone,
    Address,
    LicensePlate,
}

impl PiiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiKind::Email => "email",
            PiiKind::PaymentCard => "payment_card",
            PiiKind::IdNumber => "id_number",
            PiiKind::Phone => "phone",
            PiiKind::Address => "address",
            PiiKind::LicensePlate => LICENSE_PLATE_LABEL,
        }
    }
}

impl fmt::Display for PiiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct CompiledRule {
    kind: PiiKind,
    pattern: Regex,
    /// Extra check on the matched text.
    validate: fn(&str) -> bool,
}

/// Regex-based PII classifier. Rules are tried in order; the first match
/// wins.
pub struct PiiClassifier {
    rules: Vec<CompiledRule>,
}

impl PiiClassifier {
    pub fn new() -> MediaResult<Self> {
        let specs: [(PiiKind, &str, fn(&str) -> bool); 6] = [
            (
                PiiKind::Email,
                r"(?i)\b[a-z0-9._%+-]+@[a-z0-9-]+(?:\.[a-z0-9-]+)*\.[a-z]{2,}\b",
                accept,
            ),
            (PiiKind::PaymentCard, r"\b(?:\d[ -]?){12,18}\d\b", luhn_valid),
            (
                PiiKind::IdNumber,
                r"\b\d{3}-\d{2}-\d{4}\b|\b[A-Z]{1,2}\d{6,9}\b",
                accept,
            ),
            (
                PiiKind::Phone,
                r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{2,4}\)|\d{2,4})[\s.-]?\d{3,4}[\s.-]?\d{3,4}",
                has_phone_digits,
            ),
            (
                PiiKind::Address,
                r"(?i)\b\d{1,5}\s+(?:[a-z]+\s+){1,4}(?:street|st|avenue|ave|road|rd|lane|ln|drive|dr|boulevard|blvd|court|ct|way|place|pl)\b",
                accept,
            ),
            (
                PiiKind::LicensePlate,
                r"^[A-Z0-9]{1,4}[- ]?[A-Z0-9]{1,4}[- ]?[A-Z0-9]{0,4}$",
                plate_like,
            ),
        ];

        let rules = specs
            .into_iter()
            .map(|(kind, pattern, validate)| {
                let pattern = Regex::new(pattern).map_err(|e| {
                    MediaError::internal(format!("Invalid regex pattern for {}: {}", kind, e))
                })?;
                Ok(CompiledRule {
                    kind,
                    pattern,
                    validate,
                })
            })
            .collect::<MediaResult<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// Classify recognized text. Returns `None` for text that is not PII.
    pub fn classify(&self, text: &str) -> Option<PiiKind> {
        let text = text.trim();
        if text.chars().filter(|c| c.is_ascii_alphanumeric()).count() < 4 {
            return None;
        }

        let upper = text.to_ascii_uppercase();
        self.rules.iter().find_map(|rule| {
            let haystack = if rule.kind == PiiKind::LicensePlate {
                upper.as_str()
            } else {
                text
            };
            rule.pattern
                .find_iter(haystack)
                .any(|m| (rule.validate)(m.as_str()))
                .then_some(rule.kind)
        })
    }
}

fn accept(_: &str) -> bool {
    true
}

fn digits(text: &str) -> Vec<u32> {
    text.chars().filter_map(|c| c.to_digit(10)).collect()
}

/// Luhn checksum over the digits of a card number.
fn luhn_valid(text: &str) -> bool {
    let digits = digits(text);
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn has_phone_digits(text: &str) -> bool {
    (9..=15).contains(&digits(text).len())
}

/// Plates mix letters and digits and are short.
fn plate_like(text: &str) -> bool {
    let alnum = text.chars().filter(|c| c.is_ascii_alphanumeric()).count();
    (4..=8).contains(&alnum)
        && text.chars().any(|c| c.is_ascii_digit())
        && text.chars().any(|c| c.is_ascii_alphabetic())
}
