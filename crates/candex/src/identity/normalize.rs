//! Identity-signal normalization.
//!
//! All grouping and duplicate lookups operate on these canonical forms,
//! never on raw extracted strings.

use std::sync::OnceLock;

use regex::Regex;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Syntactic check only; deliverability is not our concern.
        Regex::new(r"^[a-z0-9][a-z0-9._%+\-]*@[a-z0-9][a-z0-9\-]*(\.[a-z0-9\-]+)+$")
            .expect("email regex is valid")
    })
}

/// Lowercased, trimmed email address, or None if it fails the syntactic
/// check.
pub fn normalize_email(raw: &str) -> Option<String> {
    let candidate = raw.trim().to_lowercase();
    if candidate.is_empty() || !email_regex().is_match(&candidate) {
        return None;
    }
    Some(candidate)
}

/// Digits-only phone number with UK trunk rewriting.
///
/// Strips every non-digit, rewrites a leading trunk "0" of 11-digit
/// numbers to the "44" country prefix, and requires 10–15 final digits.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    let digits = if digits.len() == 11 && digits.starts_with('0') {
        format!("44{}", &digits[1..])
    } else {
        digits
    };

    if (10..=15).contains(&digits.len()) {
        Some(digits)
    } else {
        None
    }
}

/// Lowercased name with punctuation stripped and whitespace collapsed.
pub fn normalize_name(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}
