//! Plain predicates over span text, used by the segment feature set.
//!
//! These give the decoder high-precision signal for roster fields (phone,
//! email, date, external id, name) that the statistical features alone
//! can't reliably produce, since the patterns involved are genuinely
//! regular.

use once_cell::sync::Lazy;
use regex::Regex;

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9()+\-.\s]{7,}$").expect("static regex"));
static DIGITS_10_11_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{10,11}$").expect("static regex"));
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]{2,}$").expect("static regex"));
static EXTID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-_#A-Za-z0-9]+$").expect("static regex"));
static EXTID_REMOVE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-_#A-Za-z0-9]+$").expect("static regex"));
static PHONE_REMOVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9()+\-.\s]{7,}").expect("static regex"));
static EMAIL_REMOVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\s@]+@[^\s@]+\.[^\s@]{2,}").expect("static regex"));
static SLASH_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,4}[/-]\d{1,2}[/-]\d{1,4}$").expect("static regex"));
static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][a-zA-Z'.-]*$").expect("static regex"));
static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^["'(].*["')]$"#).expect("static regex"));

const MONTH_WORDS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep",
    "sept", "oct", "nov", "dec",
];

const COMMON_FIRST_NAMES: &[&str] = &[
    "james", "john", "robert", "michael", "william", "david", "richard", "mary", "patricia",
    "jennifer", "linda", "elizabeth", "barbara", "susan", "jessica", "sarah", "karen", "alice",
    "bob", "carol", "daniel", "emily", "frank", "grace", "henry", "isabella", "jack", "kate",
    "laura", "maria", "nancy", "oliver", "paul", "quinn", "rachel", "samuel", "thomas",
];

/// Strips every non-digit character, for the "exact 10 or 11 digits"
/// precedence rule in `spec.md` §4.3.
pub fn digits_only(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// True iff the span's digit-only projection matches `^\d{10,11}$`
/// (`spec.md` §4.3's `exact10or11`).
pub fn is_exact_10_or_11_digits(text: &str) -> bool {
    DIGITS_10_11_RE.is_match(&digits_only(text))
}

pub fn is_phone(text: &str) -> bool {
    let trimmed = text.trim();
    if !PHONE_RE.is_match(trimmed) {
        return false;
    }
    let digits = digits_only(trimmed);
    (7..=15).contains(&digits.len())
}

pub fn is_email(text: &str) -> bool {
    EMAIL_RE.is_match(text.trim())
}

pub fn is_extid(text: &str) -> bool {
    let trimmed = text.trim();
    EXTID_RE.is_match(trimmed) && trimmed.chars().any(|c| c.is_ascii_alphabetic() || "-_#".contains(c))
}

pub fn is_birthdate(text: &str) -> bool {
    let trimmed = text.trim();
    if SLASH_DATE_RE.is_match(trimmed) {
        return true;
    }
    let lower = trimmed.to_lowercase();
    is_month_word(&lower.split_whitespace().next().unwrap_or(""))
        && trimmed.chars().any(|c| c.is_ascii_digit())
}

pub fn is_month_word(word: &str) -> bool {
    MONTH_WORDS.contains(&word.to_lowercase().trim_end_matches('.'))
}

/// `1st`, `2nd`, `3rd`, `4th`, … — ordinal day-of-month suffixes.
pub fn has_day_suffix(word: &str) -> bool {
    let lower = word.to_lowercase();
    let digits: String = lower.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return false;
    }
    let suffix = &lower[digits.len()..];
    matches!(suffix, "st" | "nd" | "rd" | "th")
}

pub fn is_name(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && trimmed
            .split_whitespace()
            .all(|word| NAME_RE.is_match(word))
}

/// A preferred/nickname span: a name-shaped token wrapped in quotes or
/// parentheses, e.g. `"Bob"` in `Robert "Bob" Smith`.
pub fn is_preferred_name(text: &str) -> bool {
    let trimmed = text.trim();
    QUOTED_RE.is_match(trimmed) && trimmed.len() > 2 && is_name(&trimmed[1..trimmed.len() - 1])
}

pub fn is_common_first_name(word: &str) -> bool {
    COMMON_FIRST_NAMES.contains(&word.to_lowercase().as_str())
}

/// Tight sub-region regex used by the trainer's remove-specific update
/// (`spec.md` §4.6) to re-locate a phone/email/ExtID span by pattern when
/// the exact `(start, end)` no longer matches the current candidate set.
pub fn locate_tight_region(text: &str, field_type: &str) -> Option<(usize, usize)> {
    let re: &Regex = match field_type {
        "Phone" => &PHONE_REMOVE_RE,
        "Email" => &EMAIL_REMOVE_RE,
        "ExtID" => &EXTID_REMOVE_RE,
        _ => return None,
    };
    let m = re.find(text)?;
    if field_type == "ExtID" && is_exact_10_or_11_digits(m.as_str()) {
        return None;
    }
    Some((m.start(), m.end()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_recognizes_common_formats() {
        assert!(is_phone("410-111-1111"));
        assert!(is_phone("(410) 111-1111"));
        assert!(is_phone("1234567890"));
        assert!(!is_phone("abc"));
    }

    #[test]
    fn exact_digit_precedence() {
        assert!(is_exact_10_or_11_digits("1234567890"));
        assert!(is_exact_10_or_11_digits("123-456-7890"));
        assert!(!is_exact_10_or_11_digits("12345"));
    }

    #[test]
    fn email_basic() {
        assert!(is_email("alice@example.com"));
        assert!(!is_email("not-an-email"));
    }

    #[test]
    fn extid_alphanumeric_codes() {
        assert!(is_extid("AB-1029"));
        assert!(is_extid("ID#4412"));
        assert!(!is_extid("alice@example.com"));
    }

    #[test]
    fn preferred_name_quoted() {
        assert!(is_preferred_name("\"Bob\""));
        assert!(!is_preferred_name("Bob"));
    }

    #[test]
    fn day_suffix_detection() {
        assert!(has_day_suffix("1st"));
        assert!(has_day_suffix("22nd"));
        assert!(!has_day_suffix("January"));
    }
}
