//! Pattern recognisers for each [`PiiCategory`].
//!
//! Every recogniser pushes candidate spans; [`detect`] then resolves overlaps so the masked
//! text never contains nested or partially replaced entities. Numeric identifiers are
//! checksum-validated unless an explicit cue (`PESEL`, `NIP`, ...) precedes them, and phone
//! numbers are bounded by digit count to keep dosages and dates out.

use super::PiiCategory;
use regex::Regex;
use std::cmp::Reverse;
use std::sync::LazyLock;

const NAME_WORD: &str = r"\p{Lu}\p{Ll}+(?:-\p{Lu}\p{Ll}+)?";
const CAPS_WORD: &str = r"\p{Lu}{2,}(?:-\p{Lu}{2,})?";
const PERSON_CUE_PREFIX: &str = r"(?i:\b(?:mr|mrs|ms|miss|dr|prof|pan|pani)\.?|\b(?:patient|pacjent(?:ka|a|ki)?|mother|father|son|daughter|name))[ \t]*:?\s+";
const CUE_WINDOW_CHARS: usize = 24;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("email pattern")
});

static CARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]?){12,18}\d\b").expect("card pattern"));

static ELEVEN_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{11}\b").expect("pesel pattern"));

static SSN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn pattern"));

static NIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{3}-?\d{3}-?\d{2}-?\d{2}|\d{3}-\d{2}-\d{2}-\d{3})\b").expect("nip pattern")
});

static BIRTH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    let months = r"(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?";
    Regex::new(&format!(
        r"(?i)\b(?:dob|d\.o\.b\.?|date of birth|birth ?date|born(?: on)?|data urodzenia|ur\.|urodzon[ya](?: dnia)?)\s*[:\-]?\s*(\d{{1,2}}[./-]\d{{1,2}}[./-]\d{{2,4}}|\d{{4}}-\d{{1,2}}-\d{{1,2}}|\d{{1,2}}\s+{months}\s+\d{{4}}|{months}\s+\d{{1,2}},?\s+\d{{4}})"
    ))
    .expect("birth date pattern")
});

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+\d{1,3}[ .-]?)?(?:\(\d{1,4}\)[ .-]?)?\d{2,4}(?:[ .-]?\d{2,4}){1,4}")
        .expect("phone pattern")
});

static PERSON_CUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{PERSON_CUE_PREFIX}({NAME_WORD}(?:[ \t]+{NAME_WORD}){{0,2}})"
    ))
    .expect("person cue pattern")
});

static PERSON_CUE_CAPS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?:{PERSON_CUE_PREFIX}|(?i:\bname)[ \t]*:?\s+)({CAPS_WORD}(?:[ \t]+{CAPS_WORD}){{0,2}})\b"
    ))
    .expect("capitalised person cue pattern")
});

static CAPS_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(CAPS_WORD).expect("caps word pattern"));

/// Upper-case tokens that follow a cue in record headers without being names.
const CAPS_NON_NAMES: &[&str] = &[
    "DOB", "ID", "MRN", "NIP", "PESEL", "SSN", "NHS", "NA", "BMI", "ECG", "EKG", "MRI", "CT",
    "ICU", "ER", "HIV", "UNKNOWN", "NONE",
];

static PERSON_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b{NAME_WORD}(?:[ \t]+{NAME_WORD})+")).expect("person run pattern")
});

static NAME_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NAME_WORD).expect("name word pattern"));

/// Capitalised words that start sentences or headings rather than names.
const NON_NAME_WORDS: &[&str] = &[
    "A", "An", "And", "Are", "At", "But", "Can", "Could", "Did", "Do", "Does", "For", "From",
    "Give", "Her", "His", "How", "If", "In", "Is", "It", "My", "Of", "On", "Or", "Our",
    "Please", "Should", "Show", "Tell", "That", "The", "Their", "These", "This", "Those", "To",
    "Was", "Were", "What", "When", "Where", "Which", "Who", "Why", "Will", "With", "Would",
    "Your", "Patient", "Doctor", "Czy", "Co", "Dla", "Gdzie", "Ile", "Jak", "Jaka", "Jaki",
    "Jakie", "Kiedy", "Kto", "Na", "Pacjent", "Pacjentka", "Proszę", "Pytanie", "W", "Ask",
    "Call", "Check", "Contact", "Find", "Mr", "Mrs", "Ms", "Miss", "Dr", "Prof", "Pan", "Pani",
];

/// A detected sensitive span, as byte offsets into the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Detection {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) category: PiiCategory,
}

/// Scan `text` for the requested categories and return non-overlapping detections ordered by
/// position.
pub(crate) fn detect(text: &str, categories: &[PiiCategory]) -> Vec<Detection> {
    let mut candidates = Vec::new();
    for category in categories {
        match category {
            PiiCategory::Email => find_emails(text, &mut candidates),
            PiiCategory::CreditCard => find_cards(text, &mut candidates),
            PiiCategory::NationalId => find_national_ids(text, &mut candidates),
            PiiCategory::TaxId => find_tax_ids(text, &mut candidates),
            PiiCategory::DateOfBirth => find_birth_dates(text, &mut candidates),
            PiiCategory::PhoneNumber => find_phones(text, &mut candidates),
            PiiCategory::Person => find_people(text, &mut candidates),
        }
    }
    resolve_overlaps(candidates)
}

/// Add whole-word occurrences of already detected values that the patterns missed, such as a
/// surname repeated without its honorific.
pub(crate) fn cover_known_values(
    text: &str,
    mut detections: Vec<Detection>,
    known: &[(PiiCategory, &str)],
) -> Vec<Detection> {
    let mut extra = Vec::new();
    for (category, value) in known {
        if value.chars().count() < 2 {
            continue;
        }
        for (start, _) in text.match_indices(value) {
            let end = start + value.len();
            if is_word_bounded(text, start, end) {
                push(&mut extra, start, end, *category);
            }
        }
    }
    if extra.is_empty() {
        return detections;
    }
    detections.extend(extra);
    resolve_overlaps(detections)
}

/// Whether `value` occurs in `text` as a whole word.
pub(crate) fn contains_word(text: &str, value: &str) -> bool {
    !value.is_empty()
        && text
            .match_indices(value)
            .any(|(start, _)| is_word_bounded(text, start, start + value.len()))
}

fn is_word_bounded(text: &str, start: usize, end: usize) -> bool {
    let word_char = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    !word_char(text[..start].chars().next_back()) && !word_char(text[end..].chars().next())
}

fn resolve_overlaps(mut candidates: Vec<Detection>) -> Vec<Detection> {
    candidates.sort_by_key(|d| (d.start, Reverse(d.end - d.start), d.category.priority()));
    let mut selected: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let overlaps = selected
            .last()
            .is_some_and(|previous| candidate.start < previous.end);
        if !overlaps {
            selected.push(candidate);
        }
    }
    selected
}

fn push(out: &mut Vec<Detection>, start: usize, end: usize, category: PiiCategory) {
    if end > start {
        out.push(Detection {
            start,
            end,
            category,
        });
    }
}

fn find_emails(text: &str, out: &mut Vec<Detection>) {
    for found in EMAIL.find_iter(text) {
        push(out, found.start(), found.end(), PiiCategory::Email);
    }
}

fn find_cards(text: &str, out: &mut Vec<Detection>) {
    for found in CARD.find_iter(text) {
        let digits = digits_of(found.as_str());
        if (13..=19).contains(&digits.len()) && luhn_valid(&digits) {
            push(out, found.start(), found.end(), PiiCategory::CreditCard);
        }
    }
}

fn find_national_ids(text: &str, out: &mut Vec<Detection>) {
    for found in ELEVEN_DIGITS.find_iter(text) {
        let digits = digits_of(found.as_str());
        if pesel_valid(&digits)
            || has_cue_before(text, found.start(), &["pesel", "national id", "id number"])
        {
            push(out, found.start(), found.end(), PiiCategory::NationalId);
        }
    }
    for found in SSN.find_iter(text) {
        push(out, found.start(), found.end(), PiiCategory::NationalId);
    }
}

fn find_tax_ids(text: &str, out: &mut Vec<Detection>) {
    for found in NIP.find_iter(text) {
        let digits = digits_of(found.as_str());
        if digits.len() == 10
            && (nip_valid(&digits) || has_cue_before(text, found.start(), &["nip", "tax id"]))
        {
            push(out, found.start(), found.end(), PiiCategory::TaxId);
        }
    }
}

fn find_birth_dates(text: &str, out: &mut Vec<Detection>) {
    for captures in BIRTH_DATE.captures_iter(text) {
        if let Some(date) = captures.get(1) {
            push(out, date.start(), date.end(), PiiCategory::DateOfBirth);
        }
    }
}

fn find_phones(text: &str, out: &mut Vec<Detection>) {
    let mut from = 0;
    while let Some(found) = PHONE.find_at(text, from) {
        let start = found.start();
        let end = local_number_end(found.as_str()).map_or(found.end(), |split| start + split);
        from = end;

        let digit_count = text[start..end].chars().filter(char::is_ascii_digit).count();
        if !(9..=15).contains(&digit_count) {
            continue;
        }
        if !is_word_bounded(text, start, end) {
            continue;
        }
        push(out, start, end, PiiCategory::PhoneNumber);
    }
}

/// Byte offset just past the ninth digit when a candidate without an international prefix
/// runs on, after a separator, into a following number.
fn local_number_end(candidate: &str) -> Option<usize> {
    if candidate.starts_with(['+', '(']) {
        return None;
    }
    if candidate.chars().filter(char::is_ascii_digit).count() <= 9 {
        return None;
    }
    let (ninth, _) = candidate
        .char_indices()
        .filter(|(_, c)| c.is_ascii_digit())
        .nth(8)?;
    let split = ninth + 1;
    match candidate[split..].chars().next() {
        Some(next) if !next.is_ascii_digit() => Some(split),
        _ => None,
    }
}

fn find_people(text: &str, out: &mut Vec<Detection>) {
    for captures in PERSON_CUE.captures_iter(text) {
        if let Some(name) = captures.get(1) {
            push_name_run(text, name.start(), name.end(), true, out);
        }
    }
    for found in PERSON_RUN.find_iter(text) {
        push_name_run(text, found.start(), found.end(), false, out);
    }
    for captures in PERSON_CUE_CAPS.captures_iter(text) {
        if let Some(name) = captures.get(1) {
            push_caps_run(text, name.start(), name.end(), out);
        }
    }
}

/// Keep the leading upper-case words after a cue up to the first header token.
fn push_caps_run(text: &str, start: usize, end: usize, out: &mut Vec<Detection>) {
    let kept_end = CAPS_WORDS
        .find_iter(&text[start..end])
        .take_while(|word| !is_caps_non_name(word.as_str()))
        .last()
        .map(|word| start + word.end());
    if let Some(kept_end) = kept_end {
        push(out, start, kept_end, PiiCategory::Person);
    }
}

fn is_caps_non_name(word: &str) -> bool {
    CAPS_NON_NAMES.contains(&word)
        || NON_NAME_WORDS
            .iter()
            .any(|candidate| candidate.to_uppercase() == word)
}

/// Trim leading non-name words from a capitalised run; keep it when at least one word
/// remains after a cue, or two words remain for a bare run.
fn push_name_run(text: &str, start: usize, end: usize, cued: bool, out: &mut Vec<Detection>) {
    let words: Vec<_> = NAME_WORDS
        .find_iter(&text[start..end])
        .map(|word| (start + word.start(), start + word.end()))
        .collect();
    let first_name = words
        .iter()
        .position(|(s, e)| !NON_NAME_WORDS.contains(&&text[*s..*e]));
    let Some(first_name) = first_name else {
        return;
    };
    let remaining = &words[first_name..];
    if remaining.len() >= 2 || (cued && first_name == 0) {
        push(out, remaining[0].0, end, PiiCategory::Person);
    }
}

fn has_cue_before(text: &str, start: usize, cues: &[&str]) -> bool {
    let window: String = text[..start]
        .chars()
        .rev()
        .take(CUE_WINDOW_CHARS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<String>()
        .to_lowercase();
    cues.iter().any(|cue| window.contains(cue))
}

fn digits_of(value: &str) -> Vec<u32> {
    value.chars().filter_map(|c| c.to_digit(10)).collect()
}

fn pesel_valid(digits: &[u32]) -> bool {
    const WEIGHTS: [u32; 10] = [1, 3, 7, 9, 1, 3, 7, 9, 1, 3];
    if digits.len() != 11 {
        return false;
    }
    let sum: u32 = digits.iter().zip(WEIGHTS).map(|(d, w)| d * w).sum();
    (10 - sum % 10) % 10 == digits[10]
}

fn nip_valid(digits: &[u32]) -> bool {
    const WEIGHTS: [u32; 9] = [6, 5, 7, 2, 3, 4, 5, 6, 7];
    if digits.len() != 10 {
        return false;
    }
    let sum: u32 = digits.iter().zip(WEIGHTS).map(|(d, w)| d * w).sum();
    let control = sum % 11;
    control != 10 && control == digits[9]
}

fn luhn_valid(digits: &[u32]) -> bool {
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(idx, digit)| {
            if idx % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                *digit
            }
        })
        .sum();
    sum % 10 == 0
}
