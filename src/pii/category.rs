//! Entity categories recognised by the masking gate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sensitive entity category. The tag of each category is the stem of its placeholder
/// (`<TAG_n>`); adding a category never changes that format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiiCategory {
    /// Personal names.
    Person,
    /// Phone numbers in national or international notation.
    PhoneNumber,
    /// E-mail addresses.
    #[serde(rename = "EMAIL_ADDRESS")]
    Email,
    /// National identifiers (PESEL-style numbers, SSN notation).
    NationalId,
    /// Tax identifiers (NIP-style numbers).
    TaxId,
    /// Payment card numbers.
    CreditCard,
    /// Dates introduced by a birth cue.
    DateOfBirth,
}

impl PiiCategory {
    /// Every category, in detection priority order.
    pub const ALL: [PiiCategory; 7] = [
        PiiCategory::Email,
        PiiCategory::CreditCard,
        PiiCategory::NationalId,
        PiiCategory::TaxId,
        PiiCategory::DateOfBirth,
        PiiCategory::PhoneNumber,
        PiiCategory::Person,
    ];

    /// Placeholder stem for this category.
    pub const fn tag(self) -> &'static str {
        match self {
            PiiCategory::Person => "PERSON",
            PiiCategory::PhoneNumber => "PHONE_NUMBER",
            PiiCategory::Email => "EMAIL_ADDRESS",
            PiiCategory::NationalId => "NATIONAL_ID",
            PiiCategory::TaxId => "TAX_ID",
            PiiCategory::CreditCard => "CREDIT_CARD",
            PiiCategory::DateOfBirth => "DATE_OF_BIRTH",
        }
    }

    /// Lower value wins when two detections cover the same span.
    pub(crate) fn priority(self) -> usize {
        Self::ALL
            .iter()
            .position(|candidate| *candidate == self)
            .unwrap_or(Self::ALL.len())
    }

    /// Resolve a placeholder stem back to its category.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.tag() == tag)
    }
}

impl fmt::Display for PiiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for PiiCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        if let Some(category) = Self::from_tag(&normalized) {
            return Ok(category);
        }
        match normalized.as_str() {
            "NAME" => Ok(Self::Person),
            "PHONE" => Ok(Self::PhoneNumber),
            "EMAIL" => Ok(Self::Email),
            "PESEL" | "SSN" => Ok(Self::NationalId),
            "NIP" => Ok(Self::TaxId),
            "CARD" => Ok(Self::CreditCard),
            "DOB" => Ok(Self::DateOfBirth),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_from_tag() {
        for category in PiiCategory::ALL {
            assert_eq!(PiiCategory::from_tag(category.tag()), Some(category));
        }
        assert_eq!(PiiCategory::from_tag("person"), None);
    }

    #[test]
    fn parses_aliases() {
        assert_eq!("pesel".parse(), Ok(PiiCategory::NationalId));
        assert_eq!("Phone".parse(), Ok(PiiCategory::PhoneNumber));
        assert_eq!("DATE_OF_BIRTH".parse(), Ok(PiiCategory::DateOfBirth));
        assert!("address".parse::<PiiCategory>().is_err());
    }
}
