use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Sparse query vector with strictly increasing indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    /// Term identifiers.
    pub indices: Vec<u32>,
    /// Weight for each identifier.
    pub values: Vec<f32>,
}

impl SparseVector {
    /// Whether no term survived tokenisation.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Hashed term-frequency encoder matching the `text-sparse` index.
///
/// Tokens are lowercased alphanumeric runs of at least two characters. Each token maps to the
/// first four bytes of its SHA-256 digest and is weighted `1 + ln(tf)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SparseEncoder;

impl SparseEncoder {
    /// Encode `text` into a sparse vector.
    pub fn encode(&self, text: &str) -> SparseVector {
        let mut counts: BTreeMap<u32, u32> = BTreeMap::new();
        for token in tokenize(text) {
            *counts.entry(token_hash(&token)).or_default() += 1;
        }

        let mut vector = SparseVector::default();
        for (index, count) in counts {
            vector.indices.push(index);
            vector.values.push(1.0 + (count as f32).ln());
        }
        vector
    }
}

pub(crate) fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= 2)
        .map(str::to_lowercase)
}

pub(crate) fn token_hash(token: &str) -> u32 {
    let digest = Sha256::digest(token.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_terms_get_log_weight() {
        let vector = SparseEncoder.encode("Lithium lithium LITHIUM");
        assert_eq!(vector.indices.len(), 1);
        assert!((vector.values[0] - (1.0 + 3f32.ln())).abs() < 1e-6);
    }

    #[test]
    fn indices_are_sorted_and_unique() {
        let vector = SparseEncoder.encode("blood pressure, pressure of blood; heart rate");
        assert!(vector.indices.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(vector.indices.len(), vector.values.len());
    }

    #[test]
    fn short_tokens_and_punctuation_are_dropped() {
        assert!(SparseEncoder.encode("a , . ? !").is_empty());
        assert_eq!(
            tokenize("Zażółć x gęślą").collect::<Vec<_>>(),
            vec!["zażółć", "gęślą"]
        );
    }
}
