//! PII masking gate.
//!
//! Every piece of user or document text passes through [`PiiGate::mask`] (or
//! [`PiiGate::mask_into`] for job-scoped masking) before it is sent to a language model.
//! Detected spans are replaced by `<CATEGORY_n>` placeholders and the originals are kept in an
//! [`EntityMap`] that lives only as long as its owner (one call, or one job). The gate fails
//! closed: malformed input is rejected with a [`PiiError`] instead of being forwarded.

mod category;
mod recognizers;

pub use category::PiiCategory;

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// Inputs longer than this are rejected unless the gate is built with a different limit.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 200_000;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    let tags: Vec<&str> = PiiCategory::ALL.iter().map(|c| c.tag()).collect();
    Regex::new(&format!(r"<({})_(\d+)>", tags.join("|"))).expect("placeholder pattern")
});

/// Reasons the gate refuses to produce masked output.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PiiError {
    /// Input exceeds the configured size limit.
    #[error("input of {len} characters exceeds the {max} character limit")]
    InputTooLarge {
        /// Character count of the rejected input.
        len: usize,
        /// Configured limit.
        max: usize,
    },
    /// Input contains a control character that could hide content from the recognisers.
    #[error("input contains a control character at byte {position}")]
    ControlCharacter {
        /// Byte offset of the offending character.
        position: usize,
    },
    /// Input already contains a placeholder token, which would make restoration ambiguous.
    #[error("input already contains placeholder token {0}")]
    PlaceholderCollision(String),
    /// A detected value survived masking.
    #[error("masked output still contains a {0} value")]
    ResidualEntity(PiiCategory),
}

/// One masked value.
#[derive(Clone, PartialEq, Eq)]
pub struct Entity {
    /// Placeholder inserted into the masked text.
    pub placeholder: String,
    /// Original sensitive span.
    pub original: String,
    /// Category that detected the span.
    pub category: PiiCategory,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("placeholder", &self.placeholder)
            .field("original", &"<redacted>")
            .field("category", &self.category)
            .finish()
    }
}

/// Placeholder to original mapping produced by masking.
///
/// The same original value within one map always receives the same placeholder. Maps are
/// never shared between jobs and are not serialisable, so they cannot be persisted by accident.
#[derive(Clone, Default)]
pub struct EntityMap {
    entities: Vec<Entity>,
    by_placeholder: HashMap<String, usize>,
    by_value: HashMap<(PiiCategory, String), usize>,
    counters: HashMap<PiiCategory, u32>,
}

impl EntityMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct masked values.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether nothing has been masked.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Look up the entity behind a placeholder.
    pub fn get(&self, placeholder: &str) -> Option<&Entity> {
        self.by_placeholder
            .get(placeholder)
            .map(|idx| &self.entities[*idx])
    }

    /// Iterate entities in the order they were first masked.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    /// Count of masked values per category, for logging without leaking values.
    pub fn category_counts(&self) -> Vec<(PiiCategory, usize)> {
        let mut counts: Vec<(PiiCategory, usize)> = Vec::new();
        for entity in &self.entities {
            match counts.iter_mut().find(|(c, _)| *c == entity.category) {
                Some((_, count)) => *count += 1,
                None => counts.push((entity.category, 1)),
            }
        }
        counts.sort();
        counts
    }

    fn placeholder_for(&mut self, category: PiiCategory, original: &str) -> &str {
        let key = (category, original.to_string());
        let idx = match self.by_value.get(&key) {
            Some(idx) => *idx,
            None => {
                let counter = self.counters.entry(category).or_insert(0);
                *counter += 1;
                let placeholder = format!("<{}_{}>", category.tag(), counter);
                let idx = self.entities.len();
                self.entities.push(Entity {
                    placeholder: placeholder.clone(),
                    original: original.to_string(),
                    category,
                });
                self.by_placeholder.insert(placeholder, idx);
                self.by_value.insert(key, idx);
                idx
            }
        };
        &self.entities[idx].placeholder
    }
}

impl fmt::Debug for EntityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMap")
            .field("entities", &self.entities)
            .finish_non_exhaustive()
    }
}

/// Stateless masking gate configured with the categories it recognises.
#[derive(Debug, Clone)]
pub struct PiiGate {
    categories: Vec<PiiCategory>,
    max_input_chars: usize,
}

impl Default for PiiGate {
    fn default() -> Self {
        Self::new(PiiCategory::ALL.to_vec())
    }
}

impl PiiGate {
    /// Build a gate recognising `categories`.
    pub fn new(categories: Vec<PiiCategory>) -> Self {
        Self {
            categories,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }

    /// Override the maximum accepted input size.
    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    /// Categories this gate detects.
    pub fn categories(&self) -> &[PiiCategory] {
        &self.categories
    }

    /// Mask `text` with a fresh entity map scoped to this call.
    pub fn mask(&self, text: &str) -> Result<(String, EntityMap), PiiError> {
        let mut map = EntityMap::new();
        let masked = self.mask_into(text, &mut map)?;
        Ok((masked, map))
    }

    /// Mask `text`, extending `map` so that values already seen by the map's owner keep their
    /// placeholders. On error `map` is left unchanged.
    pub fn mask_into(&self, text: &str, map: &mut EntityMap) -> Result<String, PiiError> {
        self.validate(text)?;

        let mut detections = recognizers::detect(text, &self.categories);
        let known: Vec<(PiiCategory, &str)> = detections
            .iter()
            .map(|d| (d.category, &text[d.start..d.end]))
            .chain(map.iter().map(|e| (e.category, e.original.as_str())))
            .collect();
        detections = recognizers::cover_known_values(text, detections, &known);
        if detections.is_empty() {
            return Ok(text.to_string());
        }

        let mut scratch = map.clone();
        let mut masked = String::with_capacity(text.len());
        let mut cursor = 0;
        for detection in &detections {
            masked.push_str(&text[cursor..detection.start]);
            let original = &text[detection.start..detection.end];
            masked.push_str(scratch.placeholder_for(detection.category, original));
            cursor = detection.end;
        }
        masked.push_str(&text[cursor..]);

        for detection in &detections {
            if recognizers::contains_word(&masked, &text[detection.start..detection.end]) {
                return Err(PiiError::ResidualEntity(detection.category));
            }
        }

        *map = scratch;
        tracing::debug!(
            detections = detections.len(),
            entities = map.len(),
            "Masked sensitive spans"
        );
        Ok(masked)
    }

    /// Restore placeholders in `text` from `map`. Placeholders unknown to the map are left as is.
    ///
    /// Callers must only restore text that stays inside the trust boundary.
    pub fn unmask(text: &str, map: &EntityMap) -> String {
        if map.is_empty() {
            return text.to_string();
        }
        PLACEHOLDER
            .replace_all(text, |captures: &regex::Captures<'_>| {
                let token = &captures[0];
                map.get(token)
                    .map(|entity| entity.original.clone())
                    .unwrap_or_else(|| token.to_string())
            })
            .into_owned()
    }

    fn validate(&self, text: &str) -> Result<(), PiiError> {
        let len = text.chars().count();
        if len > self.max_input_chars {
            return Err(PiiError::InputTooLarge {
                len,
                max: self.max_input_chars,
            });
        }
        if let Some((position, _)) = text
            .char_indices()
            .find(|(_, c)| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        {
            return Err(PiiError::ControlCharacter { position });
        }
        if let Some(found) = PLACEHOLDER.find(text) {
            return Err(PiiError::PlaceholderCollision(found.as_str().to_string()));
        }
        Ok(())
    }
}
