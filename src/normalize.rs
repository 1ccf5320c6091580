//! # Key Normalizer
//!
//! Flattens keys into ids that are safe for the exchange encodings, and
//! reconciles alternate spellings of the same logical task.
//!
//! ## Limitations
//!
//! - **Name-only equality**: [`ReconcileTable::reconcile`] treats two keys as
//!   the same logical task when their leading name components match. Two
//!   partitions of one operation (`('inc-x', 0)` and `('inc-x', 1)`) pass
//!   that check, so a caller that reconciles them over-unifies.

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use tracing::warn;

use crate::model::Key;
use crate::Error;

/// Flattens a key into an id: drops parentheses and quotes, and collapses
/// every run of commas and whitespace into a single `_`.
pub fn normalize(key: &Key) -> String {
    normalize_str(&key.to_string())
}

pub fn normalize_str(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_separator = false;
    for c in raw.chars() {
        match c {
            '(' | ')' | '\'' | '"' => {}
            ',' => in_separator = true,
            c if c.is_whitespace() => in_separator = true,
            c => {
                if in_separator && !out.is_empty() {
                    out.push('_');
                }
                in_separator = false;
                out.push(c);
            }
        }
    }
    out
}

// ============================================================================
// KeyNormalizer
// ============================================================================

/// Normalizes keys and remembers which key claimed each id, so two distinct
/// keys flattening to one id are reported instead of merged.
#[derive(Debug, Default)]
pub struct KeyNormalizer {
    owners: HashMap<String, Key>,
    collisions: Vec<Error>,
}

impl KeyNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `key`. On collision the id is still returned (it belongs to the
    /// first key) and the collision is logged and recorded.
    pub fn id(&mut self, key: &Key) -> String {
        let id = normalize(key);
        match self.owners.entry(id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(key.clone());
            }
            Entry::Occupied(slot) if slot.get() != key => {
                let err = Error::KeyCollision {
                    id: id.clone(),
                    first: slot.get().to_string(),
                    second: key.to_string(),
                };
                warn!(%err, "provenance of two tasks will share one node");
                self.collisions.push(err);
            }
            Entry::Occupied(_) => {}
        }
        id
    }

    /// Key that first claimed `id`.
    pub fn owner(&self, id: &str) -> Option<&Key> {
        self.owners.get(id)
    }

    pub fn collisions(&self) -> &[Error] {
        &self.collisions
    }
}

// ============================================================================
// ReconcileTable
// ============================================================================

/// Monotonic map from observed key spellings to their canonical key.
#[derive(Debug, Default, Clone)]
pub struct ReconcileTable {
    aliases: HashMap<Key, Key>,
}

impl ReconcileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `observed` denotes `canonical`. Refused when the leading
    /// names differ, when both keys are equal, or when `observed` already has
    /// an association.
    pub fn reconcile(&mut self, observed: &Key, canonical: &Key) -> bool {
        if observed == canonical || observed.name() != canonical.name() {
            return false;
        }
        // never chain onto ourselves through an earlier association
        if self.canonical(canonical) == observed {
            return false;
        }
        match self.aliases.entry(observed.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(canonical.clone());
                true
            }
            Entry::Occupied(slot) => {
                if slot.get() != canonical {
                    warn!(
                        observed = %observed,
                        kept = %slot.get(),
                        refused = %canonical,
                        "key already reconciled"
                    );
                }
                false
            }
        }
    }

    /// Canonical spelling of `key`; unknown keys map to themselves.
    pub fn canonical<'a>(&'a self, key: &'a Key) -> &'a Key {
        self.aliases.get(key).unwrap_or(key)
    }

    pub fn len(&self) -> usize { self.aliases.len() }
    pub fn is_empty(&self) -> bool { self.aliases.is_empty() }
}
