//! Bounded cache of calibrated smile sections keyed by expiry time.
//!
//! Smile calibration is the expensive step of a surface query, so sections
//! are cached per expiry. Keys are the exact bit pattern of the expiry time:
//! repeated queries for the same `t` hit, nearby times do not. Eviction is a
//! full flush once the cache grows past its capacity, which keeps the policy
//! trivial and is harmless in practice because pricing loops revisit a small
//! set of expiries.

use std::collections::HashMap;
use std::sync::Arc;

use crate::smile::FxSmile;

/// Default capacity before a flush.
pub const DEFAULT_MAX_SMILES: usize = 100;

#[derive(Debug)]
pub(crate) struct SmileCache {
    max_size: usize,
    smiles: HashMap<u64, Arc<FxSmile>>,
}

impl SmileCache {
    pub fn new(max_size: usize) -> Self {
        SmileCache {
            max_size: max_size.max(1),
            smiles: HashMap::new(),
        }
    }

    /// Cached section for exactly this expiry time, if present.
    pub fn fetch(&self, t: f64) -> Option<Arc<FxSmile>> {
        self.smiles.get(&t.to_bits()).cloned()
    }

    /// Insert a section, flushing everything first if the cache is full.
    pub fn insert(&mut self, t: f64, smile: Arc<FxSmile>) {
        if self.smiles.len() >= self.max_size && !self.smiles.contains_key(&t.to_bits()) {
            self.smiles.clear();
        }
        self.smiles.insert(t.to_bits(), smile);
    }

    /// Drop all cached sections, e.g. after a market-data update.
    pub fn clear(&mut self) {
        self.smiles.clear();
    }

    pub fn len(&self) -> usize {
        self.smiles.len()
    }
}
