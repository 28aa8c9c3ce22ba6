//! Warm-restart recovery of checkpointed bucket layouts.

use fgecmp_orch_common::WarmRestartTable;
use log::{info, warn};
use std::collections::HashMap;

/// Bucket layouts checkpointed before the previous shutdown.
///
/// Loaded once at startup from the state route table; each row becomes a
/// bucket-indexed vector of next-hop strings and the row is deleted (it is
/// rewritten during materialisation). An entry is consumed the first time
/// its prefix materialises; a prefix removed and re-added later follows
/// the normal assignment path.
#[derive(Debug, Default)]
pub struct RecoveryMap {
    entries: HashMap<String, Vec<String>>,
}

impl RecoveryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every checkpoint row, indexes it by bucket, and clears it.
    pub fn load(&mut self, table: &dyn WarmRestartTable) {
        let keys = table.keys();
        info!("Warm restart: recovering {} prefix entries from state", keys.len());

        for key in keys {
            let Some(row) = table.get(&key) else {
                continue;
            };

            let mut buckets = vec![String::new(); row.len()];
            for (field, value) in row {
                match field.parse::<usize>() {
                    Ok(index) if index < buckets.len() => buckets[index] = value,
                    _ => {
                        warn!(
                            "Warm restart: discarding malformed bucket field {} for {}",
                            field, key
                        );
                    }
                }
            }

            self.entries.insert(key.clone(), buckets);
            table.del(&key);
        }
    }

    /// The recovered layout for a prefix, if one is pending.
    pub fn get(&self, prefix: &str) -> Option<&Vec<String>> {
        self.entries.get(prefix)
    }

    /// Consumes a prefix's recovered layout after successful use.
    pub fn remove(&mut self, prefix: &str) {
        self.entries.remove(prefix);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
