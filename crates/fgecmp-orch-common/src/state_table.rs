//! Warm-restart checkpoint table.
//!
//! The controller checkpoints every programmed bucket as a
//! `(bucket index, next-hop key)` field-value pair under the prefix's key.
//! On restart the recoverer reads each row back, rebuilds the pre-restart
//! bucket layout, then deletes the row; materialisation rewrites it.
//!
//! The backing store is abstract: production binds this to the persistent
//! state database, tests use [`InMemoryWarmRestartTable`].

use crate::consumer::FieldValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Typed map interface over one state-database table.
pub trait WarmRestartTable: Send + Sync {
    /// Returns the field-value pairs stored under `key`, if any.
    fn get(&self, key: &str) -> Option<Vec<FieldValue>>;

    /// Replaces the row under `key`.
    fn set(&self, key: &str, fvs: Vec<FieldValue>);

    /// Deletes the row under `key`. Deleting a missing row is a no-op.
    fn del(&self, key: &str);

    /// Returns all row keys.
    fn keys(&self) -> Vec<String>;
}

/// In-memory table, shared by clone.
///
/// Clones observe each other's writes, which lets a test hold one handle
/// while the controller holds another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWarmRestartTable {
    rows: Arc<Mutex<HashMap<String, Vec<FieldValue>>>>,
}

impl InMemoryWarmRestartTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().unwrap().is_empty()
    }
}

impl WarmRestartTable for InMemoryWarmRestartTable {
    fn get(&self, key: &str) -> Option<Vec<FieldValue>> {
        self.rows.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, fvs: Vec<FieldValue>) {
        self.rows.lock().unwrap().insert(key.to_string(), fvs);
    }

    fn del(&self, key: &str) {
        self.rows.lock().unwrap().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.rows.lock().unwrap().keys().cloned().collect()
    }
}
