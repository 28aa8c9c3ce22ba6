//! Per-table queue of configuration deltas.

use std::collections::{BTreeMap, VecDeque};

/// Operation carried by a config-table delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Set,
    Del,
}

impl Operation {
    pub fn is_set(&self) -> bool {
        matches!(self, Operation::Set)
    }

    pub fn is_del(&self) -> bool {
        matches!(self, Operation::Del)
    }
}

/// A field-value pair from a table entry.
pub type FieldValue = (String, String);

/// Key, operation and field-values of one table delta.
#[derive(Debug, Clone)]
pub struct KeyOpFieldsValues {
    pub key: String,
    pub op: Operation,
    /// Field-value pairs; empty for Del.
    pub fvs: Vec<FieldValue>,
}

impl KeyOpFieldsValues {
    pub fn new(key: impl Into<String>, op: Operation, fvs: Vec<FieldValue>) -> Self {
        Self {
            key: key.into(),
            op,
            fvs,
        }
    }

    pub fn set(key: impl Into<String>, fvs: Vec<FieldValue>) -> Self {
        Self::new(key, Operation::Set, fvs)
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self::new(key, Operation::Del, vec![])
    }

    /// Returns the value of a field, if present.
    pub fn get_field(&self, field: &str) -> Option<&str> {
        self.fvs
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }
}

/// Configuration for a [`Consumer`].
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Table name (e.g. "FG_NHG", "FG_NHG_MEMBER").
    pub table_name: String,
    /// Priority; lower runs first.
    pub priority: i32,
}

impl ConsumerConfig {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Queue of pending deltas for one table.
///
/// Deltas for the same key are coalesced before processing:
/// consecutive SETs merge field-by-field (newer values win), a DEL discards
/// any queued SETs for the key, and DEL-then-SET keeps both in order.
/// Entries that fail transiently go back to the front via [`Consumer::retry`]
/// so the next pass sees them first.
pub struct Consumer {
    config: ConsumerConfig,
    /// Pending deltas indexed by key, each key keeping arrival order.
    to_sync: BTreeMap<String, VecDeque<KeyOpFieldsValues>>,
    pending_count: usize,
}

impl Consumer {
    pub fn new(config: ConsumerConfig) -> Self {
        Self {
            config,
            to_sync: BTreeMap::new(),
            pending_count: 0,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.config.table_name
    }

    pub fn priority(&self) -> i32 {
        self.config.priority
    }

    pub fn has_pending(&self) -> bool {
        self.pending_count > 0
    }

    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    /// Queues deltas, applying the per-key coalescing rules.
    pub fn add_to_sync(&mut self, entries: Vec<KeyOpFieldsValues>) {
        for entry in entries {
            self.add_single_entry(entry);
        }
    }

    fn add_single_entry(&mut self, entry: KeyOpFieldsValues) {
        let queue = self.to_sync.entry(entry.key.clone()).or_default();

        match entry.op {
            Operation::Del => {
                if !queue.is_empty() {
                    self.pending_count -= queue.len();
                    queue.clear();
                }
                queue.push_back(entry);
                self.pending_count += 1;
            }
            Operation::Set => {
                if let Some(last) = queue.back_mut() {
                    if last.op == Operation::Set {
                        for (field, value) in entry.fvs {
                            if let Some(existing) =
                                last.fvs.iter_mut().find(|(f, _)| *f == field)
                            {
                                existing.1 = value;
                            } else {
                                last.fvs.push((field, value));
                            }
                        }
                        return;
                    }
                }
                queue.push_back(entry);
                self.pending_count += 1;
            }
        }
    }

    /// Removes and returns all pending deltas, key order then arrival order.
    pub fn drain(&mut self) -> Vec<KeyOpFieldsValues> {
        let mut result = Vec::with_capacity(self.pending_count);

        for (_key, mut queue) in std::mem::take(&mut self.to_sync) {
            while let Some(entry) = queue.pop_front() {
                result.push(entry);
            }
        }

        self.pending_count = 0;
        result
    }

    /// Re-queues an entry that failed transiently.
    pub fn retry(&mut self, entry: KeyOpFieldsValues) {
        let queue = self.to_sync.entry(entry.key.clone()).or_default();
        queue.push_front(entry);
        self.pending_count += 1;
    }

    /// Iterates pending entries without removing them.
    pub fn peek(&self) -> impl Iterator<Item = &KeyOpFieldsValues> {
        self.to_sync.values().flat_map(|q| q.iter())
    }

    /// Human-readable dump of pending entries.
    pub fn dump(&self) -> Vec<String> {
        self.to_sync
            .iter()
            .flat_map(|(key, queue)| {
                queue.iter().map(move |e| {
                    format!(
                        "{}: {} {:?}",
                        key,
                        if e.op.is_set() { "SET" } else { "DEL" },
                        e.fvs
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_lookup() {
        let entry = KeyOpFieldsValues::set(
            "fgnhg_v4",
            vec![("bucket_size".to_string(), "120".to_string())],
        );

        assert_eq!(entry.get_field("bucket_size"), Some("120"));
        assert_eq!(entry.get_field("match_mode"), None);
    }

    #[test]
    fn test_set_merge_same_key() {
        let mut consumer = Consumer::new(ConsumerConfig::new("FG_NHG"));

        consumer.add_to_sync(vec![KeyOpFieldsValues::set(
            "fgnhg_v4",
            vec![("bucket_size".to_string(), "120".to_string())],
        )]);
        consumer.add_to_sync(vec![KeyOpFieldsValues::set(
            "fgnhg_v4",
            vec![
                ("bucket_size".to_string(), "240".to_string()),
                ("match_mode".to_string(), "nexthop-based".to_string()),
            ],
        )]);

        assert_eq!(consumer.pending_count(), 1);

        let entries = consumer.drain();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].get_field("bucket_size"), Some("240"));
        assert_eq!(entries[0].get_field("match_mode"), Some("nexthop-based"));
    }

    #[test]
    fn test_del_clears_pending_set() {
        let mut consumer = Consumer::new(ConsumerConfig::new("FG_NHG"));

        consumer.add_to_sync(vec![KeyOpFieldsValues::set(
            "fgnhg_v4",
            vec![("bucket_size".to_string(), "120".to_string())],
        )]);
        consumer.add_to_sync(vec![KeyOpFieldsValues::del("fgnhg_v4")]);

        let entries = consumer.drain();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].op.is_del());
    }

    #[test]
    fn test_del_then_set_keeps_order() {
        let mut consumer = Consumer::new(ConsumerConfig::new("FG_NHG"));

        consumer.add_to_sync(vec![KeyOpFieldsValues::del("fgnhg_v4")]);
        consumer.add_to_sync(vec![KeyOpFieldsValues::set(
            "fgnhg_v4",
            vec![("bucket_size".to_string(), "120".to_string())],
        )]);

        let entries = consumer.drain();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].op.is_del());
        assert!(entries[1].op.is_set());
    }

    #[test]
    fn test_retry_goes_to_front() {
        let mut consumer = Consumer::new(ConsumerConfig::new("FG_NHG_MEMBER"));

        consumer.add_to_sync(vec![KeyOpFieldsValues::del("10.0.0.1")]);
        consumer.retry(KeyOpFieldsValues::set(
            "10.0.0.1",
            vec![("FG_NHG".to_string(), "fgnhg_v4".to_string())],
        ));

        let entries = consumer.drain();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].op.is_set());
    }
}
