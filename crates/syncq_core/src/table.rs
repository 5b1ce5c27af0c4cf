//! Journaled key/value tables.
//!
//! A [`Table`] keeps its rows in a `BTreeMap` and mirrors every change to a
//! [`Journal`] as a CBOR record. Opening a table replays the journal; a torn
//! record at the tail (a crash mid-append) is discarded.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use syncq_storage::{Durability, InMemoryBackend, Journal, StorageBackend};

#[derive(Deserialize)]
enum Record<K, V> {
    Put(K, V),
    Delete(K),
}

#[derive(Serialize)]
enum RecordRef<'a, K, V> {
    Put(&'a K, &'a V),
    Delete(&'a K),
}

/// An ordered table persisted through an append-only journal.
///
/// Writes go to the journal first and are applied in memory only after the
/// journal append succeeded, so a failed write leaves the table unchanged.
pub struct Table<K, V> {
    rows: BTreeMap<K, V>,
    journal: Journal<Box<dyn StorageBackend>>,
    high_water: Option<K>,
}

impl<K, V> Table<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    /// Opens a table by replaying the journal held by `backend`. Every
    /// write is synced to the device before it is applied.
    pub fn open(backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        Self::open_with_durability(backend, Durability::Sync)
    }

    /// Opens a table whose writes are pushed only as far as `durability`.
    pub fn open_with_durability(
        backend: Box<dyn StorageBackend>,
        durability: Durability,
    ) -> CoreResult<Self> {
        let mut journal = Journal::with_durability(backend, durability);
        let records = journal.recover()?;

        let mut rows = BTreeMap::new();
        let mut high_water: Option<K> = None;
        for bytes in records {
            let record: Record<K, V> =
                ciborium::from_reader(bytes.as_slice()).map_err(CoreError::codec)?;
            let key = match record {
                Record::Put(key, value) => {
                    rows.insert(key.clone(), value);
                    key
                }
                Record::Delete(key) => {
                    rows.remove(&key);
                    key
                }
            };
            if high_water.as_ref().map_or(true, |hw| key > *hw) {
                high_water = Some(key);
            }
        }

        Ok(Self {
            rows,
            journal,
            high_water,
        })
    }

    /// Creates an empty table that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            rows: BTreeMap::new(),
            journal: Journal::new(Box::new(InMemoryBackend::new())),
            high_water: None,
        }
    }

    /// Returns the row for `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.rows.get(key)
    }

    /// Returns true if a row exists for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.rows.contains_key(key)
    }

    /// Inserts or replaces a row, returning the previous value.
    pub fn put(&mut self, key: K, value: V) -> CoreResult<Option<V>> {
        self.log(&RecordRef::Put(&key, &value))?;
        self.bump(&key);
        Ok(self.rows.insert(key, value))
    }

    /// Removes a row, returning it if it existed.
    pub fn delete(&mut self, key: &K) -> CoreResult<Option<V>> {
        if !self.rows.contains_key(key) {
            return Ok(None);
        }
        self.log(&RecordRef::<K, V>::Delete(key))?;
        Ok(self.rows.remove(key))
    }

    /// Iterates rows in key order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&K, &V)> {
        self.rows.iter()
    }

    /// Iterates values in key order.
    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> {
        self.rows.values()
    }

    /// Number of live rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The largest key ever written, including deleted ones.
    pub fn max_key_seen(&self) -> Option<&K> {
        self.high_water.as_ref()
    }

    /// Journal size in bytes.
    pub fn journal_size(&self) -> CoreResult<u64> {
        Ok(self.journal.size()?)
    }

    /// Rewrites the journal so it holds only live rows.
    ///
    /// The rewrite is atomic: if it fails, the journal still holds the full
    /// history and the table is unchanged.
    ///
    /// If the largest key ever seen is no longer live, a delete record for it
    /// is kept so [`max_key_seen`](Self::max_key_seen) survives a reopen.
    pub fn compact(&mut self) -> CoreResult<()> {
        let mut payloads = Vec::with_capacity(self.rows.len() + 1);
        if let Some(hw) = &self.high_water {
            if !self.rows.contains_key(hw) {
                payloads.push(encode(&RecordRef::<K, V>::Delete(hw))?);
            }
        }
        for (key, value) in &self.rows {
            payloads.push(encode(&RecordRef::Put(key, value))?);
        }
        self.journal.rewrite(payloads.iter().map(Vec::as_slice))?;
        Ok(())
    }

    fn log(&mut self, record: &RecordRef<'_, K, V>) -> CoreResult<()> {
        let bytes = encode(record)?;
        self.journal.append(&bytes)?;
        Ok(())
    }

    fn bump(&mut self, key: &K) {
        if self.high_water.as_ref().map_or(true, |hw| key > hw) {
            self.high_water = Some(key.clone());
        }
    }
}

fn encode<K: Serialize, V: Serialize>(record: &RecordRef<'_, K, V>) -> CoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(record, &mut bytes).map_err(CoreError::codec)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reopen(backend: &InMemoryBackend) -> Table<u64, String> {
        Table::open(Box::new(backend.clone())).unwrap()
    }

    #[test]
    fn put_get_delete() {
        let mut table: Table<u64, String> = Table::in_memory();
        assert!(table.put(1, "one".into()).unwrap().is_none());
        assert_eq!(table.put(1, "uno".into()).unwrap().as_deref(), Some("one"));
        assert_eq!(table.get(&1).map(String::as_str), Some("uno"));
        assert_eq!(table.delete(&1).unwrap().as_deref(), Some("uno"));
        assert!(table.delete(&1).unwrap().is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn rows_survive_reopen() {
        let backend = InMemoryBackend::new();
        {
            let mut table = reopen(&backend);
            table.put(1, "a".into()).unwrap();
            table.put(2, "b".into()).unwrap();
            table.delete(&1).unwrap();
        }
        let table = reopen(&backend);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&2).map(String::as_str), Some("b"));
        assert_eq!(table.max_key_seen(), Some(&2));
    }

    #[test]
    fn torn_tail_is_dropped_on_open() {
        let backend = InMemoryBackend::new();
        {
            let mut table = reopen(&backend);
            table.put(1, "a".into()).unwrap();
            table.put(2, "b".into()).unwrap();
        }
        let mut bytes = backend.data();
        bytes.truncate(bytes.len() - 3);
        let torn = InMemoryBackend::with_data(bytes);

        let table = reopen(&torn);
        assert_eq!(table.len(), 1);
        assert!(table.contains(&1));
    }

    #[test]
    fn compaction_keeps_high_water_of_deleted_keys() {
        let backend = InMemoryBackend::new();
        {
            let mut table = reopen(&backend);
            for key in 1..=5 {
                table.put(key, format!("v{key}")).unwrap();
            }
            table.delete(&5).unwrap();
            table.delete(&4).unwrap();
            let before = table.journal_size().unwrap();
            table.compact().unwrap();
            assert!(table.journal_size().unwrap() < before);
        }
        let table = reopen(&backend);
        assert_eq!(table.len(), 3);
        assert_eq!(table.max_key_seen(), Some(&5));
    }

    #[test]
    fn failed_compaction_loses_nothing() {
        let backend = InMemoryBackend::new();
        let mut table = reopen(&backend);
        for key in 1..=3 {
            table.put(key, format!("pending-{key}")).unwrap();
        }
        table.put(9, "gone".into()).unwrap();
        table.delete(&9).unwrap();

        backend.set_failing(true);
        assert!(table.compact().is_err());
        backend.set_failing(false);
        assert_eq!(table.len(), 3);

        let table = reopen(&backend);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(&2).map(String::as_str), Some("pending-2"));
        assert_eq!(table.max_key_seen(), Some(&9));
    }

    #[test]
    fn failed_write_leaves_row_out() {
        let backend = InMemoryBackend::new();
        let mut table: Table<u64, String> = Table::open_with_durability(Box::new(backend.clone()), Durability::Flush).unwrap();
        table.put(1, "kept".into()).unwrap();
        backend.set_failing(true);
        assert!(table.put(2, "dropped".into()).is_err());
        assert!(!table.contains(&2));
    }

    #[test]
    fn tuple_keys_round_trip() {
        let backend = InMemoryBackend::new();
        {
            let mut table: Table<(String, i64), i64> = Table::open(Box::new(backend.clone())).unwrap();
            table.put(("course".into(), 7), 70).unwrap();
        }
        let table: Table<(String, i64), i64> = Table::open(Box::new(backend)).unwrap();
        assert_eq!(table.get(&("course".into(), 7)), Some(&70));
    }
}
