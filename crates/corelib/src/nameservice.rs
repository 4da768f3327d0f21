//! Nameservice table mapping application ids to chunk ids.
//!
//! Open addressing with linear probing. Keys are stored as `id + 1` so that a
//! zero key marks an empty slot. The probing hash is an integer avalanche mix;
//! ring placement of an entry uses the CRC16 of the id instead (see
//! [`crate::hash`]), so the table can be partitioned between superpeers and
//! exported as a flat byte buffer.
//!
//! # Wire format
//!
//! Exported entries are 12 bytes each: the id as big-endian `i32` followed by
//! the chunk id as big-endian `u64`.

use crate::error::{Error, Result};
use crate::hash::crc16;
use crate::node::{ChunkId, NodeId};
use crate::ring::is_hash_in_superpeer_range;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

/// Size of one exported entry in bytes.
pub const ENTRY_SIZE: usize = 12;

/// Default number of slots of a fresh table.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default fill ratio that triggers a rehash.
pub const DEFAULT_LOAD_FACTOR: f32 = 0.9;

#[derive(Copy, Clone, Debug, Default)]
struct Slot {
    /// `id + 1`, zero if empty
    key: u32,
    value: u64,
}

/// Open-addressed hash table `application id -> ChunkId`.
#[derive(Debug, Clone)]
pub struct NameserviceTable {
    slots: Vec<Slot>,
    count: usize,
    threshold: usize,
    load_factor: f32,
}

impl Default for NameserviceTable {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_LOAD_FACTOR)
    }
}

impl NameserviceTable {
    /// Create a table with `capacity` slots.
    ///
    /// # Arguments
    /// * `capacity` - Initial number of slots (at least 1)
    /// * `load_factor` - Fill ratio at which the table grows to `2 * capacity + 1`;
    ///   non-finite or non-positive values fall back to [`DEFAULT_LOAD_FACTOR`]
    pub fn new(capacity: usize, load_factor: f32) -> Self {
        let capacity = capacity.max(1);
        let load_factor = if load_factor.is_finite() && load_factor > 0.0 {
            load_factor
        } else {
            DEFAULT_LOAD_FACTOR
        };
        Self {
            slots: vec![Slot::default(); capacity],
            count: 0,
            threshold: Self::threshold_for(capacity, load_factor),
            load_factor,
        }
    }

    /// Keep at least one empty slot so probe sequences terminate, and grow
    /// no earlier than after the first insert.
    fn threshold_for(capacity: usize, load_factor: f32) -> usize {
        ((capacity as f64 * load_factor as f64) as usize).min(capacity - 1).max(1)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Avalanche mix on the internal key, computed with 32-bit signed wrapping arithmetic.
    fn hash(key: u32) -> i32 {
        let mut h = key as i32;
        h = ((h >> 16) ^ h).wrapping_mul(0x45d9f3b);
        h = ((h >> 16) ^ h).wrapping_mul(0x45d9f3b);
        (h >> 16) ^ h
    }

    #[inline]
    fn home(&self, key: u32) -> usize {
        (Self::hash(key) & 0x7FFF_FFFF) as usize % self.slots.len()
    }

    #[inline]
    fn internal_key(id: i32) -> Option<u32> {
        if id < 0 {
            None
        } else {
            Some(id as u32 + 1)
        }
    }

    /// Index of `key` or of the empty slot ending its probe sequence.
    fn probe(&self, key: u32) -> (usize, bool) {
        let mut index = self.home(key);
        loop {
            let slot = self.slots[index];
            if slot.key == 0 {
                return (index, false);
            }
            if slot.key == key {
                return (index, true);
            }
            index = (index + 1) % self.slots.len();
        }
    }

    /// Chunk id registered for `id`.
    pub fn get(&self, id: i32) -> Option<ChunkId> {
        let key = Self::internal_key(id)?;
        match self.probe(key) {
            (index, true) => Some(ChunkId(self.slots[index].value)),
            _ => None,
        }
    }

    /// Insert or update an entry.
    ///
    /// # Returns
    /// The previous chunk id for `id`, if any
    ///
    /// # Errors
    /// `InvalidNameserviceId` for negative ids
    pub fn put(&mut self, id: i32, chunk_id: ChunkId) -> Result<Option<ChunkId>> {
        let key = Self::internal_key(id).ok_or(Error::InvalidNameserviceId(id as i64))?;
        let (index, found) = self.probe(key);
        let old = if found {
            Some(ChunkId(self.slots[index].value))
        } else {
            self.count += 1;
            None
        };
        self.slots[index] = Slot {
            key,
            value: chunk_id.0,
        };
        if self.count >= self.threshold {
            self.rehash();
        }
        Ok(old)
    }

    fn rehash(&mut self) {
        let capacity = self.slots.len() * 2 + 1;
        trace!(from = self.slots.len(), to = capacity, "rehashing nameservice table");
        let old = std::mem::replace(&mut self.slots, vec![Slot::default(); capacity]);
        self.threshold = Self::threshold_for(capacity, self.load_factor);
        for slot in old.into_iter().filter(|s| s.key != 0) {
            self.place(slot);
        }
    }

    /// Put a slot into the first free position of its probe sequence.
    fn place(&mut self, slot: Slot) {
        let (index, _) = self.probe(slot.key);
        self.slots[index] = slot;
    }

    /// Remove the entry for `id`.
    ///
    /// Entries later in the same probe cluster are re-homed so lookups keep
    /// finding them.
    pub fn remove(&mut self, id: i32) -> Option<ChunkId> {
        let key = Self::internal_key(id)?;
        let (index, found) = self.probe(key);
        if !found {
            return None;
        }
        Some(self.remove_at(index))
    }

    fn remove_at(&mut self, index: usize) -> ChunkId {
        let removed = ChunkId(self.slots[index].value);
        self.slots[index] = Slot::default();
        self.count -= 1;

        let mut next = (index + 1) % self.slots.len();
        while self.slots[next].key != 0 {
            let slot = std::mem::take(&mut self.slots[next]);
            self.place(slot);
            next = (next + 1) % self.slots.len();
        }
        removed
    }

    /// Remove every entry whose chunk was created by `creator`.
    ///
    /// # Returns
    /// Number of removed entries
    pub fn remove_creator(&mut self, creator: NodeId) -> usize {
        self.remove_where(|_, value| value.creator() == creator)
    }

    /// Remove every entry placed outside `(first, last]`.
    ///
    /// # Returns
    /// Number of removed entries
    pub fn remove_outside_range(&mut self, first: Option<NodeId>, last: Option<NodeId>) -> usize {
        self.remove_where(|id, _| !is_hash_in_superpeer_range(crc16(id), first, last))
    }

    fn remove_where<F>(&mut self, pred: F) -> usize
    where
        F: Fn(i32, ChunkId) -> bool,
    {
        let doomed: Vec<i32> = self
            .entries()
            .into_iter()
            .filter(|(id, value)| pred(*id, *value))
            .map(|(id, _)| id)
            .collect();
        for id in &doomed {
            trace!(id, "removing nameservice entry");
            self.remove(*id);
        }
        doomed.len()
    }

    /// All entries in slot order.
    pub fn entries(&self) -> Vec<(i32, ChunkId)> {
        self.slots
            .iter()
            .filter(|s| s.key != 0)
            .map(|s| ((s.key - 1) as i32, ChunkId(s.value)))
            .collect()
    }

    /// Number of entries placed in `(first, last]`.
    pub fn count_in_range(&self, first: Option<NodeId>, last: Option<NodeId>) -> usize {
        self.entries()
            .into_iter()
            .filter(|(id, _)| is_hash_in_superpeer_range(crc16(*id), first, last))
            .count()
    }

    /// Serialize all entries.
    pub fn export_all(&self) -> Bytes {
        Self::encode(self.entries().into_iter())
    }

    /// Serialize the entries placed in `(first, last]`.
    pub fn export_range(&self, first: Option<NodeId>, last: Option<NodeId>) -> Bytes {
        Self::encode(
            self.entries()
                .into_iter()
                .filter(|(id, _)| is_hash_in_superpeer_range(crc16(*id), first, last)),
        )
    }

    fn encode(entries: impl Iterator<Item = (i32, ChunkId)>) -> Bytes {
        let mut buf = BytesMut::new();
        for (id, value) in entries {
            buf.put_i32(id);
            buf.put_u64(value.0);
        }
        buf.freeze()
    }

    /// Decode an exported buffer into entries.
    ///
    /// # Errors
    /// `MalformedEntries` if the length is not a multiple of [`ENTRY_SIZE`]
    pub fn decode(mut data: &[u8]) -> Result<Vec<(i32, ChunkId)>> {
        if data.len() % ENTRY_SIZE != 0 {
            return Err(Error::MalformedEntries(data.len()));
        }
        let mut entries = Vec::with_capacity(data.len() / ENTRY_SIZE);
        while data.has_remaining() {
            let id = data.get_i32();
            let value = data.get_u64();
            entries.push((id, ChunkId(value)));
        }
        Ok(entries)
    }

    /// Store every entry of an exported buffer.
    ///
    /// # Returns
    /// Number of stored entries
    pub fn put_all(&mut self, data: &[u8]) -> Result<usize> {
        let entries = Self::decode(data)?;
        for (id, value) in &entries {
            self.put(*id, *value)?;
        }
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(creator: u16, lid: u64) -> ChunkId {
        ChunkId::new(NodeId(creator), lid)
    }

    #[test]
    fn test_put_get_update() {
        let mut table = NameserviceTable::default();
        assert_eq!(table.put(7, chunk(1, 1)), Ok(None));
        assert_eq!(table.put(7, chunk(1, 2)), Ok(Some(chunk(1, 1))));
        assert_eq!(table.get(7), Some(chunk(1, 2)));
        assert_eq!(table.get(8), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_negative_id_rejected() {
        let mut table = NameserviceTable::default();
        assert_eq!(table.put(-1, chunk(1, 1)), Err(Error::InvalidNameserviceId(-1)));
        assert_eq!(table.get(-1), None);
        assert_eq!(table.remove(-1), None);
    }

    #[test]
    fn test_rehash_keeps_entries() {
        let mut table = NameserviceTable::new(10, 0.9);
        for id in 0..100 {
            table.put(id, chunk(2, id as u64)).unwrap();
        }
        assert!(table.capacity() > 10, "table should have grown");
        for id in 0..100 {
            assert_eq!(table.get(id), Some(chunk(2, id as u64)), "id {} lost after rehash", id);
        }
    }

    #[test]
    fn test_degenerate_load_factor_falls_back_to_default() {
        for load_factor in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let mut table = NameserviceTable::new(10, load_factor);
            for id in 0..20 {
                table.put(id, chunk(2, id as u64)).unwrap();
            }
            assert!(
                table.capacity() <= 47,
                "load factor {} grew the table to {} slots",
                load_factor,
                table.capacity()
            );
            assert_eq!(table.len(), 20);
            assert_eq!(table.get(19), Some(chunk(2, 19)));
        }
    }

    #[test]
    fn test_single_slot_table_grows() {
        let mut table = NameserviceTable::new(1, 0.9);
        for id in 0..5 {
            table.put(id, chunk(2, id as u64)).unwrap();
        }
        assert_eq!(table.len(), 5);
        assert!(table.capacity() > 5);
    }

    #[test]
    fn test_remove_rehomes_probe_chain() {
        // Tiny table forces long probe clusters.
        let mut table = NameserviceTable::new(64, 0.9);
        for id in 0..50 {
            table.put(id, chunk(3, id as u64)).unwrap();
        }
        for id in (0..50).step_by(2) {
            assert_eq!(table.remove(id), Some(chunk(3, id as u64)));
        }
        assert_eq!(table.len(), 25);
        for id in 0..50 {
            let expected = if id % 2 == 0 { None } else { Some(chunk(3, id as u64)) };
            assert_eq!(table.get(id), expected, "lookup of id {} after removals", id);
        }
    }

    #[test]
    fn test_remove_creator() {
        let mut table = NameserviceTable::default();
        table.put(1, chunk(0x10, 1)).unwrap();
        table.put(2, chunk(0x20, 1)).unwrap();
        table.put(3, chunk(0x10, 2)).unwrap();
        assert_eq!(table.remove_creator(NodeId(0x10)), 2);
        assert_eq!(table.entries(), vec![(2, chunk(0x20, 1))]);
    }

    #[test]
    fn test_export_import() {
        let mut table = NameserviceTable::default();
        for id in 0..20 {
            table.put(id, chunk(4, id as u64)).unwrap();
        }
        let data = table.export_all();
        assert_eq!(data.len(), 20 * ENTRY_SIZE);

        let mut copy = NameserviceTable::new(4, 0.9);
        assert_eq!(copy.put_all(&data), Ok(20));
        assert_eq!(copy.get(13), Some(chunk(4, 13)));
        assert_eq!(NameserviceTable::decode(&data[..5]), Err(Error::MalformedEntries(5)));
    }

    #[test]
    fn test_range_partitioning() {
        let mut table = NameserviceTable::default();
        for id in 0..200 {
            table.put(id, chunk(5, id as u64)).unwrap();
        }
        let (a, b) = (Some(NodeId(0x4000)), Some(NodeId(0xC000)));
        let inside = table.count_in_range(a, b);
        let outside = table.count_in_range(b, a);
        assert_eq!(inside + outside, 200, "the two arcs partition the ring");
        assert_eq!(table.export_range(a, b).len(), inside * ENTRY_SIZE);

        assert_eq!(table.remove_outside_range(a, b), outside);
        assert_eq!(table.len(), inside);
    }
}
