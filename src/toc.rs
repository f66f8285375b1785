//! BFS table-of-contents codec, per spec.md §3/§4.4.
//!
//! The original `bfs.py` keys its in-memory TOC on `startPos` in a plain
//! dict — spec.md §9 calls out that a duplicate `startPos` across two
//! slots would silently clobber one of them, and requires refusal at
//! decode time instead. `Toc::decode` enforces that.

use crate::error::PlotError;
use crate::geometry::{self, Status, TOC_SIZE, TOC_SLOTS};
use crate::plotname::PlotName;
use std::collections::BTreeMap;

pub const MAGIC: &[u8; 4] = b"BFS0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub key: u64,
    pub start_nonce: u64,
    pub nonces: u32,
    pub stagger: u32,
    pub status: Status,
    pub start_pos: u64,
    /// Meaningful only while `status == Converting`.
    pub last_completed_scoop: u16,
}

impl Slot {
    pub fn plot_name(&self) -> PlotName {
        PlotName {
            key: self.key,
            start_nonce: self.start_nonce,
            nonces: self.nonces,
            stagger: self.stagger,
        }
    }

    pub fn end_pos(&self) -> u64 {
        self.start_pos + geometry::nonces_to_bytes(self.nonces)
    }
}

/// The decoded TOC: the raw 1024-byte buffer (kept for in-place mutation
/// and rewrite) plus a `startPos`-keyed map of live slots.
pub struct Toc {
    raw: [u8; TOC_SIZE],
    slots: BTreeMap<u64, Slot>,
}

impl Toc {
    /// A fresh, empty TOC: `BFS0` followed by 1020 zero bytes.
    pub fn empty() -> Toc {
        let mut raw = [0u8; TOC_SIZE];
        raw[0..4].copy_from_slice(MAGIC);
        Toc {
            raw,
            slots: BTreeMap::new(),
        }
    }

    /// Decodes the first 1024 bytes of a device. Fails if the magic is
    /// wrong, or if two slots share a `startPos` (spec.md §9).
    pub fn decode(buf: &[u8; TOC_SIZE]) -> Result<Toc, PlotError> {
        if &buf[0..4] != MAGIC {
            return Err(PlotError::Format(
                "device does not have a BFS table of contents".into(),
            ));
        }
        let mut slots = BTreeMap::new();
        for i in 0..TOC_SLOTS {
            let pos = 4 + i * geometry::SLOT_SIZE;
            let key = read_u64(buf, pos);
            if key == 0 {
                continue;
            }
            let start_nonce = read_u64(buf, pos + 8);
            let nonces = read_u32(buf, pos + 16);
            let stagger = read_u32(buf, pos + 20);
            let info = read_u64(buf, pos + 24);
            let (start_pos, status, last_completed_scoop) = geometry::unpack_info(info);
            let slot = Slot {
                key,
                start_nonce,
                nonces,
                stagger,
                status,
                start_pos,
                last_completed_scoop,
            };
            if slots.insert(start_pos, slot).is_some() {
                return Err(PlotError::Format(format!(
                    "duplicate TOC slot at startPos {start_pos}"
                )));
            }
        }
        Ok(Toc { raw: *buf, slots })
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.values()
    }

    pub fn slot_at(&self, start_pos: u64) -> Option<&Slot> {
        self.slots.get(&start_pos)
    }

    pub fn slot_by_name(&self, name: &str) -> Option<&Slot> {
        self.slots.values().find(|s| s.plot_name().canonical_name() == name)
    }

    pub fn find_conflict(&self, name: &PlotName) -> Option<&Slot> {
        self.slots
            .values()
            .find(|s| s.key == name.key && s.start_nonce == name.start_nonce && s.nonces == name.nonces)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= TOC_SLOTS
    }

    /// Inserts or replaces the slot at `slot.start_pos` and rewrites the
    /// raw buffer from the map. Fails if the TOC is already at capacity and
    /// this is a genuinely new slot.
    pub fn insert(&mut self, slot: Slot) -> Result<(), PlotError> {
        if !self.slots.contains_key(&slot.start_pos) && self.is_full() {
            return Err(PlotError::Capacity("TOC is full".into()));
        }
        self.slots.insert(slot.start_pos, slot);
        self.rebuild_raw();
        Ok(())
    }

    pub fn update_status(
        &mut self,
        start_pos: u64,
        status: Status,
        last_completed_scoop: u16,
    ) -> Result<(), PlotError> {
        let slot = self
            .slots
            .get_mut(&start_pos)
            .ok_or_else(|| PlotError::State(format!("no TOC slot at {start_pos}")))?;
        slot.status = status;
        slot.last_completed_scoop = last_completed_scoop;
        self.rebuild_raw();
        Ok(())
    }

    pub fn update_stagger(&mut self, start_pos: u64, stagger: u32) -> Result<(), PlotError> {
        let slot = self
            .slots
            .get_mut(&start_pos)
            .ok_or_else(|| PlotError::State(format!("no TOC slot at {start_pos}")))?;
        slot.stagger = stagger;
        self.rebuild_raw();
        Ok(())
    }

    /// Removes a slot and compacts the buffer, per spec.md §4.6 (`delete`
    /// rewrites the whole 1024-byte block from a fresh template; data
    /// blocks on disk are left untouched).
    pub fn remove(&mut self, start_pos: u64) -> Option<Slot> {
        let removed = self.slots.remove(&start_pos);
        self.rebuild_raw();
        removed
    }

    /// The raw 1024-byte buffer, ready for a single positioned write at
    /// device offset 0.
    pub fn raw(&self) -> &[u8; TOC_SIZE] {
        &self.raw
    }

    fn rebuild_raw(&mut self) {
        let mut raw = [0u8; TOC_SIZE];
        raw[0..4].copy_from_slice(MAGIC);
        for (i, slot) in self.slots.values().enumerate() {
            let pos = 4 + i * geometry::SLOT_SIZE;
            let info = geometry::pack_info(slot.start_pos, slot.status, slot.last_completed_scoop);
            raw[pos..pos + 8].copy_from_slice(&slot.key.to_le_bytes());
            raw[pos + 8..pos + 16].copy_from_slice(&slot.start_nonce.to_le_bytes());
            raw[pos + 16..pos + 20].copy_from_slice(&slot.nonces.to_le_bytes());
            raw[pos + 20..pos + 24].copy_from_slice(&slot.stagger.to_le_bytes());
            raw[pos + 24..pos + 32].copy_from_slice(&info.to_le_bytes());
        }
        self.raw = raw;
    }
}

fn read_u64(buf: &[u8], pos: usize) -> u64 {
    u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap())
}

fn read_u32(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_slot(start_pos: u64, key: u64) -> Slot {
        Slot {
            key,
            start_nonce: 0,
            nonces: 100,
            stagger: 100,
            status: Status::Ok,
            start_pos,
            last_completed_scoop: 0,
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut toc = Toc::empty();
        toc.insert(sample_slot(1024, 1)).unwrap();
        toc.insert(sample_slot(2048, 2)).unwrap();
        let raw = *toc.raw();
        let decoded = Toc::decode(&raw).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.slot_at(1024).unwrap().key, 1);
        assert_eq!(decoded.slot_at(2048).unwrap().key, 2);
        assert_eq!(decoded.raw(), &raw);
    }

    #[test]
    fn rejects_missing_magic() {
        let buf = [0u8; TOC_SIZE];
        assert!(Toc::decode(&buf).is_err());
    }

    #[test]
    fn full_toc_refuses_new_slot() {
        let mut toc = Toc::empty();
        for i in 0..31u64 {
            toc.insert(sample_slot(1024 + i * 4096, i + 1)).unwrap();
        }
        assert!(toc.is_full());
        let err = toc.insert(sample_slot(9_999_999, 999)).unwrap_err();
        assert!(matches!(err, PlotError::Capacity(_)));
        assert_eq!(toc.len(), 31);
    }

    #[test]
    fn delete_compacts() {
        let mut toc = Toc::empty();
        toc.insert(sample_slot(1024, 1)).unwrap();
        toc.insert(sample_slot(2048, 2)).unwrap();
        toc.remove(1024);
        assert_eq!(toc.len(), 1);
        let decoded = Toc::decode(toc.raw()).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(decoded.slot_at(1024).is_none());
    }
}
