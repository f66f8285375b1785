//! Free-extent computation and first-fit placement over a BFS device's
//! usable byte range, per spec.md §4.5.

use crate::error::PlotError;
use crate::toc::Toc;
use std::collections::BTreeMap;

/// A free byte range `[start, start + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub start: u64,
    pub size: u64,
}

/// Free extents as the gap list between sorted occupied ranges, over
/// `[usable_start, usable_start + usable_size)`.
pub struct FreeExtents {
    extents: BTreeMap<u64, u64>,
}

impl FreeExtents {
    /// `usable_start` is the first usable byte (1024 for a BFS device);
    /// `usable_size` is `deviceSize - 2*SECTOR_SIZE - usable_start`'s
    /// complement — concretely the caller passes `deviceSize -
    /// 2*SECTOR_SIZE` as the end of the usable range.
    pub fn compute(toc: &Toc, usable_start: u64, usable_end: u64) -> FreeExtents {
        let mut occupied: Vec<(u64, u64)> = toc
            .slots()
            .map(|s| (s.start_pos, s.end_pos()))
            .collect();
        occupied.sort_by_key(|&(start, _)| start);

        let mut extents = BTreeMap::new();
        let mut cursor = usable_start;
        for (start, end) in occupied {
            if cursor < start {
                extents.insert(cursor, start - cursor);
            }
            cursor = cursor.max(end);
        }
        if cursor < usable_end {
            extents.insert(cursor, usable_end - cursor);
        }
        FreeExtents { extents }
    }

    pub fn iter(&self) -> impl Iterator<Item = Extent> + '_ {
        self.extents.iter().map(|(&start, &size)| Extent { start, size })
    }

    pub fn total_free(&self) -> u64 {
        self.extents.values().sum()
    }

    /// First-fit by ascending `start`: the lowest-offset free extent with
    /// `size >= requested`. Shrinks that extent in place on success; leaves
    /// every other extent untouched. Returns "no space" without partial
    /// state change otherwise.
    pub fn place(&mut self, requested: u64) -> Result<u64, PlotError> {
        let found = self
            .extents
            .iter()
            .find(|&(_, &size)| size >= requested)
            .map(|(&start, &size)| (start, size));
        let (start, size) = found.ok_or_else(|| {
            PlotError::Capacity(format!(
                "no free extent large enough for {requested} bytes ({} bytes free total)",
                self.total_free()
            ))
        })?;
        self.extents.remove(&start);
        if size > requested {
            self.extents.insert(start + requested, size - requested);
        }
        Ok(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Status;
    use crate::toc::Slot;

    fn slot(start_pos: u64, nonces: u32) -> Slot {
        Slot {
            key: 1,
            start_nonce: 0,
            nonces,
            stagger: nonces,
            status: Status::Ok,
            start_pos,
            last_completed_scoop: 0,
        }
    }

    #[test]
    fn empty_device_is_one_big_extent() {
        let toc = Toc::empty();
        let free = FreeExtents::compute(&toc, 1024, 1_000_000);
        let extents: Vec<_> = free.iter().collect();
        assert_eq!(extents, vec![Extent { start: 1024, size: 1_000_000 - 1024 }]);
    }

    #[test]
    fn first_fit_picks_lowest_offset() {
        let mut toc = Toc::empty();
        // one GiB at 1024, then a gap, then another plot.
        toc.insert(slot(1024, 4096)).unwrap(); // 1 GiB
        let one_gib = 4096u64 * crate::geometry::NONCE_SIZE;
        toc.insert(slot(1024 + one_gib + one_gib, 4096)).unwrap();
        let mut free = FreeExtents::compute(&toc, 1024, 1024 + 4 * one_gib);
        let placed = free.place(one_gib / 2).unwrap();
        assert_eq!(placed, 1024 + one_gib);
    }

    #[test]
    fn placement_never_overlaps_and_extents_stay_sorted() {
        let toc = Toc::empty();
        let mut free = FreeExtents::compute(&toc, 1024, 1024 + 1_000_000);
        let a = free.place(100_000).unwrap();
        let b = free.place(200_000).unwrap();
        assert_eq!(a, 1024);
        assert_eq!(b, 1024 + 100_000);
        let remaining: Vec<_> = free.iter().collect();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].start, 1024 + 300_000);
    }

    #[test]
    fn no_space_leaves_extents_untouched() {
        let toc = Toc::empty();
        let mut free = FreeExtents::compute(&toc, 1024, 1024 + 100);
        let before: Vec<_> = free.iter().collect();
        assert!(free.place(1_000_000).is_err());
        let after: Vec<_> = free.iter().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn gap_reuse_after_delete() {
        // A (1 GiB @ 1024), B (1 GiB after A); delete A; write C (0.5 GiB).
        let one_gib = 4096u64 * crate::geometry::NONCE_SIZE;
        let mut toc = Toc::empty();
        toc.insert(slot(1024, 4096)).unwrap();
        toc.insert(slot(1024 + one_gib, 4096)).unwrap();
        toc.remove(1024);
        let mut free = FreeExtents::compute(&toc, 1024, 1024 + 3 * one_gib);
        let c = free.place(one_gib / 2).unwrap();
        assert_eq!(c, 1024);
        let remaining: Vec<_> = free.iter().collect();
        // half a GiB left before B, plus the tail after B.
        assert!(remaining
            .iter()
            .any(|e| e.start == 1024 + one_gib / 2 && e.size == one_gib / 2));
    }
}
