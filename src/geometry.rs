//! Plot geometry: constants and conversions shared by every higher module.
//!
//! All arithmetic here is `u64`; byte offsets into multi-gigabyte plot
//! files overflow `u32` long before the file does, so nothing in this
//! module (or any caller) should downcast before a final, bounds-checked
//! narrowing.

use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const SCOOP_SIZE: u64 = 64;
pub const SCOOPS_PER_NONCE: u64 = 4096;
pub const NONCE_SIZE: u64 = SCOOP_SIZE * SCOOPS_PER_NONCE;
pub const SECTOR_SIZE: u64 = 512;
pub const TOC_SIZE: usize = 1024;
pub const TOC_SLOTS: usize = 31;
pub const SLOT_SIZE: usize = 32;

/// BFS slot lifecycle status, packed into bits 48..50 of a TOC slot's `info`
/// word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Status {
    Ok = 1,
    Incomplete = 2,
    Converting = 3,
}

/// Packs `(start_pos, status, last_completed_scoop)` into the 64-bit `info`
/// word described in spec.md §3: low 48 bits offset, bits 48..50 status,
/// bits 51..63 last-completed scoop (meaningful only while `Converting`).
pub fn pack_info(start_pos: u64, status: Status, last_completed_scoop: u16) -> u64 {
    debug_assert!(start_pos < (1u64 << 48));
    debug_assert!(last_completed_scoop < (1u16 << 13));
    let status: u8 = status.into();
    (start_pos & 0x0000_ffff_ffff_ffff)
        | ((status as u64 & 0x3) << 48)
        | ((last_completed_scoop as u64) << 51)
}

/// Inverse of [`pack_info`].
pub fn unpack_info(info: u64) -> (u64, Status, u16) {
    let start_pos = info & 0x0000_ffff_ffff_ffff;
    let status_bits = ((info >> 48) & 0x3) as u8;
    let status = Status::try_from_primitive(status_bits).unwrap_or(Status::Incomplete);
    let last_completed_scoop = (info >> 51) as u16;
    (start_pos, status, last_completed_scoop)
}

/// Byte size of `nonces` nonces.
pub fn nonces_to_bytes(nonces: u32) -> u64 {
    nonces as u64 * NONCE_SIZE
}

/// Number of whole groups a POC1 file with `nonces`/`stagger` is split into.
/// Returns `1` for POC2 (`stagger == 0`) or already-optimized POC1
/// (`nonces == stagger`).
pub fn group_count(nonces: u32, stagger: u32) -> u32 {
    if stagger == 0 || stagger == nonces {
        1
    } else {
        nonces / stagger
    }
}

/// `true` if a plot with this `stagger`/`nonces` pair is in POC2 (optimized)
/// form: either `stagger == 0` or `nonces == stagger`.
pub fn is_poc2(nonces: u32, stagger: u32) -> bool {
    stagger == 0 || stagger == nonces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let info = pack_info(123_456_789, Status::Converting, 2047);
        let (pos, status, scoop) = unpack_info(info);
        assert_eq!(pos, 123_456_789);
        assert_eq!(status, Status::Converting);
        assert_eq!(scoop, 2047);
    }

    #[test]
    fn pack_unpack_ok_zero_scoop() {
        let info = pack_info(1024, Status::Ok, 0);
        let (pos, status, scoop) = unpack_info(info);
        assert_eq!(pos, 1024);
        assert_eq!(status, Status::Ok);
        assert_eq!(scoop, 0);
    }

    #[test]
    fn group_count_poc2_and_optimized_poc1() {
        assert_eq!(group_count(4096, 0), 1);
        assert_eq!(group_count(4096, 4096), 1);
        assert_eq!(group_count(4096, 1024), 4);
    }

    #[test]
    fn is_poc2_detection() {
        assert!(is_poc2(4096, 0));
        assert!(is_poc2(4096, 4096));
        assert!(!is_poc2(4096, 1024));
    }
}
