//! Freed-block poisoning.
//!
//! Blocks handed back to a pool are overwritten with [`FREED_PATTERN`], so a
//! stale pointer read after free shows an obvious `0xCD` fill instead of
//! plausible old data.

/// Byte written over freed blocks.
pub const FREED_PATTERN: u8 = 0xCD;

/// Overwrite `len` bytes at `ptr` with [`FREED_PATTERN`].
///
/// # Safety
///
/// The region must be valid for writes and not in use by anyone else.
pub unsafe fn poison_freed(ptr: *mut u8, len: usize) {
    std::ptr::write_bytes(ptr, FREED_PATTERN, len);
}

/// Whether every byte of `region` carries the freed pattern.
pub fn is_poisoned(region: &[u8]) -> bool {
    region.iter().all(|&byte| byte == FREED_PATTERN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_fills_region() {
        let mut buf = [0u8; 32];
        unsafe { poison_freed(buf.as_mut_ptr(), 16) };
        assert!(is_poisoned(&buf[..16]));
        assert!(!is_poisoned(&buf));
    }
}
