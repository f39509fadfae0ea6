//! Jump consistent hash (Lamping & Veach).
//!
//! Growing the bucket count from N to N+1 moves only keys that land in the
//! new bucket, ~1/(N+1) of all keys.

/// Stable 64-bit digest of a sharding key.
pub fn key_digest(key: &str) -> u64 {
    let hash = blake3::hash(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

/// Bucket in `[0, buckets)` for `key`, or None when there are no buckets.
pub fn jump_hash(mut key: u64, buckets: usize) -> Option<usize> {
    if buckets == 0 {
        return None;
    }
    let buckets = buckets as i64;
    let mut b: i64 = -1;
    let mut j: i64 = 0;
    while j < buckets {
        b = j;
        key = key.wrapping_mul(2_862_933_555_777_941_757).wrapping_add(1);
        j = (((b + 1) as f64) * ((1u64 << 31) as f64 / (((key >> 33) + 1) as f64))) as i64;
    }
    Some(b as usize)
}

/// Bucket for a string key.
pub fn bucket_of(key: &str, buckets: usize) -> Option<usize> {
    jump_hash(key_digest(key), buckets)
}
