//! FNV-1a fingerprints for cache keys.

const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

pub fn fnv1a_init() -> u64 {
    FNV1A_OFFSET
}

pub fn fnv1a_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

/// Order-sensitive fingerprint of a name list. Names are separated by a NUL so that
/// `["ab", "c"]` and `["a", "bc"]` differ.
pub fn fingerprint_names<S: AsRef<str>>(names: &[S]) -> u64 {
    let mut hash = fnv1a_init();
    for name in names {
        hash = fnv1a_bytes(hash, name.as_ref().as_bytes());
        hash = fnv1a_bytes(hash, &[0]);
    }
    hash
}
