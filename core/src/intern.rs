//! Arena-backed string interner.
//!
//! Strings live in chunked byte arenas for the whole compilation and are
//! addressed by a packed 32-bit [StringHandle]. Each slot is laid out as
//! `[hash: u64][len: u32][bytes][\0]`, which makes both the view and the
//! hash O(1) reads. Deduplication is a choice of the caller: [intern]
//! returns an existing handle for equal bytes, [create] always allocates a
//! fresh slot (used for synthesized labels that must stay distinct).

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Bits of a handle reserved for the intra-chunk offset.
const OFFSET_BITS: u32 = 18;
/// One arena chunk. Strings longer than this get a dedicated chunk.
const CHUNK_SIZE: usize = 1 << OFFSET_BITS;
/// Fixed per-slot overhead: hash, length, NUL.
const SLOT_HEADER: usize = 8 + 4;

/// Packed index of an interned string: chunk number in the high bits,
/// byte offset of the slot in the low bits.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct StringHandle(u32);

impl StringHandle {
    fn new(chunk: usize, offset: usize) -> Self {
        assert!(
            chunk < (1 << (32 - OFFSET_BITS)) && offset < CHUNK_SIZE,
            "string arena exhausted"
        );
        Self(((chunk as u32) << OFFSET_BITS) | offset as u32)
    }

    fn chunk(self) -> usize {
        (self.0 >> OFFSET_BITS) as usize
    }

    fn offset(self) -> usize {
        (self.0 & ((1 << OFFSET_BITS) - 1)) as usize
    }
}

impl fmt::Debug for StringHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "str#{}:{}", self.chunk(), self.offset())
    }
}

#[derive(Debug, Default)]
pub struct StringInterner {
    chunks: Vec<Vec<u8>>,
    /// hash -> handles with that hash, compared byte-wise on collision
    dedup: HashMap<u64, Vec<StringHandle>>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a handle for `s`, reusing an existing slot when the same
    /// bytes were interned before.
    pub fn intern(&mut self, s: &str) -> StringHandle {
        let hash = hash_bytes(s.as_bytes());
        if let Some(candidates) = self.dedup.get(&hash) {
            for &h in candidates {
                if self.view(h) == s {
                    return h;
                }
            }
        }
        let handle = self.alloc(hash, s.as_bytes());
        self.dedup.entry(hash).or_default().push(handle);
        handle
    }

    /// Allocate a fresh slot for `s` without consulting the dedup table.
    /// Later [intern] calls will not find it either, so handles from
    /// `create` are unique even for equal text.
    pub fn create(&mut self, s: &str) -> StringHandle {
        let hash = hash_bytes(s.as_bytes());
        self.alloc(hash, s.as_bytes())
    }

    fn alloc(&mut self, hash: u64, bytes: &[u8]) -> StringHandle {
        let need = SLOT_HEADER + bytes.len() + 1;
        let chunk_idx = match self.chunks.last() {
            Some(chunk) if chunk.len() + need <= CHUNK_SIZE => {
                self.chunks.len() - 1
            }
            _ => {
                self.chunks.push(Vec::with_capacity(CHUNK_SIZE.max(need)));
                self.chunks.len() - 1
            }
        };
        let chunk = &mut self.chunks[chunk_idx];
        let offset = chunk.len();
        chunk.extend_from_slice(&hash.to_le_bytes());
        chunk.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        chunk.extend_from_slice(bytes);
        chunk.push(0);
        StringHandle::new(chunk_idx, offset)
    }

    /// The interned text. O(1): reads the stored length, slices the chunk.
    pub fn view(&self, handle: StringHandle) -> &str {
        let chunk = &self.chunks[handle.chunk()];
        let offset = handle.offset();
        let len = u32::from_le_bytes(
            chunk[offset + 8..offset + 12]
                .try_into()
                .expect("corrupt string slot"),
        ) as usize;
        std::str::from_utf8(&chunk[offset + 12..offset + 12 + len])
            .expect("interned string is not UTF-8")
    }

    /// The stored hash of the interned text. O(1).
    pub fn hash(&self, handle: StringHandle) -> u64 {
        let chunk = &self.chunks[handle.chunk()];
        let offset = handle.offset();
        u64::from_le_bytes(
            chunk[offset..offset + 8]
                .try_into()
                .expect("corrupt string slot"),
        )
    }
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_roundtrip() {
        let mut interner = StringInterner::new();
        let h = interner.intern("operator<<");
        assert_eq!(interner.view(h), "operator<<");
        assert_eq!(interner.hash(h), hash_bytes(b"operator<<"));
    }

    #[test]
    fn test_intern_dedupes() {
        let mut interner = StringInterner::new();
        let a = interner.intern("std");
        let b = interner.intern("std");
        assert_eq!(a, b);
        let c = interner.intern("size_t");
        assert_ne!(a, c);
    }

    #[test]
    fn test_create_is_always_fresh() {
        let mut interner = StringInterner::new();
        let a = interner.create(".L0");
        let b = interner.create(".L0");
        assert_ne!(a, b);
        assert_eq!(interner.view(a), interner.view(b));
        // create()d slots stay invisible to intern()
        let c = interner.intern(".L0");
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_views_stable_across_growth() {
        let mut interner = StringInterner::new();
        let handles: Vec<_> = (0..10_000)
            .map(|i| interner.intern(&format!("sym{}", i)))
            .collect();
        assert!(interner.chunks.len() > 1, "expected multiple chunks");
        for (i, &h) in handles.iter().enumerate() {
            assert_eq!(interner.view(h), format!("sym{}", i));
        }
    }

    #[test]
    fn test_oversized_string_gets_own_chunk() {
        let mut interner = StringInterner::new();
        let big = "x".repeat(CHUNK_SIZE * 2);
        let h = interner.intern(&big);
        assert_eq!(interner.view(h), big);
    }
}
