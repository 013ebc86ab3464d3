use std::fmt;
use std::sync::Arc;

use crate::error::DecodeError;

/// Element type of a binary array. All multi-byte kinds are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    U8,
    U32,
    F32,
}

impl ElementKind {
    /// Width of one element in bytes.
    pub fn width(self) -> usize {
        match self {
            ElementKind::U8 => 1,
            ElementKind::U32 | ElementKind::F32 => 4,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::U8 => f.write_str("u8"),
            ElementKind::U32 => f.write_str("u32"),
            ElementKind::F32 => f.write_str("f32"),
        }
    }
}

/// Identity of a memory block: the address of its shared allocation.
///
/// Stable across moves of the owning `Block`, so the receiving side can
/// check that what arrived is the allocation the sender listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Raw fixed-width binary array, the unit of ownership transfer.
///
/// Cloning a block shares the allocation (same `BlockId`). Handing a block
/// over means moving the last handle; `holders()` tells how many handles
/// are alive.
#[derive(Clone)]
pub struct Block {
    kind: ElementKind,
    data: Arc<Vec<u8>>,
}

impl Block {
    /// Wrap raw little-endian bytes. Fails if the length is not a whole
    /// number of elements.
    pub fn from_bytes(kind: ElementKind, bytes: Vec<u8>) -> Result<Self, DecodeError> {
        if bytes.len() % kind.width() != 0 {
            return Err(DecodeError::unrecognized(format!(
                "{} bytes is not a whole number of {kind} elements",
                bytes.len()
            )));
        }
        Ok(Self { kind, data: Arc::new(bytes) })
    }

    pub fn empty(kind: ElementKind) -> Self {
        Self { kind, data: Arc::new(Vec::new()) }
    }

    pub fn from_u8(values: Vec<u8>) -> Self {
        Self { kind: ElementKind::U8, data: Arc::new(values) }
    }

    pub fn from_u32(values: &[u32]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self { kind: ElementKind::U32, data: Arc::new(bytes) }
    }

    pub fn from_f32(values: &[f32]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self { kind: ElementKind::F32, data: Arc::new(bytes) }
    }

    pub fn id(&self) -> BlockId {
        BlockId(Arc::as_ptr(&self.data) as usize)
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Number of elements (not bytes).
    pub fn len(&self) -> usize {
        self.data.len() / self.kind.width()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of live handles to this allocation, this one included.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    pub fn ptr_eq(&self, other: &Block) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Take the bytes out without copying. Fails (returning the block) while
    /// other handles are still alive.
    pub fn into_vec(self) -> Result<Vec<u8>, Block> {
        let kind = self.kind;
        Arc::try_unwrap(self.data).map_err(|data| Block { kind, data })
    }

    /// Decode as `u32` values. Empty for non-`U32` blocks.
    pub fn to_u32_vec(&self) -> Vec<u32> {
        if self.kind != ElementKind::U32 {
            return Vec::new();
        }
        self.data
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Decode as `f32` values. Empty for non-`F32` blocks.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        if self.kind != ElementKind::F32 {
            return Vec::new();
        }
        self.data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// Content equality: same kind, same bytes. Identity is `ptr_eq`.
impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.data == other.data
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id())
            .field("kind", &self.kind)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity() {
        let a = Block::from_f32(&[1.0, 2.0, 3.0]);
        let b = a.clone();
        assert_eq!(a.id(), b.id());
        assert!(a.ptr_eq(&b));
        assert_eq!(a.holders(), 2);
    }

    #[test]
    fn equal_content_distinct_identity() {
        let a = Block::from_u32(&[7, 8]);
        let b = Block::from_u32(&[7, 8]);
        assert_eq!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn empty_blocks_are_distinct_allocations() {
        let a = Block::empty(ElementKind::U8);
        let b = Block::empty(ElementKind::U8);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn rejects_partial_elements() {
        let err = Block::from_bytes(ElementKind::F32, vec![0; 6]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnrecognizedSchema);
    }

    #[test]
    fn into_vec_requires_sole_holder() {
        let a = Block::from_u8(vec![1, 2, 3]);
        let extra = a.clone();
        let a = a.into_vec().unwrap_err();
        drop(extra);
        assert_eq!(a.into_vec().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn little_endian_round_trip() {
        let ids = Block::from_u32(&[1, 0x0102_0304]);
        assert_eq!(ids.as_bytes(), &[1, 0, 0, 0, 4, 3, 2, 1]);
        assert_eq!(ids.to_u32_vec(), vec![1, 0x0102_0304]);
        assert_eq!(ids.len(), 2);
    }
}
