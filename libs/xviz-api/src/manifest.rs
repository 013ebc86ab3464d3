use std::collections::HashMap;

use crate::block::{BlockId, ElementKind};
use crate::record::PointCloudField;

/// One memory block listed for relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub id: BlockId,
    pub kind: ElementKind,
    pub byte_len: usize,
    /// Record index where the block was first seen.
    pub record: usize,
    /// Field where the block was first seen.
    pub field: PointCloudField,
    /// How many fields inside the delivery point at this block.
    pub refs: usize,
}

/// Blocks whose ownership moves with one delivery, in first-seen order.
///
/// Lives for a single decode-and-send cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferManifest {
    entries: Vec<BlockRef>,
    /// BlockId → position in `entries`.
    index: HashMap<BlockId, usize>,
}

impl TransferManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reachable block. A block already listed only gains a reference.
    pub fn note(
        &mut self,
        id: BlockId,
        kind: ElementKind,
        byte_len: usize,
        record: usize,
        field: PointCloudField,
    ) {
        if let Some(&pos) = self.index.get(&id) {
            self.entries[pos].refs += 1;
        } else {
            self.index.insert(id, self.entries.len());
            self.entries.push(BlockRef { id, kind, byte_len, record, field, refs: 1 });
        }
    }

    pub fn get(&self, id: BlockId) -> Option<&BlockRef> {
        self.index.get(&id).map(|&pos| &self.entries[pos])
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.get(id).is_some()
    }

    pub fn entries(&self) -> &[BlockRef] {
        &self.entries
    }

    pub fn ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes moved instead of copied.
    pub fn byte_len(&self) -> usize {
        self.entries.iter().map(|e| e.byte_len).sum()
    }
}
