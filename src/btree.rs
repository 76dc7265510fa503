//! Lazily materialised, cached node tree.
//!
//! A b-tree starts from a root range descriptor and materialises nodes on
//! demand: resolving a leaf walks down from the root, reading each node
//! through the [`NodeReader`] the first time it is touched and memoising it
//! in the cache. During its `read_node` call the client populates the node
//! with either sub-node ranges (branch) or leaf values (leaf); the two are
//! mutually exclusive.
//!
//! Counting walks fill in per-sub-node leaf tallies and each node's first
//! leaf index, guarded by a per-node recalculation flag, so later leaf
//! lookups descend directly instead of re-counting.

use std::fmt;
use std::sync::Arc;

use crate::cache::{Cache, CacheIdentifier, ValueWriter};
use crate::clock::{default_clock, Clock, Timestamp};
use crate::error::{ArgumentError, IoError, Result, RuntimeError};
use crate::range::Range;
use crate::ReadFlags;

/// Deepest node chain the tree will follow before declaring the structure
/// corrupt.
const MAXIMUM_NODE_RECURSION_DEPTH: u16 = 64;

bitflags::bitflags! {
    /// Internal state bits of a materialised node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        const LEAF = 0x01;
        const DELETED = 0x02;
        const CALCULATE_LEAF_VALUES = 0x04;
    }
}

/// A branch node's reference to one child subtree.
#[derive(Debug, Clone)]
pub struct SubNode {
    range: Range,
    key: Vec<u8>,
    deleted: bool,
    number_of_leaf_values: u64,
    number_of_deleted_leaf_values: u64,
    first_leaf_index: u64,
}

impl SubNode {
    pub fn data_range(&self) -> &Range {
        &self.range
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Global index of the subtree's first leaf value. Valid after a
    /// counting walk.
    pub fn first_leaf_index(&self) -> u64 {
        self.first_leaf_index
    }
}

/// A leaf node's payload descriptor: a data range plus an opaque key.
#[derive(Debug, Clone)]
pub struct LeafValue {
    range: Range,
    key: Vec<u8>,
    deleted: bool,
}

impl LeafValue {
    pub fn data_range(&self) -> &Range {
        &self.range
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// One materialised tree node. Handed mutably to `read_node` for population;
/// afterwards the tree only reads it.
#[derive(Debug, Clone)]
pub struct BtreeNode {
    level: u16,
    range: Range,
    sub_nodes: Vec<SubNode>,
    leaf_values: Vec<LeafValue>,
    first_leaf_index: u64,
    timestamp: Timestamp,
    flags: NodeFlags,
}

impl BtreeNode {
    fn new(level: u16, range: Range, timestamp: Timestamp) -> BtreeNode {
        BtreeNode {
            level,
            range,
            sub_nodes: Vec::new(),
            leaf_values: Vec::new(),
            first_leaf_index: 0,
            timestamp,
            flags: NodeFlags::CALCULATE_LEAF_VALUES,
        }
    }

    /// Depth of this node; the root is level 0.
    pub fn level(&self) -> u16 {
        self.level
    }

    pub fn data_range(&self) -> &Range {
        &self.range
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn is_leaf(&self) -> bool {
        self.flags.contains(NodeFlags::LEAF)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(NodeFlags::DELETED)
    }

    /// Marks the whole node logically deleted; every leaf value it carries
    /// becomes deleted.
    pub fn set_deleted(&mut self) {
        self.flags.insert(NodeFlags::DELETED | NodeFlags::CALCULATE_LEAF_VALUES);
        for leaf_value in &mut self.leaf_values {
            leaf_value.deleted = true;
        }
    }

    /// Global index of this node's first leaf value. Valid after a counting
    /// walk.
    pub fn first_leaf_index(&self) -> u64 {
        self.first_leaf_index
    }

    pub fn number_of_sub_nodes(&self) -> usize {
        self.sub_nodes.len()
    }

    pub fn sub_node_by_index(&self, sub_node_index: usize) -> Result<&SubNode> {
        self.sub_nodes
            .get(sub_node_index)
            .ok_or_else(|| ArgumentError::ValueOutOfBounds("sub node index").into())
    }

    /// Appends a child subtree reference.
    ///
    /// # Failure
    ///
    /// Fails with `Argument::ConflictingValue` when the node already carries
    /// leaf values.
    pub fn append_sub_node(
        &mut self,
        file_index: i32,
        offset: i64,
        size: u64,
        flags: u32,
        key: &[u8],
    ) -> Result<usize> {
        if !self.leaf_values.is_empty() {
            return Err(ArgumentError::ConflictingValue("sub node in leaf node").into());
        }
        let range = Range::new(file_index, offset, size, flags)?;
        self.sub_nodes.push(SubNode {
            range,
            key: key.to_vec(),
            deleted: false,
            number_of_leaf_values: 0,
            number_of_deleted_leaf_values: 0,
            first_leaf_index: 0,
        });
        self.flags.insert(NodeFlags::CALCULATE_LEAF_VALUES);
        Ok(self.sub_nodes.len() - 1)
    }

    /// Inserts a child subtree reference at `sub_node_index`, shifting later
    /// ones up.
    pub fn insert_sub_node(
        &mut self,
        sub_node_index: usize,
        file_index: i32,
        offset: i64,
        size: u64,
        flags: u32,
        key: &[u8],
    ) -> Result<()> {
        if !self.leaf_values.is_empty() {
            return Err(ArgumentError::ConflictingValue("sub node in leaf node").into());
        }
        if sub_node_index > self.sub_nodes.len() {
            return Err(ArgumentError::ValueOutOfBounds("sub node index").into());
        }
        let range = Range::new(file_index, offset, size, flags)?;
        self.sub_nodes.insert(
            sub_node_index,
            SubNode {
                range,
                key: key.to_vec(),
                deleted: false,
                number_of_leaf_values: 0,
                number_of_deleted_leaf_values: 0,
                first_leaf_index: 0,
            },
        );
        self.flags.insert(NodeFlags::CALCULATE_LEAF_VALUES);
        Ok(())
    }

    /// Detaches the sub nodes from `pivot` on into a sibling node at the
    /// same level, leaving `0..pivot` here. The sibling reuses this node's
    /// data range; the caller re-targets it.
    pub fn split_sub_nodes(&mut self, pivot: usize) -> Result<BtreeNode> {
        if pivot > self.sub_nodes.len() {
            return Err(ArgumentError::ValueOutOfBounds("pivot").into());
        }
        let mut sibling = BtreeNode::new(self.level, self.range, self.timestamp);
        sibling.sub_nodes = self.sub_nodes.split_off(pivot);
        self.flags.insert(NodeFlags::CALCULATE_LEAF_VALUES);
        Ok(sibling)
    }

    /// Marks one child subtree logically deleted. Its leaf values drop out
    /// of the live count and surface through the deleted-leaf accessors.
    pub fn set_deleted_sub_node(&mut self, sub_node_index: usize) -> Result<()> {
        match self.sub_nodes.get_mut(sub_node_index) {
            Some(sub_node) => {
                sub_node.deleted = true;
                self.flags.insert(NodeFlags::CALCULATE_LEAF_VALUES);
                Ok(())
            }
            None => Err(ArgumentError::ValueOutOfBounds("sub node index").into()),
        }
    }

    /// Number of live leaf values carried directly by this node.
    pub fn number_of_leaf_values(&self) -> usize {
        self.leaf_values
            .iter()
            .filter(|leaf_value| !leaf_value.deleted)
            .count()
    }

    pub fn number_of_deleted_leaf_values(&self) -> usize {
        self.leaf_values.len() - self.number_of_leaf_values()
    }

    /// Raw access by storage position, deleted values included.
    pub fn leaf_value_by_index(&self, leaf_value_index: usize) -> Result<&LeafValue> {
        self.leaf_values
            .get(leaf_value_index)
            .ok_or_else(|| ArgumentError::ValueOutOfBounds("leaf value index").into())
    }

    /// Appends a leaf value descriptor.
    ///
    /// # Failure
    ///
    /// Fails with `Argument::ConflictingValue` when the node already carries
    /// sub nodes.
    pub fn append_leaf_value(
        &mut self,
        file_index: i32,
        offset: i64,
        size: u64,
        flags: u32,
        key: &[u8],
    ) -> Result<usize> {
        if !self.sub_nodes.is_empty() {
            return Err(ArgumentError::ConflictingValue("leaf value in branch node").into());
        }
        let range = Range::new(file_index, offset, size, flags)?;
        self.leaf_values.push(LeafValue {
            range,
            key: key.to_vec(),
            deleted: self.is_deleted(),
        });
        self.flags.insert(NodeFlags::LEAF | NodeFlags::CALCULATE_LEAF_VALUES);
        Ok(self.leaf_values.len() - 1)
    }

    /// Marks one leaf value logically deleted.
    pub fn set_deleted_leaf_value(&mut self, leaf_value_index: usize) -> Result<()> {
        match self.leaf_values.get_mut(leaf_value_index) {
            Some(leaf_value) => {
                leaf_value.deleted = true;
                self.flags.insert(NodeFlags::CALCULATE_LEAF_VALUES);
                Ok(())
            }
            None => Err(ArgumentError::ValueOutOfBounds("leaf value index").into()),
        }
    }

    fn finalize(&mut self) {
        if self.sub_nodes.is_empty() {
            self.flags.insert(NodeFlags::LEAF);
        }
    }

    /// Live and deleted totals across the whole subtree. Valid after a
    /// counting walk.
    fn totals(&self) -> (u64, u64) {
        if self.is_leaf() {
            (
                self.number_of_leaf_values() as u64,
                self.number_of_deleted_leaf_values() as u64,
            )
        } else {
            let mut live = 0;
            let mut deleted = 0;
            for sub_node in &self.sub_nodes {
                live += sub_node_count(sub_node, LeafSelect::Live);
                deleted += sub_node_count(sub_node, LeafSelect::Deleted);
            }
            (live, deleted)
        }
    }
}

/// Which leaf population a walk enumerates. Inside a subtree whose reference
/// was marked deleted, every leaf counts as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeafSelect {
    Live,
    Deleted,
    All,
}

fn sub_node_count(sub_node: &SubNode, select: LeafSelect) -> u64 {
    let total = sub_node.number_of_leaf_values + sub_node.number_of_deleted_leaf_values;
    match select {
        LeafSelect::Live => {
            if sub_node.deleted {
                0
            } else {
                sub_node.number_of_leaf_values
            }
        }
        LeafSelect::Deleted => {
            if sub_node.deleted {
                total
            } else {
                sub_node.number_of_deleted_leaf_values
            }
        }
        LeafSelect::All => total,
    }
}

fn leaf_matches(leaf_value: &LeafValue, select: LeafSelect) -> bool {
    match select {
        LeafSelect::Live => !leaf_value.deleted,
        LeafSelect::Deleted => leaf_value.deleted,
        LeafSelect::All => true,
    }
}

/// What a b-tree keeps in its cache: materialised nodes next to decoded
/// node values. An entry of the wrong variant is a cache miss.
#[derive(Debug, Clone)]
pub enum BtreeEntry<V> {
    Node(BtreeNode),
    Value(V),
}

/// Deposit handle for [`NodeReader::read_node_value`]; wraps the deposited
/// value into the cache's entry type.
pub struct NodeValueWriter<'a, V> {
    inner: ValueWriter<'a, BtreeEntry<V>>,
}

impl<'a, V> NodeValueWriter<'a, V> {
    pub fn identifier(&self) -> &CacheIdentifier {
        self.inner.identifier()
    }

    pub fn set_value(self, value: V) -> Result<()> {
        self.inner.set_value(BtreeEntry::Value(value))
    }
}

/// Client hooks that materialise nodes and decode leaf values.
pub trait NodeReader {
    type Io: ?Sized;
    type Value;

    /// Called the first time a node is touched. The implementation populates
    /// `node` with sub-node ranges or leaf values read from the node's bytes.
    #[allow(clippy::too_many_arguments)]
    fn read_node(
        &mut self,
        io: &mut Self::Io,
        node: &mut BtreeNode,
        file_index: i32,
        offset: i64,
        size: u64,
        node_flags: u32,
        read_flags: ReadFlags,
    ) -> Result<()>;

    /// Decodes the value a leaf refers to, depositing it through `writer`.
    /// The default fails `Runtime::UnsupportedValue` for trees that are only
    /// enumerated structurally.
    fn read_node_value(
        &mut self,
        _io: &mut Self::Io,
        _leaf_value: &LeafValue,
        _writer: NodeValueWriter<'_, Self::Value>,
        _read_flags: ReadFlags,
    ) -> Result<()> {
        Err(RuntimeError::UnsupportedValue("node value read").into())
    }
}

pub struct Btree<R: NodeReader> {
    root: Option<Range>,
    reader: R,
    clock: Arc<dyn Clock>,
    timestamp: Timestamp,
}

impl<R: NodeReader> Btree<R> {
    pub fn new(reader: R) -> Btree<R> {
        Btree::with_clock(reader, default_clock())
    }

    pub fn with_clock(reader: R, clock: Arc<dyn Clock>) -> Btree<R> {
        let timestamp = clock.now();
        Btree {
            root: None,
            reader,
            clock,
            timestamp,
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Sets (or replaces) the root node range. Replacing the root bumps the
    /// tree timestamp, invalidating every cached node and value.
    pub fn set_root_node(
        &mut self,
        file_index: i32,
        offset: i64,
        size: u64,
        flags: u32,
    ) -> Result<()> {
        self.root = Some(Range::new(file_index, offset, size, flags)?);
        self.timestamp = self.clock.now();
        Ok(())
    }

    pub fn root_node(&self) -> Option<&Range> {
        self.root.as_ref()
    }

    /// Total number of live leaf values, materialising nodes as needed.
    pub fn get_number_of_leaf_values(
        &mut self,
        io: &mut R::Io,
        cache: &mut Cache<BtreeEntry<R::Value>>,
    ) -> Result<u64> {
        let root = self.root()?;
        let node = self.counted_node(io, cache, root, 0, 0, 0, ReadFlags::empty())?;
        Ok(node.totals().0)
    }

    pub fn get_number_of_deleted_leaf_values(
        &mut self,
        io: &mut R::Io,
        cache: &mut Cache<BtreeEntry<R::Value>>,
    ) -> Result<u64> {
        let root = self.root()?;
        let node = self.counted_node(io, cache, root, 0, 0, 0, ReadFlags::empty())?;
        Ok(node.totals().1)
    }

    /// The `leaf_value_index`-th live leaf value.
    pub fn get_leaf_value_by_index(
        &mut self,
        io: &mut R::Io,
        cache: &mut Cache<BtreeEntry<R::Value>>,
        leaf_value_index: u64,
    ) -> Result<LeafValue> {
        let root = self.root()?;
        self.leaf_at_index(
            io,
            cache,
            root,
            0,
            0,
            0,
            leaf_value_index,
            LeafSelect::Live,
            ReadFlags::empty(),
        )
    }

    /// The `leaf_value_index`-th deleted leaf value.
    pub fn get_deleted_leaf_value_by_index(
        &mut self,
        io: &mut R::Io,
        cache: &mut Cache<BtreeEntry<R::Value>>,
        leaf_value_index: u64,
    ) -> Result<LeafValue> {
        let root = self.root()?;
        self.leaf_at_index(
            io,
            cache,
            root,
            0,
            0,
            0,
            leaf_value_index,
            LeafSelect::Deleted,
            ReadFlags::empty(),
        )
    }

    /// Retrieves the decoded value of the `leaf_value_index`-th live leaf,
    /// reading it through [`NodeReader::read_node_value`] on a cache miss.
    /// The value is cached at the leaf-index slot under the leaf's range and
    /// the tree timestamp.
    pub fn get_node_value<'c>(
        &mut self,
        io: &mut R::Io,
        cache: &'c mut Cache<BtreeEntry<R::Value>>,
        leaf_value_index: u64,
        read_flags: ReadFlags,
    ) -> Result<&'c R::Value> {
        let leaf_value = self.get_leaf_value_by_index(io, cache, leaf_value_index)?;
        let slot = cache.slot_for(leaf_value_index);
        let identifier = self.value_identifier(&leaf_value);

        let mut hit = false;
        if !read_flags.contains(ReadFlags::IGNORE_CACHE) && cache.is_hit(slot, &identifier)? {
            hit = matches!(
                cache.value_by_index(slot)?,
                Some(occupant) if matches!(occupant.value(), BtreeEntry::Value(_))
            );
        }
        if !hit {
            tracing::trace!(
                leaf_value_index,
                offset = leaf_value.data_range().offset(),
                "reading node value"
            );
            let writer = NodeValueWriter {
                inner: ValueWriter::new(&mut *cache, slot, identifier),
            };
            self.reader
                .read_node_value(io, &leaf_value, writer, read_flags)
                .map_err(|err| IoError::ReadFailed {
                    offset: leaf_value.data_range().offset(),
                    source: Some(err.into()),
                })?;
        }
        match cache.expect(slot, &identifier, "node value")? {
            BtreeEntry::Value(value) => Ok(value),
            BtreeEntry::Node(_) => Err(RuntimeError::ValueMissing("node value").into()),
        }
    }

    /// Deposits a decoded value for the `leaf_value_index`-th live leaf
    /// without invoking the reader.
    pub fn set_node_value(
        &mut self,
        io: &mut R::Io,
        cache: &mut Cache<BtreeEntry<R::Value>>,
        leaf_value_index: u64,
        value: R::Value,
    ) -> Result<()> {
        let leaf_value = self.get_leaf_value_by_index(io, cache, leaf_value_index)?;
        let slot = cache.slot_for(leaf_value_index);
        let identifier = self.value_identifier(&leaf_value);
        cache.set_value_by_index(slot, identifier, BtreeEntry::Value(value))
    }

    fn root(&self) -> Result<Range> {
        self.root
            .ok_or_else(|| RuntimeError::ValueMissing("root node").into())
    }

    fn value_identifier(&self, leaf_value: &LeafValue) -> CacheIdentifier {
        CacheIdentifier::new(
            leaf_value.data_range().file_index(),
            leaf_value.data_range().offset(),
            self.timestamp,
        )
    }

    /// Fetches a node out of the cache or materialises it through the
    /// reader. Nodes are slotted by their offset and tagged with the tree
    /// timestamp.
    fn materialise_node(
        &mut self,
        io: &mut R::Io,
        cache: &mut Cache<BtreeEntry<R::Value>>,
        range: Range,
        level: u16,
        read_flags: ReadFlags,
    ) -> Result<BtreeNode> {
        let slot = cache.slot_for(range.offset() as u64);
        let identifier =
            CacheIdentifier::new(range.file_index(), range.offset(), self.timestamp);

        if !read_flags.contains(ReadFlags::IGNORE_CACHE) && cache.is_hit(slot, &identifier)? {
            if let Some(occupant) = cache.value_by_index(slot)? {
                if let BtreeEntry::Node(node) = occupant.value() {
                    return Ok(node.clone());
                }
            }
        }
        tracing::trace!(
            level,
            offset = range.offset(),
            size = range.size(),
            "reading node"
        );
        let mut node = BtreeNode::new(level, range, self.timestamp);
        self.reader
            .read_node(
                io,
                &mut node,
                range.file_index(),
                range.offset(),
                range.size(),
                range.flags(),
                read_flags,
            )
            .map_err(|err| IoError::ReadFailed {
                offset: range.offset(),
                source: Some(err.into()),
            })?;
        node.finalize();
        cache.set_value_by_index(slot, identifier, BtreeEntry::Node(node.clone()))?;
        Ok(node)
    }

    /// Materialises a node and ensures its leaf tallies are filled in,
    /// re-depositing the counted node. Recurses over children the first time
    /// a branch is counted.
    #[allow(clippy::too_many_arguments)]
    fn counted_node(
        &mut self,
        io: &mut R::Io,
        cache: &mut Cache<BtreeEntry<R::Value>>,
        range: Range,
        level: u16,
        first_leaf_index: u64,
        depth: u16,
        read_flags: ReadFlags,
    ) -> Result<BtreeNode> {
        if depth >= MAXIMUM_NODE_RECURSION_DEPTH {
            return Err(RuntimeError::ValueOutOfBounds("node recursion depth").into());
        }
        let mut node = self.materialise_node(io, cache, range, level, read_flags)?;
        if !node.flags.contains(NodeFlags::CALCULATE_LEAF_VALUES) {
            return Ok(node);
        }
        node.first_leaf_index = first_leaf_index;
        if !node.is_leaf() {
            let mut next_leaf_index = first_leaf_index;
            for sub_node_index in 0..node.sub_nodes.len() {
                let sub_range = node.sub_nodes[sub_node_index].range;
                let child = self.counted_node(
                    io,
                    cache,
                    sub_range,
                    level + 1,
                    next_leaf_index,
                    depth + 1,
                    read_flags,
                )?;
                let (live, deleted) = child.totals();
                let sub_node = &mut node.sub_nodes[sub_node_index];
                sub_node.number_of_leaf_values = live;
                sub_node.number_of_deleted_leaf_values = deleted;
                sub_node.first_leaf_index = next_leaf_index;
                next_leaf_index += live + deleted;
            }
        }
        node.flags.remove(NodeFlags::CALCULATE_LEAF_VALUES);

        let slot = cache.slot_for(range.offset() as u64);
        let identifier =
            CacheIdentifier::new(range.file_index(), range.offset(), self.timestamp);
        cache.set_value_by_index(slot, identifier, BtreeEntry::Node(node.clone()))?;
        Ok(node)
    }

    /// Descends to the `remaining`-th leaf value of the selected population.
    #[allow(clippy::too_many_arguments)]
    fn leaf_at_index(
        &mut self,
        io: &mut R::Io,
        cache: &mut Cache<BtreeEntry<R::Value>>,
        range: Range,
        level: u16,
        depth: u16,
        first_leaf_index: u64,
        mut remaining: u64,
        select: LeafSelect,
        read_flags: ReadFlags,
    ) -> Result<LeafValue> {
        if depth >= MAXIMUM_NODE_RECURSION_DEPTH {
            return Err(RuntimeError::ValueOutOfBounds("node recursion depth").into());
        }
        let node =
            self.counted_node(io, cache, range, level, first_leaf_index, depth, read_flags)?;
        if node.is_leaf() {
            for leaf_value in &node.leaf_values {
                if leaf_matches(leaf_value, select) {
                    if remaining == 0 {
                        return Ok(leaf_value.clone());
                    }
                    remaining -= 1;
                }
            }
            return Err(ArgumentError::ValueOutOfBounds("leaf value index").into());
        }
        for sub_node in &node.sub_nodes {
            let count = sub_node_count(sub_node, select);
            if remaining < count {
                let descend_select = if sub_node.deleted && select == LeafSelect::Deleted {
                    LeafSelect::All
                } else {
                    select
                };
                return self.leaf_at_index(
                    io,
                    cache,
                    sub_node.range,
                    level + 1,
                    depth + 1,
                    sub_node.first_leaf_index,
                    remaining,
                    descend_select,
                    read_flags,
                );
            }
            remaining -= count;
        }
        Err(ArgumentError::ValueOutOfBounds("leaf value index").into())
    }
}

impl<R: NodeReader> fmt::Debug for Btree<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Btree")
            .field("root", &self.root)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl<R: NodeReader + Clone> Clone for Btree<R> {
    fn clone(&self) -> Btree<R> {
        Btree {
            root: self.root,
            reader: self.reader.clone(),
            clock: Arc::clone(&self.clock),
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    const NODE_DATA_SIZE: u64 = 512;
    const LEAF_VALUE_DATA_SIZE: u64 = 512;
    const MAXIMUM_NUMBER_OF_LEAF_VALUES: usize = 8;
    const MAXIMUM_NUMBER_OF_NODE_LEVELS: u16 = 4;
    const MAXIMUM_NUMBER_OF_SUB_NODES: usize = 8;

    /// Populates a fixed-fanout tree: branch nodes get eight children, the
    /// deepest level gets eight leaf values.
    #[derive(Clone)]
    struct FanoutReader {
        node_reads: Rc<Cell<usize>>,
        delete_first_leaf: bool,
    }

    impl FanoutReader {
        fn new() -> FanoutReader {
            FanoutReader {
                node_reads: Rc::new(Cell::new(0)),
                delete_first_leaf: false,
            }
        }
    }

    impl NodeReader for FanoutReader {
        type Io = ();
        type Value = Vec<u8>;

        fn read_node(
            &mut self,
            _io: &mut (),
            node: &mut BtreeNode,
            _file_index: i32,
            offset: i64,
            _size: u64,
            _node_flags: u32,
            _read_flags: ReadFlags,
        ) -> Result<()> {
            self.node_reads.set(self.node_reads.get() + 1);
            let level = node.level();
            if level + 1 < MAXIMUM_NUMBER_OF_NODE_LEVELS {
                for sub_node_index in 0..MAXIMUM_NUMBER_OF_SUB_NODES {
                    let element_offset = offset * MAXIMUM_NUMBER_OF_SUB_NODES as i64
                        + (sub_node_index as i64 + 1) * NODE_DATA_SIZE as i64;
                    node.append_sub_node(0, element_offset, NODE_DATA_SIZE, 0, &[])?;
                }
            } else {
                for leaf_value_index in 0..MAXIMUM_NUMBER_OF_LEAF_VALUES {
                    let element_offset = offset * MAXIMUM_NUMBER_OF_SUB_NODES as i64
                        + (leaf_value_index as i64 + 1) * LEAF_VALUE_DATA_SIZE as i64;
                    node.append_leaf_value(1, element_offset, LEAF_VALUE_DATA_SIZE, 0, &[])?;
                }
                // The first leaf node sits at 512 * 585: root (512) to its
                // first child (512 * 9) to that node's first child
                // (512 * 73) to the deepest level.
                if self.delete_first_leaf && offset == 512 * 585 {
                    node.set_deleted_leaf_value(0)?;
                }
            }
            Ok(())
        }

        fn read_node_value(
            &mut self,
            _io: &mut (),
            leaf_value: &LeafValue,
            writer: NodeValueWriter<'_, Vec<u8>>,
            _read_flags: ReadFlags,
        ) -> Result<()> {
            writer.set_value(leaf_value.data_range().offset().to_le_bytes().to_vec())
        }
    }

    fn fanout_tree() -> Btree<FanoutReader> {
        let mut tree = Btree::new(FanoutReader::new());
        tree.set_root_node(0, 512, NODE_DATA_SIZE, 0).unwrap();
        tree
    }

    fn cache() -> Cache<BtreeEntry<Vec<u8>>> {
        Cache::with_capacity(128).unwrap()
    }

    #[test]
    fn missing_root_is_reported() {
        let mut tree = Btree::new(FanoutReader::new());
        let mut cache = cache();
        assert!(tree.get_number_of_leaf_values(&mut (), &mut cache).is_err());
    }

    #[test]
    fn three_levels_of_fanout_into_leaves() {
        let mut tree = fanout_tree();
        let mut cache = cache();
        let count = tree.get_number_of_leaf_values(&mut (), &mut cache).unwrap();
        assert_eq!(count, 8 * 8 * 8);
    }

    #[test]
    fn leaf_lookup_descends_by_per_sub_node_counts() {
        let mut tree = fanout_tree();
        let mut cache = cache();

        let first = tree.get_leaf_value_by_index(&mut (), &mut cache, 0).unwrap();
        assert!(!first.is_deleted());

        let last = tree
            .get_leaf_value_by_index(&mut (), &mut cache, 511)
            .unwrap();
        assert!(!last.is_deleted());
        assert!(tree
            .get_leaf_value_by_index(&mut (), &mut cache, 512)
            .is_err());
    }

    #[test]
    fn node_values_decode_through_the_reader() {
        let mut tree = fanout_tree();
        let mut cache = cache();
        let leaf_value = tree.get_leaf_value_by_index(&mut (), &mut cache, 7).unwrap();
        let expected = leaf_value.data_range().offset().to_le_bytes().to_vec();

        let value = tree
            .get_node_value(&mut (), &mut cache, 7, ReadFlags::empty())
            .unwrap();
        assert_eq!(value, &expected);
    }

    #[test]
    fn set_node_value_is_served_back() {
        let mut tree = fanout_tree();
        let mut cache = cache();
        tree.set_node_value(&mut (), &mut cache, 3, vec![0xCC; 4])
            .unwrap();
        let value = tree
            .get_node_value(&mut (), &mut cache, 3, ReadFlags::empty())
            .unwrap();
        assert_eq!(value, &[0xCC; 4]);
    }

    #[test]
    fn replacing_the_root_invalidates_cached_nodes() {
        let node_reader = FanoutReader::new();
        let reads = Rc::clone(&node_reader.node_reads);
        let mut tree = Btree::new(node_reader);
        tree.set_root_node(0, 512, NODE_DATA_SIZE, 0).unwrap();
        let mut cache = cache();

        tree.get_number_of_leaf_values(&mut (), &mut cache).unwrap();
        let first_walk = reads.get();
        assert!(first_walk > 0);

        // Counting again is served from the cache.
        tree.get_number_of_leaf_values(&mut (), &mut cache).unwrap();
        assert_eq!(reads.get(), first_walk);

        tree.set_root_node(0, 512, NODE_DATA_SIZE, 0).unwrap();
        tree.get_number_of_leaf_values(&mut (), &mut cache).unwrap();
        assert_eq!(reads.get(), first_walk * 2);
    }

    #[test]
    fn deleted_leaves_are_counted_separately_and_reachable() {
        let mut node_reader = FanoutReader::new();
        node_reader.delete_first_leaf = true;
        let mut tree = Btree::new(node_reader);
        tree.set_root_node(0, 512, NODE_DATA_SIZE, 0).unwrap();
        let mut cache = cache();

        let live = tree.get_number_of_leaf_values(&mut (), &mut cache).unwrap();
        let deleted = tree
            .get_number_of_deleted_leaf_values(&mut (), &mut cache)
            .unwrap();
        assert_eq!(live + deleted, 512);
        assert_eq!(deleted, 1);

        let leaf_value = tree
            .get_deleted_leaf_value_by_index(&mut (), &mut cache, 0)
            .unwrap();
        assert!(leaf_value.is_deleted());
        assert!(tree
            .get_deleted_leaf_value_by_index(&mut (), &mut cache, 1)
            .is_err());
    }

    #[test]
    fn branch_and_leaf_entries_are_mutually_exclusive() {
        let mut node = BtreeNode::new(0, Range::new(0, 0, 512, 0).unwrap(), 1);
        node.append_sub_node(0, 512, 512, 0, b"k").unwrap();
        let err = node.append_leaf_value(0, 1024, 512, 0, b"v").unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Argument(ArgumentError::ConflictingValue(_))
        ));

        let mut node = BtreeNode::new(3, Range::new(0, 0, 512, 0).unwrap(), 1);
        node.append_leaf_value(0, 1024, 512, 0, b"v").unwrap();
        assert!(node.append_sub_node(0, 512, 512, 0, b"k").is_err());
        assert!(node.is_leaf());
    }

    #[test]
    fn split_detaches_the_upper_sub_nodes() {
        let mut node = BtreeNode::new(1, Range::new(0, 0, 512, 0).unwrap(), 1);
        for sub_node_index in 0..6 {
            node.append_sub_node(0, (sub_node_index + 1) * 512, 512, 0, &[])
                .unwrap();
        }
        let sibling = node.split_sub_nodes(4).unwrap();
        assert_eq!(node.number_of_sub_nodes(), 4);
        assert_eq!(sibling.number_of_sub_nodes(), 2);
        assert_eq!(sibling.level(), 1);
        assert_eq!(
            sibling.sub_node_by_index(0).unwrap().data_range().offset(),
            5 * 512
        );
        assert!(node.split_sub_nodes(7).is_err());
    }

    #[test]
    fn insert_shifts_sub_nodes_up() {
        let mut node = BtreeNode::new(1, Range::new(0, 0, 512, 0).unwrap(), 1);
        node.append_sub_node(0, 512, 512, 0, &[]).unwrap();
        node.append_sub_node(0, 1536, 512, 0, &[]).unwrap();
        node.insert_sub_node(1, 0, 1024, 512, 0, &[]).unwrap();
        assert_eq!(node.number_of_sub_nodes(), 3);
        assert_eq!(
            node.sub_node_by_index(1).unwrap().data_range().offset(),
            1024
        );
    }

    #[test]
    fn deleting_a_node_marks_its_leaf_values() {
        let mut node = BtreeNode::new(3, Range::new(0, 0, 512, 0).unwrap(), 1);
        node.append_leaf_value(0, 512, 512, 0, &[]).unwrap();
        node.append_leaf_value(0, 1024, 512, 0, &[]).unwrap();
        assert_eq!(node.number_of_leaf_values(), 2);

        node.set_deleted();
        assert!(node.is_deleted());
        assert_eq!(node.number_of_leaf_values(), 0);
        assert_eq!(node.number_of_deleted_leaf_values(), 2);
        assert!(node.leaf_value_by_index(0).unwrap().is_deleted());
    }
}
