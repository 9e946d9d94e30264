//! Node identity (spec.md §9): "Store nodes in an arena and reference by
//! integer id. All cross-node lookups (id-to-node, query-name-to-node) are
//! maps over ids, not pointer graphs."

/// A stable small integer id assigned to every alpha and beta node at
/// network construction. Alpha and beta nodes live in separate arenas, so a
/// `NodeId` is only meaningful together with which arena it indexes.
pub type NodeId = usize;
