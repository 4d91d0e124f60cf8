//! # Bough
//!
//! Bough is a crate providing a parallel linear bounding volume hierarchy
//! (LBVH) over a static collection of axis-aligned boxes, answering batched
//! *spatial* queries (all indexed boxes overlapping a region) and batched
//! *nearest* queries (the `k` indexed boxes closest to a point).
//!
//! ## Goals
//!
//! The hierarchy is built once from an input slice of boxes and queried
//! repeatedly in batches. Both construction and querying are expressed as
//! bulk passes over an [`Engine`], a small capability trait providing
//! data-parallel primitives, so the same algorithms run on the calling
//! thread or on a thread pool:
//!
//! - construction sorts the boxes along a Morton curve, links the internal
//!   nodes with independent per-node prefix searches and aggregates the
//!   bounding boxes bottom-up, with no recursion anywhere;
//! - batched queries produce a compact CSR result layout (`offset` +
//!   `indices`) in two passes sharing one traversal, so variable-length
//!   per-query results land in two contiguous allocations.
//!
//! Bough uses [rayon](https://github.com/rayon-rs/rayon) for
//! parallelization behind the `parallel` feature; the [`Sequential`]
//! engine is always available.
//!
//! ## Example
//!
//! ```
//! use bough::prelude::*;
//! use bough::geometry::DVec3;
//!
//! let boxes = [
//!     BoundingBox::new(DVec3::broadcast(0.0), DVec3::broadcast(1.0)),
//!     BoundingBox::new(DVec3::new(4.0, 0.0, 0.0), DVec3::new(5.0, 1.0, 1.0)),
//! ];
//! let bvh = Bvh::new(&Sequential, &boxes);
//!
//! // Batched spatial query: one result segment per query.
//! let (mut indices, mut offset) = (Vec::new(), Vec::new());
//! let target = Intersects(BoundingBox::new(
//!     DVec3::broadcast(0.5),
//!     DVec3::broadcast(0.75),
//! ));
//! bvh.query(&Sequential, &[target], &mut indices, &mut offset);
//!
//! assert_eq!(offset, [0, 1]);
//! assert_eq!(indices, [0]);
//!
//! // Batched nearest query: `k` slots per query, closest first.
//! let query = Nearest::new(DVec3::new(3.5, 0.5, 0.5), 2);
//! bvh.query_nearest(&Sequential, &[query], &mut indices, &mut offset);
//!
//! assert_eq!(offset, [0, 2]);
//! assert_eq!(indices, [1, 0]);
//! ```
//!
//! Query results always report *original* input indices, independent of
//! the internal leaf order. Nearest queries that find fewer than `k`
//! neighbours leave `-1` (and `+∞` distance) sentinels in the surplus
//! slots; [`query::compact`] removes them when a dense layout is needed.
//!
//! [`Engine`]: engine::Engine
//! [`Sequential`]: engine::Sequential

#![warn(missing_docs)]

/// Bulk-parallel execution engines powering construction and queries.
pub mod engine;
/// Axis-aligned bounding boxes and points.
pub mod geometry;
/// Morton codes of normalized points.
pub mod morton;
/// Query predicates, the batched two-pass dispatcher and result
/// compaction.
pub mod query;
/// The hierarchy itself: nodes, construction and traversal.
pub mod tree;

/// Commonly used types, re-exported.
pub mod prelude {
    #[cfg(feature = "parallel")]
    pub use crate::engine::Parallel;
    pub use crate::engine::{Engine, Sequential};
    pub use crate::geometry::BoundingBox;
    pub use crate::query::{Contains, Intersects, Nearest, Spatial, Within};
    pub use crate::tree::{Bvh, Node};
}
