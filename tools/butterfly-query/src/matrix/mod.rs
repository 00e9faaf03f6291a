//! Bulk Matrix Computation
//!
//! ## Bucket-based Many-to-Many CH (`bucket_ch`)
//!
//! - Backward search from every target leaves `(column, weight)` buckets
//! - Forward search from every source joins against those buckets
//! - Complexity: O(M × backward_search + N × forward_search + bucket_joins)
//!
//! The backward phase must finish before any forward row starts. Rows write
//! disjoint slices of the matrix, so they can run in parallel.

pub mod bucket_ch;

pub use bucket_ch::{
    many_to_many, many_to_many_parallel, many_to_many_parallel_with_stats,
    many_to_many_with_stats, ManyToManyStats, NodeBucket, ResultMatrix, SearchSpaceWithBuckets,
};
