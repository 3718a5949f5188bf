#![warn(clippy::todo)]
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    rustdoc::private_intra_doc_links,
    rust_2018_idioms,
    missing_docs,
    clippy::needless_borrow,
    clippy::redundant_clone,
    missing_debug_implementations
)]

//! # Pack aggregate
//!
//! Counter aggregators that compute `GROUP BY` results directly against the packs of
//! a columnar storage. Each aggregator owns the binary layout of a counter that lives
//! inside the grouping table, folds values or whole packs into it, merges partial
//! counters and decides, with the statistics it maintains, whether a pack can be
//! skipped because it can not change any result.

pub mod aggregate;
pub mod common;
pub mod grouping;
mod macros;
