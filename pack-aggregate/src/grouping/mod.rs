//! Reference grouping table that owns the counters of the aggregators
//!
//! The table maps the group keys to counter rows, allocates a stable [`GroupHandle`]
//! for each row and drives the pack fast path, the skip evaluator and the merges of
//! the partial tables produced by the workers

mod counter_table;

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use parking_lot::Mutex;
use rayon::prelude::*;

pub use self::counter_table::{CounterTable, TableMetrics};
use crate::aggregate::Result;
use crate::common::types::GroupHandle;

/// Next handle of the process
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0);

/// Allocator of the group handles.
///
/// Handles are unique within the process and never reused: the side tables shared by
/// the copies of an aggregator are keyed by them, whichever table created the group
#[derive(Debug, Clone, Copy, Default)]
pub struct HandleAllocator;

impl HandleAllocator {
    /// Allocate a new handle
    #[inline]
    pub fn allocate(&self) -> GroupHandle {
        GroupHandle::new(NEXT_HANDLE.fetch_add(1, Relaxed))
    }
}

/// Aggregate the partitions in parallel and combine the partial tables.
///
/// Each partition is folded into a fork of `template` by `fold`. The partial tables
/// are combined in the order of the partitions, such that the order sensitive
/// aggregators produce the same result as a sequential scan
pub fn aggregate_partitions<P, F>(template: &CounterTable, partitions: &[P], fold: F) -> Result<CounterTable>
where
    P: Sync,
    F: Fn(&mut CounterTable, &P) -> Result<()> + Send + Sync,
{
    let collected = Mutex::new(Vec::with_capacity(partitions.len()));
    partitions
        .par_iter()
        .enumerate()
        .try_for_each(|(index, partition)| {
            let mut table = template.fork();
            fold(&mut table, partition)?;
            collected.lock().push((index, table));
            Ok(())
        })?;

    let mut collected = collected.into_inner();
    collected.sort_unstable_by_key(|(index, _)| *index);
    let mut combined = template.fork();
    for (_, table) in &collected {
        combined.combine(table)?;
    }
    Ok(combined)
}
