//! Combine the partial counters produced by the workers
//!
//! A counter that was only reset is the identity of `merge`, and `merge` is
//! associative: the partial counters of a group can be combined in any grouping as
//! long as their order is kept. List and `GROUP_CONCAT` depend on that order

use super::{CounterAggregator, CounterBuffer, CounterRef, Result};

/// Merge all of the `partials` into `dst`, in order. Returns the number of merged
/// counters
pub fn merge_all<'a, A, I>(aggregator: &mut A, dst: &mut CounterBuffer<'_>, partials: I) -> Result<usize>
where
    A: CounterAggregator + ?Sized,
    I: IntoIterator<Item = CounterRef<'a>>,
{
    let mut merged = 0;
    for partial in partials {
        aggregator.merge(dst, partial)?;
        merged += 1;
    }
    Ok(merged)
}
