//! Fold a whole pack into a counter with the statistics of the pack
//!
//! When all of the rows of a pack belong to a single group, the aggregator may compute
//! its contribution from the pack statistics instead of visiting every row. The
//! statistics the aggregator declares in [`PackNeeds`] are loaded first, if one of them
//! is unknown the caller has to scan the pack

use snafu::OptionExt;

use super::{CounterAggregator, CounterBuffer, OverflowSnafu, PackNeeds, Result};
use crate::common::types::Numeric;

/// Statistics of a pack, provided by the storage and never mutated by the aggregators
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PackStatistics {
    /// Number of rows in the pack
    pub rows: i64,
    /// Number of not null rows, `None` if unknown
    pub not_nulls: Option<i64>,
    /// Sum of the not null values, `None` if unknown
    pub sum: Option<Numeric>,
    /// Minimum of the not null values, `None` if unknown
    pub min: Option<Numeric>,
    /// Maximum of the not null values, `None` if unknown
    pub max: Option<Numeric>,
}

impl PackStatistics {
    /// Statistics of a pack with `rows` rows and nothing else known
    pub fn with_rows(rows: i64) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    /// Statistics of an integer pack that contains the `values`, `None` are nulls
    pub fn from_ints(values: &[Option<i64>]) -> Self {
        let not_null = || values.iter().flatten().copied();
        let not_nulls = not_null().count();
        let sum = not_null().try_fold(0_i64, |acc, v| acc.checked_add(v));
        Self {
            rows: values.len() as i64,
            not_nulls: Some(not_nulls as i64),
            sum: if not_nulls == 0 {
                None
            } else {
                sum.map(Numeric::Int)
            },
            min: not_null().min().map(Numeric::Int),
            max: not_null().max().map(Numeric::Int),
        }
    }

    /// Statistics of a double pack that contains the `values`, `None` are nulls
    pub fn from_doubles(values: &[Option<f64>]) -> Self {
        let not_null = || values.iter().flatten().copied();
        let not_nulls = not_null().count();
        let (sum, min, max) = if not_nulls == 0 {
            (None, None, None)
        } else {
            (
                Some(not_null().sum::<f64>()),
                not_null().reduce(f64::min),
                not_null().reduce(f64::max),
            )
        };
        Self {
            rows: values.len() as i64,
            not_nulls: Some(not_nulls as i64),
            sum: sum.map(Numeric::Double),
            min: min.map(Numeric::Double),
            max: max.map(Numeric::Double),
        }
    }

    /// All of the rows in the pack are null
    #[inline]
    pub fn is_null_only(&self) -> bool {
        self.not_nulls == Some(0) || self.rows == 0
    }
}

/// Load the statistics the aggregator needs for the fast path, multiplied by `factor`.
///
/// Returns false if one of the needed statistics is unknown
pub fn load_pack_statistics<A>(
    aggregator: &mut A,
    stats: &PackStatistics,
    factor: i64,
) -> Result<bool>
where
    A: CounterAggregator + ?Sized,
{
    let func = aggregator.name();
    let PackNeeds {
        size,
        not_nulls,
        sum,
        min,
        max,
        ..
    } = aggregator.pack_needs();

    if size {
        let rows = stats
            .rows
            .checked_mul(factor)
            .context(OverflowSnafu { func })?;
        aggregator.set_aggregate_pack_no_obj(rows)?;
    }
    if not_nulls {
        let Some(n) = stats.not_nulls else {
            return Ok(false);
        };
        let n = n.checked_mul(factor).context(OverflowSnafu { func })?;
        aggregator.set_aggregate_pack_not_nulls(n)?;
    }
    if sum {
        let Some(s) = stats.sum else {
            return Ok(false);
        };
        aggregator.set_aggregate_pack_sum(s, factor)?;
    }
    if min {
        let Some(v) = stats.min else {
            return Ok(false);
        };
        aggregator.set_aggregate_pack_min(v)?;
    }
    if max {
        let Some(v) = stats.max else {
            return Ok(false);
        };
        aggregator.set_aggregate_pack_max(v)?;
    }
    Ok(true)
}

/// Fold the pack, whose rows all belong to the group of `buf`, with its statistics.
///
/// Returns false if the caller has to scan the pack row by row
pub fn aggregate_pack_in_one_group<A>(
    aggregator: &mut A,
    buf: &mut CounterBuffer<'_>,
    stats: &PackStatistics,
    factor: i64,
) -> Result<bool>
where
    A: CounterAggregator + ?Sized,
{
    if stats.is_null_only() && aggregator.ignore_nulls() {
        tracing::trace!(
            "`{}` skips the null only pack of group {}",
            aggregator.name(),
            buf.handle()
        );
        return Ok(true);
    }

    if aggregator.pack_needs() == PackNeeds::NONE || !load_pack_statistics(aggregator, stats, factor)? {
        return Ok(false);
    }

    let aggregated = aggregator.aggregate_pack(buf)?;
    tracing::trace!(
        "`{}` aggregated the pack of group {} with statistics: {aggregated}",
        aggregator.name(),
        buf.handle()
    );
    Ok(aggregated)
}
