//! Counter aggregators
//!
//! Each aggregator describes the layout of a counter that lives in the grouping table
//! and knows how to fold values, whole packs and other counters into it. The grouping
//! table owns the bytes: it allocates a [`CounterBuffer`] of exactly
//! [`CounterAggregator::buffer_byte_size`] bytes per group and calls
//! [`CounterAggregator::reset`] before the first use.
//!
//! The set of aggregators is closed, [`Aggregator`] dispatches to all of them. Forms a
//! variant does not support fail with [`AggregationError::Unsupported`] instead of
//! silently doing nothing

pub mod avg;
pub mod bitwise;
pub mod buffer;
pub mod count;
pub mod group_concat;
pub mod list;
pub mod merge;
pub mod min_max;
pub mod moments;
pub mod pack;
pub mod skip;
pub mod sum;
pub mod text;

use std::borrow::Cow;
use std::fmt::{self, Display};

use snafu::Snafu;

pub use self::buffer::{CounterBuffer, CounterRef};
use self::skip::StatisticsState;
use crate::common::types::{GroupHandle, Numeric};
use crate::macros::for_all_counter_aggregators;

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum AggregationError {
    #[snafu(display("Overflow happens when computing the `{func}` aggregation function"))]
    Overflow { func: &'static str },
    #[snafu(display("`{func}` counter expects a buffer of {expected} bytes, found {actual} bytes"))]
    BufferWidthMismatch {
        func: &'static str,
        expected: usize,
        actual: usize,
    },
    #[snafu(display("`{func}` aggregation function does not support `{operation}`"))]
    Unsupported {
        func: &'static str,
        operation: &'static str,
    },
    #[snafu(display("`{func}` aggregation function expects {expected} value, found {} value `{found}`", found.kind()))]
    ValueTypeMismatch {
        func: &'static str,
        expected: &'static str,
        found: Numeric,
    },
    #[snafu(display("Text of {len} bytes exceeds the `{func}` counter capacity of {capacity} bytes"))]
    TextTooLong {
        func: &'static str,
        len: usize,
        capacity: usize,
    },
    #[snafu(display("`{func}` text counter can not hold {capacity} bytes, the length field is 16 bits"))]
    TextCapacity { func: &'static str, capacity: usize },
    #[snafu(display(
        "`{func}` is asked whether the pack can change the aggregation while its statistics are stale"
    ))]
    StaleStatistics { func: &'static str },
}

/// Aggregation result
pub type Result<T> = std::result::Result<T, AggregationError>;

/// Which pack statistics the aggregator consumes, in the pack fast path and in the skip
/// decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackNeeds {
    /// Number of rows in the pack
    pub size: bool,
    /// Number of not null rows in the pack
    pub not_nulls: bool,
    /// Sum of the pack
    pub sum: bool,
    /// Minimum of the pack
    pub min: bool,
    /// Maximum of the pack
    pub max: bool,
    /// Result of the pack fast path does not depend on distinctness
    pub distinct_irrelevant: bool,
}

impl PackNeeds {
    /// Aggregator does not consume pack statistics
    pub const NONE: Self = Self {
        size: false,
        not_nulls: false,
        sum: false,
        min: false,
        max: false,
        distinct_irrelevant: false,
    };
}

/// Capabilities of an aggregator, the caller uses them to decide how to feed it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Nulls are never passed to the value carrying puts
    pub ignore_nulls: bool,
    /// Result is the same whether or not the input is deduplicated
    pub ignore_distinct: bool,
    /// Multiplicity of the value changes the result
    pub factor_needed: bool,
    /// Pack statistics the aggregator consumes
    pub pack: PackNeeds,
}

impl Capabilities {
    /// Null ignoring, distinct sensitive and factor sensitive aggregator without pack
    /// statistics
    pub const fn new() -> Self {
        Self {
            ignore_nulls: true,
            ignore_distinct: false,
            factor_needed: true,
            pack: PackNeeds::NONE,
        }
    }

    /// Nulls are passed to the aggregator, as rows
    pub const fn count_nulls(self) -> Self {
        Self {
            ignore_nulls: false,
            ..self
        }
    }

    /// Duplicated values do not change the result
    pub const fn distinct_irrelevant(self) -> Self {
        Self {
            ignore_distinct: true,
            ..self
        }
    }

    /// Repeating a value does not change the result
    pub const fn factor_irrelevant(self) -> Self {
        Self {
            factor_needed: false,
            ..self
        }
    }

    /// Pack statistics the aggregator consumes
    pub const fn with_pack(self, pack: PackNeeds) -> Self {
        Self { pack, ..self }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new()
    }
}

/// Stringify the aggregator
pub trait Stringify {
    /// Get name of the aggregator
    fn name(&self) -> &'static str;

    /// Display message, the name with the configuration of the aggregator
    fn display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Trait for all of the counter aggregators
///
/// # Protocol
///
/// - [`reset`] must be called on a buffer before any other method touches it, calling
///   it again returns the counter to the empty state
/// - All of the buffers passed to an aggregator have exactly [`buffer_byte_size`]
///   bytes, otherwise [`AggregationError::BufferWidthMismatch`] is returned
/// - `merge(dst, src)` leaves `dst` as if all of the values folded into `src` had been
///   folded into `dst`
/// - The skip statistics are refreshed with [`reset_statistics`], [`update_statistics`]
///   for each group and [`set_statistics_updated`]. Any mutation of a counter makes
///   them stale again. [`pack_cannot_change_aggregation`] returning `true` guarantees
///   that folding the pack would not change any counter
///
/// [`reset`]: CounterAggregator::reset
/// [`buffer_byte_size`]: CounterAggregator::buffer_byte_size
/// [`reset_statistics`]: CounterAggregator::reset_statistics
/// [`update_statistics`]: CounterAggregator::update_statistics
/// [`set_statistics_updated`]: CounterAggregator::set_statistics_updated
/// [`pack_cannot_change_aggregation`]: CounterAggregator::pack_cannot_change_aggregation
pub trait CounterAggregator: Stringify + Send + Sync {
    /// Number of bytes of the counter
    fn buffer_byte_size(&self) -> usize;

    /// Capabilities of the aggregator
    fn capabilities(&self) -> Capabilities;

    /// State of the skip statistics
    fn statistics(&self) -> StatisticsState;

    /// Mutable state of the skip statistics
    fn statistics_mut(&mut self) -> &mut StatisticsState;

    /// Set the counter to the empty group state
    fn reset(&mut self, buf: &mut CounterBuffer<'_>) -> Result<()>;

    /// Fold a row without value, `factor` times
    fn put_row(&mut self, _buf: &mut CounterBuffer<'_>, _factor: i64) -> Result<()> {
        UnsupportedSnafu {
            func: self.name(),
            operation: "put_row",
        }
        .fail()
    }

    /// Fold a numeric value, `factor` times
    fn put_numeric(
        &mut self,
        _buf: &mut CounterBuffer<'_>,
        _value: Numeric,
        _factor: i64,
    ) -> Result<()> {
        UnsupportedSnafu {
            func: self.name(),
            operation: "put_numeric",
        }
        .fail()
    }

    /// Fold a text value, `factor` times
    fn put_text(&mut self, _buf: &mut CounterBuffer<'_>, _value: &[u8], _factor: i64) -> Result<()> {
        UnsupportedSnafu {
            func: self.name(),
            operation: "put_text",
        }
        .fail()
    }

    /// Merge the partial counter `src` into `dst`
    fn merge(&mut self, dst: &mut CounterBuffer<'_>, src: CounterRef<'_>) -> Result<()>;

    /// The grouping table dropped the group, forget the state kept outside of its
    /// counter
    #[inline]
    fn release(&mut self, _handle: GroupHandle) {}

    /// Read the result as integer, doubles are returned with their bit pattern
    fn get_value_64(&self, _buf: CounterRef<'_>) -> Result<Option<i64>> {
        UnsupportedSnafu {
            func: self.name(),
            operation: "get_value_64",
        }
        .fail()
    }

    /// Read the result as double
    fn get_value_d(&self, _buf: CounterRef<'_>) -> Result<Option<f64>> {
        UnsupportedSnafu {
            func: self.name(),
            operation: "get_value_d",
        }
        .fail()
    }

    /// Read the result as text
    fn get_value_t<'a>(&self, _buf: CounterRef<'a>) -> Result<Option<Cow<'a, [u8]>>> {
        UnsupportedSnafu {
            func: self.name(),
            operation: "get_value_t",
        }
        .fail()
    }

    /// Nulls are never passed to the value carrying puts
    #[inline]
    fn ignore_nulls(&self) -> bool {
        self.capabilities().ignore_nulls
    }

    /// Result is the same whether or not the input is deduplicated
    #[inline]
    fn ignore_distinct(&self) -> bool {
        self.capabilities().ignore_distinct
    }

    /// Multiplicity of the value changes the result
    #[inline]
    fn factor_needed(&self) -> bool {
        self.capabilities().factor_needed
    }

    /// Pack statistics the aggregator consumes
    #[inline]
    fn pack_needs(&self) -> PackNeeds {
        self.capabilities().pack
    }

    /// Number of rows of the pack, already multiplied by the factor
    fn set_aggregate_pack_no_obj(&mut self, _rows: i64) -> Result<()> {
        UnsupportedSnafu {
            func: self.name(),
            operation: "set_aggregate_pack_no_obj",
        }
        .fail()
    }

    /// Number of not null rows of the pack, already multiplied by the factor
    fn set_aggregate_pack_not_nulls(&mut self, _not_nulls: i64) -> Result<()> {
        UnsupportedSnafu {
            func: self.name(),
            operation: "set_aggregate_pack_not_nulls",
        }
        .fail()
    }

    /// Sum of the pack, the aggregator multiplies it by `factor`
    fn set_aggregate_pack_sum(&mut self, _sum: Numeric, _factor: i64) -> Result<()> {
        UnsupportedSnafu {
            func: self.name(),
            operation: "set_aggregate_pack_sum",
        }
        .fail()
    }

    /// Minimum of the pack
    fn set_aggregate_pack_min(&mut self, _min: Numeric) -> Result<()> {
        UnsupportedSnafu {
            func: self.name(),
            operation: "set_aggregate_pack_min",
        }
        .fail()
    }

    /// Maximum of the pack
    fn set_aggregate_pack_max(&mut self, _max: Numeric) -> Result<()> {
        UnsupportedSnafu {
            func: self.name(),
            operation: "set_aggregate_pack_max",
        }
        .fail()
    }

    /// Fold the whole pack, described by the statistics set before, into the counter.
    /// Returns false if the aggregator can not do it, the caller then scans the pack
    fn aggregate_pack(&mut self, _buf: &mut CounterBuffer<'_>) -> Result<bool> {
        Ok(false)
    }

    /// Skip statistics are stale
    #[inline]
    fn statistics_needs_update(&self) -> bool {
        self.statistics().needs_update()
    }

    /// All of the groups are visited, the skip statistics are fresh
    #[inline]
    fn set_statistics_updated(&mut self) {
        self.statistics_mut().mark_fresh()
    }

    /// Start refreshing the skip statistics
    fn reset_statistics(&mut self) {
        self.statistics_mut().invalidate();
        self.clear_skip_statistics();
    }

    /// Clear the aggregator specific skip statistics
    fn clear_skip_statistics(&mut self) {}

    /// Fold the counter of a group into the skip statistics. Returns true if the
    /// remaining groups can not change the decision
    fn update_statistics(&mut self, _buf: CounterRef<'_>) -> Result<bool> {
        Ok(true)
    }

    /// Returns true if the pack described by the statistics set before can not change
    /// any counter
    fn pack_cannot_change_aggregation(&self) -> Result<bool> {
        self.statistics().ensure_fresh(self.name())?;
        Ok(self.pack_is_inert())
    }

    /// Aggregator specific part of [`pack_cannot_change_aggregation`], the statistics
    /// are fresh when it is called
    ///
    /// [`pack_cannot_change_aggregation`]: CounterAggregator::pack_cannot_change_aggregation
    fn pack_is_inert(&self) -> bool {
        false
    }
}

macro_rules! impl_aggregator {
    ($({$variant:ident, $ty:ty}),+) => {
        /// All of the counter aggregators
        #[derive(Debug, Clone)]
        pub enum Aggregator {
            $(
                #[doc = concat!("`", stringify!($variant), "` aggregator")]
                $variant($ty),
            )+
        }

        $(
            impl From<$ty> for Aggregator {
                #[inline]
                fn from(aggregator: $ty) -> Self {
                    Self::$variant(aggregator)
                }
            }
        )+

        impl Stringify for Aggregator {
            fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant(a) => a.name(),)+
                }
            }

            fn display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Self::$variant(a) => a.display(f),)+
                }
            }
        }

        impl CounterAggregator for Aggregator {
            fn buffer_byte_size(&self) -> usize {
                match self {
                    $(Self::$variant(a) => a.buffer_byte_size(),)+
                }
            }

            fn capabilities(&self) -> Capabilities {
                match self {
                    $(Self::$variant(a) => a.capabilities(),)+
                }
            }

            fn statistics(&self) -> StatisticsState {
                match self {
                    $(Self::$variant(a) => a.statistics(),)+
                }
            }

            fn statistics_mut(&mut self) -> &mut StatisticsState {
                match self {
                    $(Self::$variant(a) => a.statistics_mut(),)+
                }
            }

            fn reset(&mut self, buf: &mut CounterBuffer<'_>) -> Result<()> {
                match self {
                    $(Self::$variant(a) => a.reset(buf),)+
                }
            }

            fn put_row(&mut self, buf: &mut CounterBuffer<'_>, factor: i64) -> Result<()> {
                match self {
                    $(Self::$variant(a) => a.put_row(buf, factor),)+
                }
            }

            fn put_numeric(
                &mut self,
                buf: &mut CounterBuffer<'_>,
                value: Numeric,
                factor: i64,
            ) -> Result<()> {
                match self {
                    $(Self::$variant(a) => a.put_numeric(buf, value, factor),)+
                }
            }

            fn put_text(
                &mut self,
                buf: &mut CounterBuffer<'_>,
                value: &[u8],
                factor: i64,
            ) -> Result<()> {
                match self {
                    $(Self::$variant(a) => a.put_text(buf, value, factor),)+
                }
            }

            fn merge(&mut self, dst: &mut CounterBuffer<'_>, src: CounterRef<'_>) -> Result<()> {
                match self {
                    $(Self::$variant(a) => a.merge(dst, src),)+
                }
            }

            fn release(&mut self, handle: GroupHandle) {
                match self {
                    $(Self::$variant(a) => a.release(handle),)+
                }
            }

            fn get_value_64(&self, buf: CounterRef<'_>) -> Result<Option<i64>> {
                match self {
                    $(Self::$variant(a) => a.get_value_64(buf),)+
                }
            }

            fn get_value_d(&self, buf: CounterRef<'_>) -> Result<Option<f64>> {
                match self {
                    $(Self::$variant(a) => a.get_value_d(buf),)+
                }
            }

            fn get_value_t<'a>(&self, buf: CounterRef<'a>) -> Result<Option<Cow<'a, [u8]>>> {
                match self {
                    $(Self::$variant(a) => a.get_value_t(buf),)+
                }
            }

            fn set_aggregate_pack_no_obj(&mut self, rows: i64) -> Result<()> {
                match self {
                    $(Self::$variant(a) => a.set_aggregate_pack_no_obj(rows),)+
                }
            }

            fn set_aggregate_pack_not_nulls(&mut self, not_nulls: i64) -> Result<()> {
                match self {
                    $(Self::$variant(a) => a.set_aggregate_pack_not_nulls(not_nulls),)+
                }
            }

            fn set_aggregate_pack_sum(&mut self, sum: Numeric, factor: i64) -> Result<()> {
                match self {
                    $(Self::$variant(a) => a.set_aggregate_pack_sum(sum, factor),)+
                }
            }

            fn set_aggregate_pack_min(&mut self, min: Numeric) -> Result<()> {
                match self {
                    $(Self::$variant(a) => a.set_aggregate_pack_min(min),)+
                }
            }

            fn set_aggregate_pack_max(&mut self, max: Numeric) -> Result<()> {
                match self {
                    $(Self::$variant(a) => a.set_aggregate_pack_max(max),)+
                }
            }

            fn aggregate_pack(&mut self, buf: &mut CounterBuffer<'_>) -> Result<bool> {
                match self {
                    $(Self::$variant(a) => a.aggregate_pack(buf),)+
                }
            }

            fn reset_statistics(&mut self) {
                match self {
                    $(Self::$variant(a) => a.reset_statistics(),)+
                }
            }

            fn clear_skip_statistics(&mut self) {
                match self {
                    $(Self::$variant(a) => a.clear_skip_statistics(),)+
                }
            }

            fn update_statistics(&mut self, buf: CounterRef<'_>) -> Result<bool> {
                match self {
                    $(Self::$variant(a) => a.update_statistics(buf),)+
                }
            }

            fn pack_cannot_change_aggregation(&self) -> Result<bool> {
                match self {
                    $(Self::$variant(a) => a.pack_cannot_change_aggregation(),)+
                }
            }

            fn pack_is_inert(&self) -> bool {
                match self {
                    $(Self::$variant(a) => a.pack_is_inert(),)+
                }
            }
        }
    };
}

for_all_counter_aggregators!(impl_aggregator);

impl Aggregator {
    /// Copy of the aggregator for another worker. Configuration and shared side tables
    /// are kept, the skip statistics of the copy are stale
    pub fn fork(&self) -> Self {
        let mut copy = self.clone();
        copy.reset_statistics();
        copy
    }
}

impl Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Stringify::display(self, f)
    }
}

/// Parse the text as a real number, surrounding whitespaces are ignored
pub(crate) fn parse_real(text: &[u8]) -> Option<f64> {
    std::str::from_utf8(text).ok()?.trim().parse().ok()
}

/// Parse the text as a 64-bit integer, surrounding whitespaces are ignored
pub(crate) fn parse_integer(text: &[u8]) -> Option<i64> {
    std::str::from_utf8(text).ok()?.trim().parse().ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use expect_test::expect;

    use super::*;

    /// Counter owned by the test, instead of the grouping table
    #[derive(Debug)]
    pub(crate) struct OwnedCounter {
        handle: GroupHandle,
        bytes: Vec<u8>,
    }

    impl OwnedCounter {
        /// Allocate and reset the counter of `aggregator`
        pub(crate) fn new(aggregator: &mut impl CounterAggregator, id: u64) -> Self {
            let mut counter = Self {
                handle: GroupHandle::new(id),
                bytes: vec![0xAB; aggregator.buffer_byte_size()],
            };
            aggregator.reset(&mut counter.buf()).unwrap();
            counter
        }

        pub(crate) fn buf(&mut self) -> CounterBuffer<'_> {
            CounterBuffer::new(self.handle, &mut self.bytes)
        }

        pub(crate) fn view(&self) -> CounterRef<'_> {
            CounterRef::new(self.handle, &self.bytes)
        }
    }

    #[test]
    fn test_unsupported_fails_fast() {
        let mut sum = Aggregator::from(sum::Sum64::new());
        let mut counter = OwnedCounter::new(&mut sum, 0);
        let err = sum.put_text(&mut counter.buf(), b"1", 1).unwrap_err();
        expect!["`Sum64` aggregation function does not support `put_text`"]
            .assert_eq(&err.to_string());

        let err = sum.get_value_t(counter.view()).unwrap_err();
        expect!["`Sum64` aggregation function does not support `get_value_t`"]
            .assert_eq(&err.to_string());
    }

    #[test]
    fn test_value_type_mismatch() {
        let mut sum = Aggregator::from(sum::Sum64::new());
        let mut counter = OwnedCounter::new(&mut sum, 0);
        let err = sum
            .put_numeric(&mut counter.buf(), Numeric::Double(0.5), 1)
            .unwrap_err();
        expect!["`Sum64` aggregation function expects integer value, found double value `0.5`"]
            .assert_eq(&err.to_string());
    }

    #[test]
    fn test_display_aggregators() {
        let aggregators: Vec<Aggregator> = vec![
            count::CountStar64::new(i64::MAX).into(),
            avg::Avg64::new(2).into(),
            min_max::MinDouble::new().into(),
            moments::Moments::new_integer(moments::MomentStatistic::StdSamp, 1).into(),
            bitwise::BitXor::new().into(),
        ];
        let displayed = aggregators
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        expect![[r#"
            CountStar64
            Avg64(precision: 2)
            MinDouble
            StdSamp64(precision: 1)
            BitXor"#]]
        .assert_eq(&displayed);
    }

    #[test]
    fn test_fork_invalidates_statistics() {
        let mut min = Aggregator::from(min_max::Min64::new());
        min.reset_statistics();
        min.set_statistics_updated();
        assert!(!min.statistics_needs_update());
        let fork = min.fork();
        assert!(fork.statistics_needs_update());
        assert!(!min.statistics_needs_update());
    }

    #[test]
    fn test_parse_text() {
        assert_eq!(parse_real(b" 2.5 "), Some(2.5));
        assert_eq!(parse_real(b"abc"), None);
        assert_eq!(parse_integer(b"-12"), Some(-12));
        assert_eq!(parse_integer(b"1.5"), None);
    }
}
