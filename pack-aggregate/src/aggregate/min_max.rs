//! Min/Max aggregation function
//!
//! FIXME: `NaN` never replaces the current extreme and is never replaced by a number
//! folded into an empty group first, the result is undetermined for doubles that
//! contain `NaN`

use std::fmt::Debug;

use snafu::OptionExt;

use super::buffer::{Field, SlotValue};
use super::skip::StatisticsState;
use super::{
    Capabilities, CounterAggregator, CounterBuffer, CounterRef, PackNeeds, Result, Stringify,
    UnsupportedSnafu, ValueTypeMismatchSnafu,
};
use crate::common::types::{
    MINUS_INF_64, NULL_VALUE_32, NULL_VALUE_64, Numeric, PLUS_INF_64, not_null_double,
};

/// Value stored in the fixed width counters of min/max/list
pub trait ExtremeValue: SlotValue + PartialOrd + Debug + Send + Sync + 'static {
    /// Name of the min aggregator
    const MIN_NAME: &'static str;
    /// Name of the max aggregator
    const MAX_NAME: &'static str;
    /// Name of the list aggregator
    const LIST_NAME: &'static str;
    /// Kind of the accepted [`Numeric`], used in error messages
    const KIND: &'static str;
    /// The value is a double, it can be read with `get_value_d`
    const IS_DOUBLE: bool;

    /// Load the counter, `None` is null
    fn load(bytes: &[u8]) -> Option<Self>;

    /// Store the null marker
    fn store_null(bytes: &mut [u8]);

    /// Convert the value passed to the aggregator
    fn from_numeric(value: Numeric) -> Option<Self>;

    /// Convert the pack statistics. Integer statistics of double packs carry the
    /// infinity markers
    fn from_pack_stat(value: Numeric) -> Option<Self> {
        Self::from_numeric(value)
    }

    /// Integer projection, doubles return their bit pattern
    fn to_i64(self) -> i64;

    /// Double projection
    fn to_f64(self) -> f64;
}

impl ExtremeValue for i32 {
    const MIN_NAME: &'static str = "Min32";
    const MAX_NAME: &'static str = "Max32";
    const LIST_NAME: &'static str = "List32";
    const KIND: &'static str = "32-bit integer";
    const IS_DOUBLE: bool = false;

    #[inline]
    fn load(bytes: &[u8]) -> Option<Self> {
        let v = Self::decode(bytes);
        (v != NULL_VALUE_32).then_some(v)
    }

    #[inline]
    fn store_null(bytes: &mut [u8]) {
        NULL_VALUE_32.encode(bytes)
    }

    #[inline]
    fn from_numeric(value: Numeric) -> Option<Self> {
        match value {
            Numeric::Int(v) => i32::try_from(v).ok().filter(|v| *v != NULL_VALUE_32),
            Numeric::Double(_) => None,
        }
    }

    #[inline]
    fn to_i64(self) -> i64 {
        self as i64
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl ExtremeValue for i64 {
    const MIN_NAME: &'static str = "Min64";
    const MAX_NAME: &'static str = "Max64";
    const LIST_NAME: &'static str = "List64";
    const KIND: &'static str = "64-bit integer";
    const IS_DOUBLE: bool = false;

    #[inline]
    fn load(bytes: &[u8]) -> Option<Self> {
        let v = Self::decode(bytes);
        (v != NULL_VALUE_64).then_some(v)
    }

    #[inline]
    fn store_null(bytes: &mut [u8]) {
        NULL_VALUE_64.encode(bytes)
    }

    #[inline]
    fn from_numeric(value: Numeric) -> Option<Self> {
        match value {
            Numeric::Int(v) if v != NULL_VALUE_64 => Some(v),
            _ => None,
        }
    }

    #[inline]
    fn to_i64(self) -> i64 {
        self
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl ExtremeValue for f64 {
    const MIN_NAME: &'static str = "MinDouble";
    const MAX_NAME: &'static str = "MaxDouble";
    const LIST_NAME: &'static str = "ListDouble";
    const KIND: &'static str = "double";
    const IS_DOUBLE: bool = true;

    #[inline]
    fn load(bytes: &[u8]) -> Option<Self> {
        Field::<f64>::at(0).read_nullable(bytes)
    }

    #[inline]
    fn store_null(bytes: &mut [u8]) {
        Field::<f64>::at(0).write_null(bytes)
    }

    #[inline]
    fn from_numeric(value: Numeric) -> Option<Self> {
        match value {
            Numeric::Double(v) => Some(not_null_double(v)),
            Numeric::Int(_) => None,
        }
    }

    #[inline]
    fn from_pack_stat(value: Numeric) -> Option<Self> {
        match value {
            Numeric::Double(v) => Some(not_null_double(v)),
            Numeric::Int(MINUS_INF_64) => Some(f64::NEG_INFINITY),
            Numeric::Int(PLUS_INF_64) => Some(f64::INFINITY),
            Numeric::Int(v) => Some(v as f64),
        }
    }

    #[inline]
    fn to_i64(self) -> i64 {
        self.to_bits() as i64
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }
}

/// Convert the value or fail with the kind expected by `func`
pub(crate) fn extreme_value<T: ExtremeValue>(func: &'static str, value: Numeric) -> Result<T> {
    T::from_numeric(value).context(ValueTypeMismatchSnafu {
        func,
        expected: T::KIND,
        found: value,
    })
}

/// Min/Max aggregation function
///
/// # Generic
///
/// - `IS_MIN`: If it is true, it will be min aggregation function
/// - `T`: value of the counter
///
/// The skip statistics keep the least extreme current value over the groups: the
/// largest minimum for min, the smallest maximum for max. A pack whose own extreme can
/// not beat it can not change any group
#[derive(Debug, Clone)]
pub struct MinMax<const IS_MIN: bool, T> {
    name: &'static str,
    pack_extreme: Option<T>,
    stat: Option<T>,
    null_group_found: bool,
    stats: StatisticsState,
}

macro_rules! min_max_aliases {
    ($($ty:ty => $suffix:tt),+) => {
        paste::paste! {
            $(
                #[doc = concat!("Min over `", stringify!($ty), "`")]
                pub type [<Min $suffix>] = MinMax<true, $ty>;
                #[doc = concat!("Max over `", stringify!($ty), "`")]
                pub type [<Max $suffix>] = MinMax<false, $ty>;
            )+
        }
    };
}

min_max_aliases!(i32 => 32, i64 => 64, f64 => Double);

impl<const IS_MIN: bool, T: ExtremeValue> Default for MinMax<IS_MIN, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const IS_MIN: bool, T: ExtremeValue> MinMax<IS_MIN, T> {
    /// Create a new min/max
    pub fn new() -> Self {
        Self {
            name: if IS_MIN { T::MIN_NAME } else { T::MAX_NAME },
            pack_extreme: None,
            stat: None,
            null_group_found: false,
            stats: StatisticsState::default(),
        }
    }

    /// `candidate` replaces `current`
    #[inline]
    fn beats(candidate: T, current: T) -> bool {
        if IS_MIN {
            candidate < current
        } else {
            candidate > current
        }
    }

    fn fold(&mut self, bytes: &mut [u8], value: T) {
        match T::load(bytes) {
            Some(current) if !Self::beats(value, current) => {}
            _ => {
                value.encode(bytes);
                self.stats.invalidate();
            }
        }
    }

    fn set_pack_extreme(&mut self, operation: &'static str, expected_min: bool, value: Numeric) -> Result<()> {
        if IS_MIN != expected_min {
            return UnsupportedSnafu {
                func: self.name,
                operation,
            }
            .fail();
        }
        self.pack_extreme = Some(T::from_pack_stat(value).context(ValueTypeMismatchSnafu {
            func: self.name,
            expected: T::KIND,
            found: value,
        })?);
        Ok(())
    }
}

impl<const IS_MIN: bool, T: ExtremeValue> Stringify for MinMax<IS_MIN, T> {
    fn name(&self) -> &'static str {
        self.name
    }
}

impl<const IS_MIN: bool, T: ExtremeValue> CounterAggregator for MinMax<IS_MIN, T> {
    fn buffer_byte_size(&self) -> usize {
        T::WIDTH
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new()
            .distinct_irrelevant()
            .factor_irrelevant()
            .with_pack(PackNeeds {
                min: IS_MIN,
                max: !IS_MIN,
                distinct_irrelevant: true,
                ..PackNeeds::NONE
            })
    }

    fn statistics(&self) -> StatisticsState {
        self.stats
    }

    fn statistics_mut(&mut self) -> &mut StatisticsState {
        &mut self.stats
    }

    fn reset(&mut self, buf: &mut CounterBuffer<'_>) -> Result<()> {
        T::store_null(buf.checked_bytes_mut(self.name, T::WIDTH)?);
        self.stats.invalidate();
        Ok(())
    }

    fn put_numeric(&mut self, buf: &mut CounterBuffer<'_>, value: Numeric, _factor: i64) -> Result<()> {
        let value = extreme_value::<T>(self.name, value)?;
        self.fold(buf.checked_bytes_mut(self.name, T::WIDTH)?, value);
        Ok(())
    }

    fn merge(&mut self, dst: &mut CounterBuffer<'_>, src: CounterRef<'_>) -> Result<()> {
        if let Some(partial) = T::load(src.checked_bytes(self.name, T::WIDTH)?) {
            self.fold(dst.checked_bytes_mut(self.name, T::WIDTH)?, partial);
        }
        Ok(())
    }

    fn get_value_64(&self, buf: CounterRef<'_>) -> Result<Option<i64>> {
        Ok(T::load(buf.checked_bytes(self.name, T::WIDTH)?).map(T::to_i64))
    }

    fn get_value_d(&self, buf: CounterRef<'_>) -> Result<Option<f64>> {
        if !T::IS_DOUBLE {
            return UnsupportedSnafu {
                func: self.name,
                operation: "get_value_d",
            }
            .fail();
        }
        Ok(T::load(buf.checked_bytes(self.name, T::WIDTH)?).map(T::to_f64))
    }

    fn set_aggregate_pack_min(&mut self, min: Numeric) -> Result<()> {
        self.set_pack_extreme("set_aggregate_pack_min", true, min)
    }

    fn set_aggregate_pack_max(&mut self, max: Numeric) -> Result<()> {
        self.set_pack_extreme("set_aggregate_pack_max", false, max)
    }

    fn aggregate_pack(&mut self, buf: &mut CounterBuffer<'_>) -> Result<bool> {
        let Some(extreme) = self.pack_extreme.take() else {
            return Ok(false);
        };
        self.fold(buf.checked_bytes_mut(self.name, T::WIDTH)?, extreme);
        Ok(true)
    }

    fn clear_skip_statistics(&mut self) {
        self.stat = None;
        self.null_group_found = false;
    }

    fn update_statistics(&mut self, buf: CounterRef<'_>) -> Result<bool> {
        match T::load(buf.checked_bytes(self.name, T::WIDTH)?) {
            None => {
                // A null group is changed by any not null value
                self.null_group_found = true;
                Ok(true)
            }
            Some(v) => {
                match self.stat {
                    Some(stat) if !Self::beats(stat, v) => {}
                    _ => self.stat = Some(v),
                }
                Ok(false)
            }
        }
    }

    fn pack_is_inert(&self) -> bool {
        if self.null_group_found {
            return false;
        }
        match (self.pack_extreme, self.stat) {
            (Some(pack), Some(stat)) => !Self::beats(pack, stat),
            _ => false,
        }
    }
}
