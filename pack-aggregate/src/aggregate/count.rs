//! Count aggregation function

use std::fmt::Debug;

use num_traits::{NumCast, PrimInt, ToPrimitive};
use snafu::OptionExt;

use super::buffer::{Field, SlotValue};
use super::skip::StatisticsState;
use super::{
    Capabilities, CounterAggregator, CounterBuffer, CounterRef, OverflowSnafu, PackNeeds, Result,
    Stringify, UnsupportedSnafu,
};
use crate::common::types::Numeric;

/// Word of the counter
pub trait CountWord: PrimInt + SlotValue + Debug + Send + Sync + 'static {
    /// Name of the `COUNT(col)` aggregator
    const COUNT_NAME: &'static str;
    /// Name of the `COUNT(*)` aggregator
    const COUNT_STAR_NAME: &'static str;
}

impl CountWord for i32 {
    const COUNT_NAME: &'static str = "Count32";
    const COUNT_STAR_NAME: &'static str = "CountStar32";
}

impl CountWord for i64 {
    const COUNT_NAME: &'static str = "Count64";
    const COUNT_STAR_NAME: &'static str = "CountStar64";
}

/// Count aggregation function
///
/// # Generic
///
/// - `W`: word of the counter, the buffer has `size_of::<W>()` bytes
/// - `STAR`: If it is true, it counts all of the rows (`COUNT(*)`), the pack fast path
///   uses the number of rows. Otherwise it counts the not null values and uses the
///   number of not null values of the pack
///
/// The skip statistics compare the smallest counter with `max_counter`, the largest
/// value a counter can reach (e.g. the number of distinct values when the grouping
/// table deduplicates the input)
#[derive(Debug, Clone)]
pub struct Count<W, const STAR: bool> {
    max_counter: W,
    pack_count: Option<W>,
    stat_min: Option<W>,
    stats: StatisticsState,
}

/// `COUNT(*)` with 32-bit counter
pub type CountStar32 = Count<i32, true>;
/// `COUNT(*)` with 64-bit counter
pub type CountStar64 = Count<i64, true>;
/// `COUNT(col)` with 32-bit counter
pub type Count32 = Count<i32, false>;
/// `COUNT(col)` with 64-bit counter
pub type Count64 = Count<i64, false>;

impl<W: CountWord, const STAR: bool> Count<W, STAR> {
    const VALUE: Field<W> = Field::at(0);

    /// Create a new count, `max_counter` is saturated to the range of the word
    pub fn new(max_counter: i64) -> Self {
        Self {
            max_counter: <W as NumCast>::from(max_counter).unwrap_or_else(W::max_value),
            pack_count: None,
            stat_min: None,
            stats: StatisticsState::default(),
        }
    }

    fn to_word(&self, v: i64) -> Result<W> {
        <W as NumCast>::from(v).context(OverflowSnafu { func: self.name() })
    }

    fn add(&self, bytes: &mut [u8], delta: W) -> Result<()> {
        let sum = Self::VALUE
            .read(bytes)
            .checked_add(&delta)
            .context(OverflowSnafu { func: self.name() })?;
        Self::VALUE.write(bytes, sum);
        Ok(())
    }
}

impl<W: CountWord, const STAR: bool> Stringify for Count<W, STAR> {
    fn name(&self) -> &'static str {
        if STAR {
            W::COUNT_STAR_NAME
        } else {
            W::COUNT_NAME
        }
    }
}

impl<W: CountWord, const STAR: bool> CounterAggregator for Count<W, STAR> {
    fn buffer_byte_size(&self) -> usize {
        W::WIDTH
    }

    fn capabilities(&self) -> Capabilities {
        let capabilities = Capabilities::new().with_pack(PackNeeds {
            size: STAR,
            not_nulls: !STAR,
            ..PackNeeds::NONE
        });
        if STAR {
            capabilities.count_nulls()
        } else {
            capabilities
        }
    }

    fn statistics(&self) -> StatisticsState {
        self.stats
    }

    fn statistics_mut(&mut self) -> &mut StatisticsState {
        &mut self.stats
    }

    fn reset(&mut self, buf: &mut CounterBuffer<'_>) -> Result<()> {
        let bytes = buf.checked_bytes_mut(self.name(), W::WIDTH)?;
        Self::VALUE.write(bytes, W::zero());
        self.stats.invalidate();
        Ok(())
    }

    fn put_row(&mut self, buf: &mut CounterBuffer<'_>, factor: i64) -> Result<()> {
        let delta = self.to_word(factor)?;
        let bytes = buf.checked_bytes_mut(self.name(), W::WIDTH)?;
        self.add(bytes, delta)?;
        self.stats.invalidate();
        Ok(())
    }

    fn put_numeric(&mut self, buf: &mut CounterBuffer<'_>, _value: Numeric, factor: i64) -> Result<()> {
        self.put_row(buf, factor)
    }

    fn put_text(&mut self, buf: &mut CounterBuffer<'_>, _value: &[u8], factor: i64) -> Result<()> {
        self.put_row(buf, factor)
    }

    fn merge(&mut self, dst: &mut CounterBuffer<'_>, src: CounterRef<'_>) -> Result<()> {
        let delta = Self::VALUE.read(src.checked_bytes(self.name(), W::WIDTH)?);
        let bytes = dst.checked_bytes_mut(self.name(), W::WIDTH)?;
        self.add(bytes, delta)?;
        self.stats.invalidate();
        Ok(())
    }

    fn get_value_64(&self, buf: CounterRef<'_>) -> Result<Option<i64>> {
        let bytes = buf.checked_bytes(self.name(), W::WIDTH)?;
        Ok(Self::VALUE.read(bytes).to_i64())
    }

    fn get_value_d(&self, buf: CounterRef<'_>) -> Result<Option<f64>> {
        let bytes = buf.checked_bytes(self.name(), W::WIDTH)?;
        Ok(Self::VALUE.read(bytes).to_f64())
    }

    fn set_aggregate_pack_no_obj(&mut self, rows: i64) -> Result<()> {
        if !STAR {
            return UnsupportedSnafu {
                func: self.name(),
                operation: "set_aggregate_pack_no_obj",
            }
            .fail();
        }
        self.pack_count = Some(self.to_word(rows)?);
        Ok(())
    }

    fn set_aggregate_pack_not_nulls(&mut self, not_nulls: i64) -> Result<()> {
        if STAR {
            return UnsupportedSnafu {
                func: self.name(),
                operation: "set_aggregate_pack_not_nulls",
            }
            .fail();
        }
        self.pack_count = Some(self.to_word(not_nulls)?);
        Ok(())
    }

    fn aggregate_pack(&mut self, buf: &mut CounterBuffer<'_>) -> Result<bool> {
        let Some(count) = self.pack_count.take() else {
            return Ok(false);
        };
        let bytes = buf.checked_bytes_mut(self.name(), W::WIDTH)?;
        self.add(bytes, count)?;
        self.stats.invalidate();
        Ok(true)
    }

    fn clear_skip_statistics(&mut self) {
        self.stat_min = None;
    }

    fn update_statistics(&mut self, buf: CounterRef<'_>) -> Result<bool> {
        let v = Self::VALUE.read(buf.checked_bytes(self.name(), W::WIDTH)?);
        self.stat_min = Some(self.stat_min.map_or(v, |m| m.min(v)));
        // One counter below the bound is enough to keep the pack
        Ok(v < self.max_counter)
    }

    fn pack_is_inert(&self) -> bool {
        self.stat_min.is_some_and(|m| m >= self.max_counter)
    }
}
