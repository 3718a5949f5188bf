//! Avg aggregation function
//!
//! The counter keeps the running sum and the number of values, the division is deferred
//! to the read

use std::fmt;

use snafu::OptionExt;

use super::buffer::Field;
use super::skip::StatisticsState;
use super::{
    Capabilities, CounterAggregator, CounterBuffer, CounterRef, OverflowSnafu, PackNeeds, Result,
    Stringify, ValueTypeMismatchSnafu, parse_real,
};
use crate::common::types::Numeric;

const SUM: Field<f64> = Field::at(0);
const COUNT: Field<i64> = Field::at(SUM.end());
const WIDTH: usize = COUNT.end();

const AVG_PACK_NEEDS: PackNeeds = PackNeeds {
    not_nulls: true,
    sum: true,
    ..PackNeeds::NONE
};

/// Running sum and count shared by the avg aggregators
#[derive(Debug, Clone, Default)]
struct AvgCore {
    pack_sum: Option<f64>,
    pack_not_nulls: Option<i64>,
    overflow_warned: bool,
    stats: StatisticsState,
}

impl AvgCore {
    fn fold(&mut self, func: &'static str, bytes: &mut [u8], sum: f64, count: i64) -> Result<()> {
        let new_sum = SUM.read(bytes) + sum;
        let new_count = COUNT
            .read(bytes)
            .checked_add(count)
            .context(OverflowSnafu { func })?;
        if !self.overflow_warned && !(i64::MIN as f64..=i64::MAX as f64).contains(&new_sum) {
            self.overflow_warned = true;
            tracing::warn!("Values rounded in `{func}`, the running sum exceeds the 64-bit range");
        }
        SUM.write(bytes, new_sum);
        COUNT.write(bytes, new_count);
        self.stats.invalidate();
        Ok(())
    }

    fn reset(&mut self, bytes: &mut [u8]) {
        SUM.write(bytes, 0.0);
        COUNT.write(bytes, 0);
        self.stats.invalidate();
    }

    fn merge(&mut self, func: &'static str, dst: &mut [u8], src: &[u8]) -> Result<()> {
        let count = COUNT.read(src);
        if count == 0 {
            return Ok(());
        }
        self.fold(func, dst, SUM.read(src), count)
    }

    fn aggregate_pack(&mut self, func: &'static str, bytes: &mut [u8]) -> Result<bool> {
        match (self.pack_sum.take(), self.pack_not_nulls.take()) {
            (Some(sum), Some(count)) => {
                self.fold(func, bytes, sum, count)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn mean(bytes: &[u8], scale: f64) -> Option<f64> {
        let count = COUNT.read(bytes);
        (count != 0).then(|| SUM.read(bytes) / count as f64 / scale)
    }
}

/// Average of scaled integers. An integer `v` of a column with precision `p` represents
/// `v / 10^p`
#[derive(Debug, Clone)]
pub struct Avg64 {
    precision: u32,
    prec_factor: f64,
    core: AvgCore,
}

impl Avg64 {
    const NAME: &'static str = "Avg64";

    /// Create a new average over integers with `precision` decimal digits
    pub fn new(precision: u32) -> Self {
        Self {
            precision,
            prec_factor: 10_f64.powi(precision as i32),
            core: AvgCore::default(),
        }
    }
}

impl Stringify for Avg64 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(precision: {})", Self::NAME, self.precision)
    }
}

impl CounterAggregator for Avg64 {
    fn buffer_byte_size(&self) -> usize {
        WIDTH
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new().with_pack(AVG_PACK_NEEDS)
    }

    fn statistics(&self) -> StatisticsState {
        self.core.stats
    }

    fn statistics_mut(&mut self) -> &mut StatisticsState {
        &mut self.core.stats
    }

    fn reset(&mut self, buf: &mut CounterBuffer<'_>) -> Result<()> {
        self.core.reset(buf.checked_bytes_mut(Self::NAME, WIDTH)?);
        Ok(())
    }

    fn put_numeric(&mut self, buf: &mut CounterBuffer<'_>, value: Numeric, factor: i64) -> Result<()> {
        let Numeric::Int(v) = value else {
            return ValueTypeMismatchSnafu {
                func: Self::NAME,
                expected: "integer",
                found: value,
            }
            .fail();
        };
        let bytes = buf.checked_bytes_mut(Self::NAME, WIDTH)?;
        self.core
            .fold(Self::NAME, bytes, v as f64 * factor as f64, factor)
    }

    fn merge(&mut self, dst: &mut CounterBuffer<'_>, src: CounterRef<'_>) -> Result<()> {
        let src = src.checked_bytes(Self::NAME, WIDTH)?;
        self.core
            .merge(Self::NAME, dst.checked_bytes_mut(Self::NAME, WIDTH)?, src)
    }

    fn get_value_64(&self, buf: CounterRef<'_>) -> Result<Option<i64>> {
        Ok(self.get_value_d(buf)?.map(|v| v.to_bits() as i64))
    }

    fn get_value_d(&self, buf: CounterRef<'_>) -> Result<Option<f64>> {
        let bytes = buf.checked_bytes(Self::NAME, WIDTH)?;
        Ok(AvgCore::mean(bytes, self.prec_factor))
    }

    fn set_aggregate_pack_not_nulls(&mut self, not_nulls: i64) -> Result<()> {
        self.core.pack_not_nulls = Some(not_nulls);
        Ok(())
    }

    fn set_aggregate_pack_sum(&mut self, sum: Numeric, factor: i64) -> Result<()> {
        let Numeric::Int(s) = sum else {
            return ValueTypeMismatchSnafu {
                func: Self::NAME,
                expected: "integer",
                found: sum,
            }
            .fail();
        };
        self.core.pack_sum = Some(s as f64 * factor as f64);
        Ok(())
    }

    fn aggregate_pack(&mut self, buf: &mut CounterBuffer<'_>) -> Result<bool> {
        self.core
            .aggregate_pack(Self::NAME, buf.checked_bytes_mut(Self::NAME, WIDTH)?)
    }
}

/// Average of doubles
#[derive(Debug, Clone, Default)]
pub struct AvgDouble {
    core: AvgCore,
}

impl AvgDouble {
    const NAME: &'static str = "AvgDouble";

    /// Create a new average over doubles
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stringify for AvgDouble {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

impl CounterAggregator for AvgDouble {
    fn buffer_byte_size(&self) -> usize {
        WIDTH
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new().with_pack(AVG_PACK_NEEDS)
    }

    fn statistics(&self) -> StatisticsState {
        self.core.stats
    }

    fn statistics_mut(&mut self) -> &mut StatisticsState {
        &mut self.core.stats
    }

    fn reset(&mut self, buf: &mut CounterBuffer<'_>) -> Result<()> {
        self.core.reset(buf.checked_bytes_mut(Self::NAME, WIDTH)?);
        Ok(())
    }

    fn put_numeric(&mut self, buf: &mut CounterBuffer<'_>, value: Numeric, factor: i64) -> Result<()> {
        let Numeric::Double(v) = value else {
            return ValueTypeMismatchSnafu {
                func: Self::NAME,
                expected: "double",
                found: value,
            }
            .fail();
        };
        let bytes = buf.checked_bytes_mut(Self::NAME, WIDTH)?;
        self.core.fold(Self::NAME, bytes, v * factor as f64, factor)
    }

    /// Unparsable text is ignored
    fn put_text(&mut self, buf: &mut CounterBuffer<'_>, value: &[u8], factor: i64) -> Result<()> {
        match parse_real(value) {
            Some(v) => self.put_numeric(buf, Numeric::Double(v), factor),
            None => {
                buf.checked_bytes_mut(Self::NAME, WIDTH)?;
                Ok(())
            }
        }
    }

    fn merge(&mut self, dst: &mut CounterBuffer<'_>, src: CounterRef<'_>) -> Result<()> {
        let src = src.checked_bytes(Self::NAME, WIDTH)?;
        self.core
            .merge(Self::NAME, dst.checked_bytes_mut(Self::NAME, WIDTH)?, src)
    }

    fn get_value_64(&self, buf: CounterRef<'_>) -> Result<Option<i64>> {
        Ok(self.get_value_d(buf)?.map(|v| v.to_bits() as i64))
    }

    fn get_value_d(&self, buf: CounterRef<'_>) -> Result<Option<f64>> {
        let bytes = buf.checked_bytes(Self::NAME, WIDTH)?;
        Ok(AvgCore::mean(bytes, 1.0))
    }

    fn set_aggregate_pack_not_nulls(&mut self, not_nulls: i64) -> Result<()> {
        self.core.pack_not_nulls = Some(not_nulls);
        Ok(())
    }

    fn set_aggregate_pack_sum(&mut self, sum: Numeric, factor: i64) -> Result<()> {
        self.core.pack_sum = Some(sum.as_f64() * factor as f64);
        Ok(())
    }

    fn aggregate_pack(&mut self, buf: &mut CounterBuffer<'_>) -> Result<bool> {
        self.core
            .aggregate_pack(Self::NAME, buf.checked_bytes_mut(Self::NAME, WIDTH)?)
    }
}
