//! Variance and standard deviation with Welford's online algorithm
//!
//! The counter keeps the number of values, the running mean and the sum of squared
//! deviations from the mean (`m2`). Repeated values and partial counters are folded
//! with the parallel combination of Chan et al., such that the result does not depend
//! on how the input is split

use std::fmt;

use snafu::OptionExt;

use super::buffer::Field;
use super::skip::StatisticsState;
use super::{
    Capabilities, CounterAggregator, CounterBuffer, CounterRef, OverflowSnafu, Result, Stringify,
    UnsupportedSnafu, ValueTypeMismatchSnafu, parse_real,
};
use crate::common::types::Numeric;

const COUNT: Field<i64> = Field::at(0);
const MEAN: Field<f64> = Field::at(COUNT.end());
const M2: Field<f64> = Field::at(MEAN.end());
const WIDTH: usize = M2.end();

/// Statistic computed from the moments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MomentStatistic {
    /// Population variance
    VarPop,
    /// Sample variance
    VarSamp,
    /// Population standard deviation
    StdPop,
    /// Sample standard deviation
    StdSamp,
}

impl MomentStatistic {
    /// Minimal number of values for a not null result
    #[inline]
    fn min_count(self) -> i64 {
        match self {
            Self::VarPop | Self::StdPop => 1,
            Self::VarSamp | Self::StdSamp => 2,
        }
    }
}

/// Kind of the input values
#[derive(Debug, Clone, Copy, PartialEq)]
enum MomentInput {
    /// Scaled integers, the result is divided by the scale
    Integer { precision: u32, prec_factor: f64 },
    /// Doubles
    Double,
}

/// Variance/standard deviation aggregation function
#[derive(Debug, Clone)]
pub struct Moments {
    statistic: MomentStatistic,
    input: MomentInput,
    stats: StatisticsState,
}

impl Moments {
    /// Moments over integers with `precision` decimal digits
    pub fn new_integer(statistic: MomentStatistic, precision: u32) -> Self {
        Self {
            statistic,
            input: MomentInput::Integer {
                precision,
                prec_factor: 10_f64.powi(precision as i32),
            },
            stats: StatisticsState::default(),
        }
    }

    /// Moments over doubles
    pub fn new_double(statistic: MomentStatistic) -> Self {
        Self {
            statistic,
            input: MomentInput::Double,
            stats: StatisticsState::default(),
        }
    }

    fn value(&self, value: Numeric) -> Result<f64> {
        match (self.input, value) {
            (MomentInput::Integer { .. }, Numeric::Int(v)) => Ok(v as f64),
            (MomentInput::Double, Numeric::Double(v)) => Ok(v),
            (MomentInput::Integer { .. }, found) => ValueTypeMismatchSnafu {
                func: self.name(),
                expected: "integer",
                found,
            }
            .fail(),
            (MomentInput::Double, found) => ValueTypeMismatchSnafu {
                func: self.name(),
                expected: "double",
                found,
            }
            .fail(),
        }
    }

    /// Fold `count` values whose mean is `mean` and sum of squared deviations is `m2`
    fn combine(&self, bytes: &mut [u8], count: i64, mean: f64, m2: f64) -> Result<()> {
        if count <= 0 {
            return Ok(());
        }
        let n1 = COUNT.read(bytes);
        if n1 == 0 {
            COUNT.write(bytes, count);
            MEAN.write(bytes, mean);
            M2.write(bytes, m2);
            return Ok(());
        }

        let n = n1
            .checked_add(count)
            .context(OverflowSnafu { func: self.name() })?;
        let (n1f, n2f, nf) = (n1 as f64, count as f64, n as f64);
        let mean1 = MEAN.read(bytes);
        let delta = mean1 - mean;
        COUNT.write(bytes, n);
        MEAN.write(bytes, (mean1 * n1f + mean * n2f) / nf);
        M2.write(bytes, M2.read(bytes) + m2 + n1f * n2f / nf * delta * delta);
        Ok(())
    }

    /// Welford's update with a single value
    fn push(bytes: &mut [u8], value: f64) {
        let n = COUNT.read(bytes) + 1;
        let mean = MEAN.read(bytes);
        let delta = value - mean;
        let new_mean = mean + delta / n as f64;
        COUNT.write(bytes, n);
        MEAN.write(bytes, new_mean);
        M2.write(bytes, M2.read(bytes) + delta * (value - new_mean));
    }

    fn fold(&mut self, buf: &mut CounterBuffer<'_>, value: f64, factor: i64) -> Result<()> {
        let bytes = buf.checked_bytes_mut(self.name(), WIDTH)?;
        if factor == 1 {
            Self::push(bytes, value);
        } else {
            // `factor` copies of the same value have no deviation
            self.combine(bytes, factor, value, 0.0)?;
        }
        self.stats.invalidate();
        Ok(())
    }
}

impl Stringify for Moments {
    fn name(&self) -> &'static str {
        match (self.statistic, self.input) {
            (MomentStatistic::VarPop, MomentInput::Integer { .. }) => "VarPop64",
            (MomentStatistic::VarSamp, MomentInput::Integer { .. }) => "VarSamp64",
            (MomentStatistic::StdPop, MomentInput::Integer { .. }) => "StdPop64",
            (MomentStatistic::StdSamp, MomentInput::Integer { .. }) => "StdSamp64",
            (MomentStatistic::VarPop, MomentInput::Double) => "VarPopDouble",
            (MomentStatistic::VarSamp, MomentInput::Double) => "VarSampDouble",
            (MomentStatistic::StdPop, MomentInput::Double) => "StdPopDouble",
            (MomentStatistic::StdSamp, MomentInput::Double) => "StdSampDouble",
        }
    }

    fn display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.input {
            MomentInput::Integer { precision, .. } => {
                write!(f, "{}(precision: {precision})", self.name())
            }
            MomentInput::Double => f.write_str(self.name()),
        }
    }
}

impl CounterAggregator for Moments {
    fn buffer_byte_size(&self) -> usize {
        WIDTH
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new()
    }

    fn statistics(&self) -> StatisticsState {
        self.stats
    }

    fn statistics_mut(&mut self) -> &mut StatisticsState {
        &mut self.stats
    }

    fn reset(&mut self, buf: &mut CounterBuffer<'_>) -> Result<()> {
        let bytes = buf.checked_bytes_mut(self.name(), WIDTH)?;
        COUNT.write(bytes, 0);
        MEAN.write(bytes, 0.0);
        M2.write(bytes, 0.0);
        self.stats.invalidate();
        Ok(())
    }

    fn put_numeric(&mut self, buf: &mut CounterBuffer<'_>, value: Numeric, factor: i64) -> Result<()> {
        let value = self.value(value)?;
        self.fold(buf, value, factor)
    }

    /// Text is accepted by the moments over doubles, unparsable text is ignored
    fn put_text(&mut self, buf: &mut CounterBuffer<'_>, value: &[u8], factor: i64) -> Result<()> {
        if let MomentInput::Integer { .. } = self.input {
            return UnsupportedSnafu {
                func: self.name(),
                operation: "put_text",
            }
            .fail();
        }
        match parse_real(value) {
            Some(v) => self.fold(buf, v, factor),
            None => {
                buf.checked_bytes_mut(self.name(), WIDTH)?;
                Ok(())
            }
        }
    }

    fn merge(&mut self, dst: &mut CounterBuffer<'_>, src: CounterRef<'_>) -> Result<()> {
        let src = src.checked_bytes(self.name(), WIDTH)?;
        let bytes = dst.checked_bytes_mut(self.name(), WIDTH)?;
        self.combine(bytes, COUNT.read(src), MEAN.read(src), M2.read(src))?;
        self.stats.invalidate();
        Ok(())
    }

    fn get_value_64(&self, buf: CounterRef<'_>) -> Result<Option<i64>> {
        Ok(self.get_value_d(buf)?.map(|v| v.to_bits() as i64))
    }

    fn get_value_d(&self, buf: CounterRef<'_>) -> Result<Option<f64>> {
        let bytes = buf.checked_bytes(self.name(), WIDTH)?;
        let count = COUNT.read(bytes);
        if count < self.statistic.min_count() {
            return Ok(None);
        }
        let m2 = M2.read(bytes);
        let variance = match self.statistic {
            MomentStatistic::VarPop | MomentStatistic::StdPop => m2 / count as f64,
            MomentStatistic::VarSamp | MomentStatistic::StdSamp => m2 / (count - 1) as f64,
        };
        let scale = match self.input {
            MomentInput::Integer { prec_factor, .. } => prec_factor,
            MomentInput::Double => 1.0,
        };
        let result = match self.statistic {
            MomentStatistic::VarPop | MomentStatistic::VarSamp => variance / (scale * scale),
            MomentStatistic::StdPop | MomentStatistic::StdSamp => variance.sqrt() / scale,
        };
        Ok(Some(result))
    }
}
