//! Sum aggregation function

use snafu::ensure;

use super::buffer::Field;
use super::skip::StatisticsState;
use super::{
    Capabilities, CounterAggregator, CounterBuffer, CounterRef, OverflowSnafu, PackNeeds, Result,
    Stringify, ValueTypeMismatchSnafu, parse_real,
};
use crate::common::types::{NULL_VALUE_64, Numeric, not_null_double};

const SUM_PACK_NEEDS: PackNeeds = PackNeeds {
    sum: true,
    min: true,
    max: true,
    ..PackNeeds::NONE
};

/// Add `delta` to `current`.
///
/// The arithmetic is exact in 128 bits, only the final sum has to fit in the counter.
/// It must stay above [`NULL_VALUE_64`], the lowest two values of the word are reserved
fn checked_accumulate(func: &'static str, current: i64, delta: i128) -> Result<i64> {
    let sum = i128::from(current) + delta;
    ensure!(
        sum > i128::from(NULL_VALUE_64) && sum <= i128::from(i64::MAX),
        OverflowSnafu { func }
    );
    Ok(sum as i64)
}

/// Exact `value * factor`
#[inline]
fn weighted(value: i64, factor: i64) -> i128 {
    i128::from(value) * i128::from(factor)
}

/// Sum of 64-bit integers. The counter is `NULL_VALUE_64` until the first value
#[derive(Debug, Clone, Default)]
pub struct Sum64 {
    pack_sum: Option<i128>,
    pack_min: Option<i64>,
    pack_max: Option<i64>,
    null_group_found: bool,
    stats: StatisticsState,
}

impl Sum64 {
    const NAME: &'static str = "Sum64";
    const WIDTH: usize = 8;
    const VALUE: Field<i64> = Field::at(0);

    /// Create a new sum
    pub fn new() -> Self {
        Self::default()
    }

    fn load(bytes: &[u8]) -> Option<i64> {
        let v = Self::VALUE.read(bytes);
        (v != NULL_VALUE_64).then_some(v)
    }

    fn accumulate(bytes: &mut [u8], delta: i128) -> Result<()> {
        let current = Self::load(bytes).unwrap_or(0);
        let sum = checked_accumulate(Self::NAME, current, delta)?;
        Self::VALUE.write(bytes, sum);
        Ok(())
    }

    fn int_value(value: Numeric) -> Result<i64> {
        match value {
            Numeric::Int(v) => Ok(v),
            found => ValueTypeMismatchSnafu {
                func: Self::NAME,
                expected: "integer",
                found,
            }
            .fail(),
        }
    }
}

impl Stringify for Sum64 {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

impl CounterAggregator for Sum64 {
    fn buffer_byte_size(&self) -> usize {
        Self::WIDTH
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new().with_pack(SUM_PACK_NEEDS)
    }

    fn statistics(&self) -> StatisticsState {
        self.stats
    }

    fn statistics_mut(&mut self) -> &mut StatisticsState {
        &mut self.stats
    }

    fn reset(&mut self, buf: &mut CounterBuffer<'_>) -> Result<()> {
        let bytes = buf.checked_bytes_mut(Self::NAME, Self::WIDTH)?;
        Self::VALUE.write(bytes, NULL_VALUE_64);
        self.stats.invalidate();
        Ok(())
    }

    fn put_numeric(&mut self, buf: &mut CounterBuffer<'_>, value: Numeric, factor: i64) -> Result<()> {
        let value = Self::int_value(value)?;
        let bytes = buf.checked_bytes_mut(Self::NAME, Self::WIDTH)?;
        Self::accumulate(bytes, weighted(value, factor))?;
        self.stats.invalidate();
        Ok(())
    }

    fn merge(&mut self, dst: &mut CounterBuffer<'_>, src: CounterRef<'_>) -> Result<()> {
        let Some(partial) = Self::load(src.checked_bytes(Self::NAME, Self::WIDTH)?) else {
            return Ok(());
        };
        let bytes = dst.checked_bytes_mut(Self::NAME, Self::WIDTH)?;
        Self::accumulate(bytes, i128::from(partial))?;
        self.stats.invalidate();
        Ok(())
    }

    fn get_value_64(&self, buf: CounterRef<'_>) -> Result<Option<i64>> {
        Ok(Self::load(buf.checked_bytes(Self::NAME, Self::WIDTH)?))
    }

    fn get_value_d(&self, buf: CounterRef<'_>) -> Result<Option<f64>> {
        Ok(Self::load(buf.checked_bytes(Self::NAME, Self::WIDTH)?).map(|v| v as f64))
    }

    fn set_aggregate_pack_sum(&mut self, sum: Numeric, factor: i64) -> Result<()> {
        let sum = Self::int_value(sum)?;
        // Checked when the pack is folded, the counter may bring it back into range
        self.pack_sum = Some(weighted(sum, factor));
        Ok(())
    }

    fn set_aggregate_pack_min(&mut self, min: Numeric) -> Result<()> {
        self.pack_min = Some(Self::int_value(min)?);
        Ok(())
    }

    fn set_aggregate_pack_max(&mut self, max: Numeric) -> Result<()> {
        self.pack_max = Some(Self::int_value(max)?);
        Ok(())
    }

    fn aggregate_pack(&mut self, buf: &mut CounterBuffer<'_>) -> Result<bool> {
        let Some(sum) = self.pack_sum.take() else {
            return Ok(false);
        };
        let bytes = buf.checked_bytes_mut(Self::NAME, Self::WIDTH)?;
        Self::accumulate(bytes, sum)?;
        self.stats.invalidate();
        Ok(true)
    }

    fn clear_skip_statistics(&mut self) {
        self.null_group_found = false;
    }

    fn update_statistics(&mut self, buf: CounterRef<'_>) -> Result<bool> {
        if Self::load(buf.checked_bytes(Self::NAME, Self::WIDTH)?).is_none() {
            self.null_group_found = true;
        }
        Ok(self.null_group_found)
    }

    fn pack_is_inert(&self) -> bool {
        !self.null_group_found && self.pack_min == Some(0) && self.pack_max == Some(0)
    }
}

/// Sum of doubles. The counter holds the null bit pattern until the first value, such
/// that an untouched group is distinguished from a sum of zero
#[derive(Debug, Clone, Default)]
pub struct SumDouble {
    pack_sum: Option<f64>,
    pack_min: Option<f64>,
    pack_max: Option<f64>,
    null_group_found: bool,
    stats: StatisticsState,
}

impl SumDouble {
    const NAME: &'static str = "SumDouble";
    const WIDTH: usize = 8;
    const VALUE: Field<f64> = Field::at(0);

    /// Create a new sum
    pub fn new() -> Self {
        Self::default()
    }

    fn accumulate(bytes: &mut [u8], value: f64) {
        let current = Self::VALUE.read_nullable(bytes).unwrap_or(0.0);
        Self::VALUE.write(bytes, not_null_double(current + value));
    }

    fn double_value(value: Numeric) -> Result<f64> {
        match value {
            Numeric::Double(v) => Ok(v),
            found => ValueTypeMismatchSnafu {
                func: Self::NAME,
                expected: "double",
                found,
            }
            .fail(),
        }
    }
}

impl Stringify for SumDouble {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

impl CounterAggregator for SumDouble {
    fn buffer_byte_size(&self) -> usize {
        Self::WIDTH
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new().with_pack(SUM_PACK_NEEDS)
    }

    fn statistics(&self) -> StatisticsState {
        self.stats
    }

    fn statistics_mut(&mut self) -> &mut StatisticsState {
        &mut self.stats
    }

    fn reset(&mut self, buf: &mut CounterBuffer<'_>) -> Result<()> {
        Self::VALUE.write_null(buf.checked_bytes_mut(Self::NAME, Self::WIDTH)?);
        self.stats.invalidate();
        Ok(())
    }

    fn put_numeric(&mut self, buf: &mut CounterBuffer<'_>, value: Numeric, factor: i64) -> Result<()> {
        let value = Self::double_value(value)?;
        Self::accumulate(
            buf.checked_bytes_mut(Self::NAME, Self::WIDTH)?,
            value * factor as f64,
        );
        self.stats.invalidate();
        Ok(())
    }

    /// Unparsable text is folded as zero, the group is no longer null
    fn put_text(&mut self, buf: &mut CounterBuffer<'_>, value: &[u8], factor: i64) -> Result<()> {
        let value = parse_real(value).unwrap_or(0.0);
        self.put_numeric(buf, Numeric::Double(value), factor)
    }

    fn merge(&mut self, dst: &mut CounterBuffer<'_>, src: CounterRef<'_>) -> Result<()> {
        let Some(partial) = Self::VALUE.read_nullable(src.checked_bytes(Self::NAME, Self::WIDTH)?)
        else {
            return Ok(());
        };
        Self::accumulate(dst.checked_bytes_mut(Self::NAME, Self::WIDTH)?, partial);
        self.stats.invalidate();
        Ok(())
    }

    fn get_value_64(&self, buf: CounterRef<'_>) -> Result<Option<i64>> {
        Ok(self.get_value_d(buf)?.map(|v| v.to_bits() as i64))
    }

    fn get_value_d(&self, buf: CounterRef<'_>) -> Result<Option<f64>> {
        Ok(Self::VALUE.read_nullable(buf.checked_bytes(Self::NAME, Self::WIDTH)?))
    }

    fn set_aggregate_pack_sum(&mut self, sum: Numeric, factor: i64) -> Result<()> {
        self.pack_sum = Some(Self::double_value(sum)? * factor as f64);
        Ok(())
    }

    fn set_aggregate_pack_min(&mut self, min: Numeric) -> Result<()> {
        self.pack_min = Some(min.as_f64());
        Ok(())
    }

    fn set_aggregate_pack_max(&mut self, max: Numeric) -> Result<()> {
        self.pack_max = Some(max.as_f64());
        Ok(())
    }

    fn aggregate_pack(&mut self, buf: &mut CounterBuffer<'_>) -> Result<bool> {
        let Some(sum) = self.pack_sum.take() else {
            return Ok(false);
        };
        Self::accumulate(buf.checked_bytes_mut(Self::NAME, Self::WIDTH)?, sum);
        self.stats.invalidate();
        Ok(true)
    }

    fn clear_skip_statistics(&mut self) {
        self.null_group_found = false;
    }

    fn update_statistics(&mut self, buf: CounterRef<'_>) -> Result<bool> {
        let bytes = buf.checked_bytes(Self::NAME, Self::WIDTH)?;
        if Self::VALUE.read_nullable(bytes).is_none() {
            self.null_group_found = true;
        }
        Ok(self.null_group_found)
    }

    fn pack_is_inert(&self) -> bool {
        !self.null_group_found && self.pack_min == Some(0.0) && self.pack_max == Some(0.0)
    }
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;
    use crate::aggregate::tests::OwnedCounter;

    #[test]
    fn test_sum_scenario() {
        // 3, 4, null, 5 with factors 1, 2, 1, 1
        let mut sum = Sum64::new();
        let mut counter = OwnedCounter::new(&mut sum, 0);
        assert_eq!(sum.get_value_64(counter.view()).unwrap(), None);
        sum.put_numeric(&mut counter.buf(), Numeric::Int(3), 1).unwrap();
        sum.put_numeric(&mut counter.buf(), Numeric::Int(4), 2).unwrap();
        sum.put_numeric(&mut counter.buf(), Numeric::Int(5), 1).unwrap();
        assert_eq!(sum.get_value_64(counter.view()).unwrap(), Some(16));
    }

    #[test]
    fn test_zero_is_not_null() {
        let mut sum = Sum64::new();
        let mut counter = OwnedCounter::new(&mut sum, 0);
        sum.put_numeric(&mut counter.buf(), Numeric::Int(0), 1).unwrap();
        assert_eq!(sum.get_value_64(counter.view()).unwrap(), Some(0));

        let mut sum = SumDouble::new();
        let mut counter = OwnedCounter::new(&mut sum, 0);
        assert_eq!(sum.get_value_d(counter.view()).unwrap(), None);
        sum.put_numeric(&mut counter.buf(), Numeric::Double(0.0), 1).unwrap();
        assert_eq!(sum.get_value_d(counter.view()).unwrap(), Some(0.0));
    }

    #[test]
    fn test_overflow_boundary() {
        let mut sum = Sum64::new();
        let mut counter = OwnedCounter::new(&mut sum, 0);
        sum.put_numeric(&mut counter.buf(), Numeric::Int(i64::MAX - 1), 1).unwrap();
        sum.put_numeric(&mut counter.buf(), Numeric::Int(1), 1).unwrap();
        assert_eq!(sum.get_value_64(counter.view()).unwrap(), Some(i64::MAX));

        let err = sum
            .put_numeric(&mut counter.buf(), Numeric::Int(1), 1)
            .unwrap_err();
        expect!["Overflow happens when computing the `Sum64` aggregation function"]
            .assert_eq(&err.to_string());
        assert_eq!(sum.get_value_64(counter.view()).unwrap(), Some(i64::MAX));

        let mut counter = OwnedCounter::new(&mut sum, 1);
        let result = sum.put_numeric(&mut counter.buf(), Numeric::Int(i64::MAX / 2 + 1), 2);
        assert!(result.is_err());
        let result = sum.put_numeric(&mut counter.buf(), Numeric::Int(i64::MIN + 2), 1);
        assert!(result.is_ok());
        let result = sum.put_numeric(&mut counter.buf(), Numeric::Int(-1), 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_weighted_value_out_of_range_with_sum_in_range() {
        // -5e18 + 5e18 * 2 = 5e18, the product alone does not fit in 64 bits
        let mut sum = Sum64::new();
        let mut counter = OwnedCounter::new(&mut sum, 0);
        sum.put_numeric(&mut counter.buf(), Numeric::Int(-5_000_000_000_000_000_000), 1)
            .unwrap();
        sum.put_numeric(&mut counter.buf(), Numeric::Int(5_000_000_000_000_000_000), 2)
            .unwrap();
        assert_eq!(
            sum.get_value_64(counter.view()).unwrap(),
            Some(5_000_000_000_000_000_000)
        );
    }

    #[test]
    fn test_merge_skips_null_partials() {
        let mut sum = Sum64::new();
        let mut dst = OwnedCounter::new(&mut sum, 0);
        let mut src = OwnedCounter::new(&mut sum, 1);
        sum.merge(&mut dst.buf(), src.view()).unwrap();
        assert_eq!(sum.get_value_64(dst.view()).unwrap(), None);

        sum.put_numeric(&mut src.buf(), Numeric::Int(-7), 1).unwrap();
        sum.merge(&mut dst.buf(), src.view()).unwrap();
        sum.merge(&mut dst.buf(), src.view()).unwrap();
        assert_eq!(sum.get_value_64(dst.view()).unwrap(), Some(-14));
    }

    #[test]
    fn test_pack_sum_overflow() {
        let mut sum = Sum64::new();
        let mut counter = OwnedCounter::new(&mut sum, 0);
        sum.set_aggregate_pack_sum(Numeric::Int(i64::MAX / 2), 3).unwrap();
        assert!(sum.aggregate_pack(&mut counter.buf()).is_err());
        assert_eq!(sum.get_value_64(counter.view()).unwrap(), None);

        sum.set_aggregate_pack_sum(Numeric::Int(10), 3).unwrap();
        assert!(sum.aggregate_pack(&mut counter.buf()).unwrap());
        assert_eq!(sum.get_value_64(counter.view()).unwrap(), Some(30));

        // The weighted pack sum is out of range, the counter brings it back
        sum.put_numeric(&mut counter.buf(), Numeric::Int(-4_000_000_000_000_000_000), 1)
            .unwrap();
        sum.set_aggregate_pack_sum(Numeric::Int(3_000_000_000_000_000_000), 4).unwrap();
        assert!(sum.aggregate_pack(&mut counter.buf()).unwrap());
        assert_eq!(
            sum.get_value_64(counter.view()).unwrap(),
            Some(8_000_000_000_000_000_030)
        );
    }

    #[test]
    fn test_double_sum_colliding_with_null_is_kept() {
        let mut sum = SumDouble::new();
        let mut counter = OwnedCounter::new(&mut sum, 0);
        sum.put_numeric(&mut counter.buf(), Numeric::Double(-f64::from_bits(1)), 1).unwrap();
        assert_eq!(sum.get_value_d(counter.view()).unwrap(), Some(-0.0));
    }

    #[test]
    fn test_double_sum_text_and_merge() {
        let mut sum = SumDouble::new();
        let mut dst = OwnedCounter::new(&mut sum, 0);
        let mut src = OwnedCounter::new(&mut sum, 1);
        sum.put_text(&mut dst.buf(), b"1.25", 2).unwrap();
        sum.put_text(&mut src.buf(), b"not a number", 1).unwrap();
        assert_eq!(sum.get_value_d(src.view()).unwrap(), Some(0.0));
        sum.put_numeric(&mut src.buf(), Numeric::Double(0.5), 1).unwrap();
        sum.merge(&mut dst.buf(), src.view()).unwrap();
        assert_eq!(sum.get_value_d(dst.view()).unwrap(), Some(3.0));
        assert_eq!(
            sum.get_value_64(dst.view()).unwrap(),
            Some(3.0_f64.to_bits() as i64)
        );
    }
}
