//! Bitwise AND/OR/XOR aggregation functions over 64-bit integers

use std::fmt::Debug;
use std::marker::PhantomData;

use super::buffer::Field;
use super::skip::StatisticsState;
use super::{
    Capabilities, CounterAggregator, CounterBuffer, CounterRef, Result, Stringify,
    ValueTypeMismatchSnafu, parse_integer,
};
use crate::common::types::Numeric;

/// Bitwise operator folded into the counter
pub trait BitOperator: Debug + Clone + Default + Send + Sync + 'static {
    /// Name of the aggregator
    const NAME: &'static str;
    /// Value of the counter of an empty group
    const IDENTITY: i64;
    /// Folding the same value twice differs from folding it once
    const FACTOR_NEEDED: bool;

    /// Fold `value` repeated `factor` times into `acc`
    fn apply(acc: i64, value: i64, factor: i64) -> i64;

    /// Combine two partial results
    fn combine(lhs: i64, rhs: i64) -> i64;
}

/// Bitwise and, identity is all ones
#[derive(Debug, Clone, Copy, Default)]
pub struct And;

impl BitOperator for And {
    const NAME: &'static str = "BitAnd";
    const IDENTITY: i64 = -1;
    const FACTOR_NEEDED: bool = false;

    #[inline]
    fn apply(acc: i64, value: i64, _factor: i64) -> i64 {
        acc & value
    }

    #[inline]
    fn combine(lhs: i64, rhs: i64) -> i64 {
        lhs & rhs
    }
}

/// Bitwise or, identity is zero
#[derive(Debug, Clone, Copy, Default)]
pub struct Or;

impl BitOperator for Or {
    const NAME: &'static str = "BitOr";
    const IDENTITY: i64 = 0;
    const FACTOR_NEEDED: bool = false;

    #[inline]
    fn apply(acc: i64, value: i64, _factor: i64) -> i64 {
        acc | value
    }

    #[inline]
    fn combine(lhs: i64, rhs: i64) -> i64 {
        lhs | rhs
    }
}

/// Bitwise xor, identity is zero. A value repeated an even number of times cancels
/// itself
#[derive(Debug, Clone, Copy, Default)]
pub struct Xor;

impl BitOperator for Xor {
    const NAME: &'static str = "BitXor";
    const IDENTITY: i64 = 0;
    const FACTOR_NEEDED: bool = true;

    #[inline]
    fn apply(acc: i64, value: i64, factor: i64) -> i64 {
        if factor % 2 != 0 { acc ^ value } else { acc }
    }

    #[inline]
    fn combine(lhs: i64, rhs: i64) -> i64 {
        lhs ^ rhs
    }
}

/// Bitwise aggregation function
#[derive(Debug, Clone, Default)]
pub struct Bitwise<Op> {
    stats: StatisticsState,
    _phantom: PhantomData<Op>,
}

/// `BIT_AND`
pub type BitAnd = Bitwise<And>;
/// `BIT_OR`
pub type BitOr = Bitwise<Or>;
/// `BIT_XOR`
pub type BitXor = Bitwise<Xor>;

impl<Op: BitOperator> Bitwise<Op> {
    const VALUE: Field<i64> = Field::at(0);
    const WIDTH: usize = 8;

    /// Create a new bitwise aggregation
    pub fn new() -> Self {
        Self {
            stats: StatisticsState::default(),
            _phantom: PhantomData,
        }
    }

    fn fold(&mut self, buf: &mut CounterBuffer<'_>, value: i64, factor: i64) -> Result<()> {
        let bytes = buf.checked_bytes_mut(Op::NAME, Self::WIDTH)?;
        Self::VALUE.write(bytes, Op::apply(Self::VALUE.read(bytes), value, factor));
        self.stats.invalidate();
        Ok(())
    }
}

impl<Op: BitOperator> Stringify for Bitwise<Op> {
    fn name(&self) -> &'static str {
        Op::NAME
    }
}

impl<Op: BitOperator> CounterAggregator for Bitwise<Op> {
    fn buffer_byte_size(&self) -> usize {
        Self::WIDTH
    }

    fn capabilities(&self) -> Capabilities {
        let capabilities = Capabilities::new().distinct_irrelevant();
        if Op::FACTOR_NEEDED {
            capabilities
        } else {
            capabilities.factor_irrelevant()
        }
    }

    fn statistics(&self) -> StatisticsState {
        self.stats
    }

    fn statistics_mut(&mut self) -> &mut StatisticsState {
        &mut self.stats
    }

    fn reset(&mut self, buf: &mut CounterBuffer<'_>) -> Result<()> {
        let bytes = buf.checked_bytes_mut(Op::NAME, Self::WIDTH)?;
        Self::VALUE.write(bytes, Op::IDENTITY);
        self.stats.invalidate();
        Ok(())
    }

    fn put_numeric(&mut self, buf: &mut CounterBuffer<'_>, value: Numeric, factor: i64) -> Result<()> {
        let Numeric::Int(v) = value else {
            return ValueTypeMismatchSnafu {
                func: Op::NAME,
                expected: "integer",
                found: value,
            }
            .fail();
        };
        self.fold(buf, v, factor)
    }

    /// Text is parsed as an integer, unparsable text is ignored
    fn put_text(&mut self, buf: &mut CounterBuffer<'_>, value: &[u8], factor: i64) -> Result<()> {
        match parse_integer(value) {
            Some(v) => self.fold(buf, v, factor),
            None => {
                buf.checked_bytes_mut(Op::NAME, Self::WIDTH)?;
                Ok(())
            }
        }
    }

    fn merge(&mut self, dst: &mut CounterBuffer<'_>, src: CounterRef<'_>) -> Result<()> {
        let partial = Self::VALUE.read(src.checked_bytes(Op::NAME, Self::WIDTH)?);
        let bytes = dst.checked_bytes_mut(Op::NAME, Self::WIDTH)?;
        Self::VALUE.write(bytes, Op::combine(Self::VALUE.read(bytes), partial));
        self.stats.invalidate();
        Ok(())
    }

    fn get_value_64(&self, buf: CounterRef<'_>) -> Result<Option<i64>> {
        Ok(Some(Self::VALUE.read(
            buf.checked_bytes(Op::NAME, Self::WIDTH)?,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::OwnedCounter;

    fn fold<Op: BitOperator>(values: &[(i64, i64)]) -> i64 {
        let mut agg = Bitwise::<Op>::new();
        let mut counter = OwnedCounter::new(&mut agg, 0);
        for &(v, factor) in values {
            agg.put_numeric(&mut counter.buf(), Numeric::Int(v), factor).unwrap();
        }
        agg.get_value_64(counter.view()).unwrap().unwrap()
    }

    #[test]
    fn test_identities() {
        assert_eq!(fold::<And>(&[]), -1);
        assert_eq!(fold::<Or>(&[]), 0);
        assert_eq!(fold::<Xor>(&[]), 0);
    }

    #[test]
    fn test_bitwise_values() {
        let values = [(0b1100, 1), (0b1010, 1)];
        assert_eq!(fold::<And>(&values), 0b1000);
        assert_eq!(fold::<Or>(&values), 0b1110);
        assert_eq!(fold::<Xor>(&values), 0b0110);
    }

    #[test]
    fn test_xor_factor_parity() {
        assert_eq!(fold::<Xor>(&[(5, 2)]), 0);
        assert_eq!(fold::<Xor>(&[(5, 3)]), 5);
        assert_eq!(fold::<And>(&[(5, 2)]), 5);
        assert!(BitXor::new().factor_needed());
        assert!(!BitOr::new().factor_needed());
        assert!(BitAnd::new().ignore_distinct());
    }

    #[test]
    fn test_text_and_merge() {
        let mut or = BitOr::new();
        let mut dst = OwnedCounter::new(&mut or, 0);
        let mut src = OwnedCounter::new(&mut or, 1);
        or.put_text(&mut dst.buf(), b"1", 1).unwrap();
        or.put_text(&mut src.buf(), b" 4 ", 1).unwrap();
        or.put_text(&mut src.buf(), b"four", 1).unwrap();
        or.merge(&mut dst.buf(), src.view()).unwrap();
        assert_eq!(or.get_value_64(dst.view()).unwrap(), Some(5));

        let mut and = BitAnd::new();
        let mut dst = OwnedCounter::new(&mut and, 0);
        let empty = OwnedCounter::new(&mut and, 1);
        and.put_numeric(&mut dst.buf(), Numeric::Int(6), 1).unwrap();
        and.merge(&mut dst.buf(), empty.view()).unwrap();
        assert_eq!(and.get_value_64(dst.view()).unwrap(), Some(6));
    }
}
