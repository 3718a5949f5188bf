//! List aggregation function: the first not null value of the group wins
//!
//! Merging keeps the destination when it is already set, the result depends on the
//! order in which the partial counters are merged

use std::borrow::Cow;
use std::fmt;

use super::buffer::TextField;
use super::min_max::{ExtremeValue, extreme_value};
use super::skip::StatisticsState;
use super::{Capabilities, CounterAggregator, CounterBuffer, CounterRef, Result, Stringify, UnsupportedSnafu};
use crate::common::types::Numeric;

/// Statistics shared by the list aggregators: once every group holds a value, no pack
/// can change the result
#[derive(Debug, Clone, Copy, Default)]
struct ListStatistics {
    groups_seen: bool,
    null_group_found: bool,
    stats: StatisticsState,
}

impl ListStatistics {
    fn clear(&mut self) {
        self.groups_seen = false;
        self.null_group_found = false;
    }

    fn update(&mut self, is_null: bool) -> bool {
        self.groups_seen = true;
        self.null_group_found |= is_null;
        self.null_group_found
    }

    fn inert(&self) -> bool {
        self.groups_seen && !self.null_group_found
    }
}

fn list_capabilities() -> Capabilities {
    Capabilities::new().distinct_irrelevant().factor_irrelevant()
}

/// List over fixed width values
#[derive(Debug, Clone, Default)]
pub struct List<T> {
    statistics: ListStatistics,
    _phantom: std::marker::PhantomData<T>,
}

/// List over 32-bit integers
pub type List32 = List<i32>;
/// List over 64-bit integers
pub type List64 = List<i64>;
/// List over doubles
pub type ListDouble = List<f64>;

impl<T: ExtremeValue> List<T> {
    /// Create a new list
    pub fn new() -> Self {
        Self {
            statistics: ListStatistics::default(),
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T: ExtremeValue> Stringify for List<T> {
    fn name(&self) -> &'static str {
        T::LIST_NAME
    }
}

impl<T: ExtremeValue> CounterAggregator for List<T> {
    fn buffer_byte_size(&self) -> usize {
        T::WIDTH
    }

    fn capabilities(&self) -> Capabilities {
        list_capabilities()
    }

    fn statistics(&self) -> StatisticsState {
        self.statistics.stats
    }

    fn statistics_mut(&mut self) -> &mut StatisticsState {
        &mut self.statistics.stats
    }

    fn reset(&mut self, buf: &mut CounterBuffer<'_>) -> Result<()> {
        T::store_null(buf.checked_bytes_mut(T::LIST_NAME, T::WIDTH)?);
        self.statistics.stats.invalidate();
        Ok(())
    }

    fn put_numeric(&mut self, buf: &mut CounterBuffer<'_>, value: Numeric, _factor: i64) -> Result<()> {
        let value = extreme_value::<T>(T::LIST_NAME, value)?;
        let bytes = buf.checked_bytes_mut(T::LIST_NAME, T::WIDTH)?;
        if T::load(bytes).is_none() {
            value.encode(bytes);
            self.statistics.stats.invalidate();
        }
        Ok(())
    }

    fn merge(&mut self, dst: &mut CounterBuffer<'_>, src: CounterRef<'_>) -> Result<()> {
        let Some(partial) = T::load(src.checked_bytes(T::LIST_NAME, T::WIDTH)?) else {
            return Ok(());
        };
        let bytes = dst.checked_bytes_mut(T::LIST_NAME, T::WIDTH)?;
        if T::load(bytes).is_none() {
            partial.encode(bytes);
            self.statistics.stats.invalidate();
        }
        Ok(())
    }

    fn get_value_64(&self, buf: CounterRef<'_>) -> Result<Option<i64>> {
        Ok(T::load(buf.checked_bytes(T::LIST_NAME, T::WIDTH)?).map(T::to_i64))
    }

    fn get_value_d(&self, buf: CounterRef<'_>) -> Result<Option<f64>> {
        if !T::IS_DOUBLE {
            return UnsupportedSnafu {
                func: T::LIST_NAME,
                operation: "get_value_d",
            }
            .fail();
        }
        Ok(T::load(buf.checked_bytes(T::LIST_NAME, T::WIDTH)?).map(T::to_f64))
    }

    fn clear_skip_statistics(&mut self) {
        self.statistics.clear();
    }

    fn update_statistics(&mut self, buf: CounterRef<'_>) -> Result<bool> {
        let is_null = T::load(buf.checked_bytes(T::LIST_NAME, T::WIDTH)?).is_none();
        Ok(self.statistics.update(is_null))
    }

    fn pack_is_inert(&self) -> bool {
        self.statistics.inert()
    }
}

/// List over text no longer than the capacity of the counter
#[derive(Debug, Clone)]
pub struct ListText {
    field: TextField,
    statistics: ListStatistics,
}

impl ListText {
    const NAME: &'static str = "ListText";

    /// Create a new list over text no longer than `max_len` bytes
    pub fn try_new(max_len: usize) -> Result<Self> {
        Ok(Self {
            field: TextField::try_new(Self::NAME, max_len)?,
            statistics: ListStatistics::default(),
        })
    }
}

impl Stringify for ListText {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(max_len: {})", Self::NAME, self.field.capacity())
    }
}

impl CounterAggregator for ListText {
    fn buffer_byte_size(&self) -> usize {
        self.field.width()
    }

    fn capabilities(&self) -> Capabilities {
        list_capabilities()
    }

    fn statistics(&self) -> StatisticsState {
        self.statistics.stats
    }

    fn statistics_mut(&mut self) -> &mut StatisticsState {
        &mut self.statistics.stats
    }

    fn reset(&mut self, buf: &mut CounterBuffer<'_>) -> Result<()> {
        self.field
            .clear(buf.checked_bytes_mut(Self::NAME, self.field.width())?);
        self.statistics.stats.invalidate();
        Ok(())
    }

    fn put_text(&mut self, buf: &mut CounterBuffer<'_>, value: &[u8], _factor: i64) -> Result<()> {
        let bytes = buf.checked_bytes_mut(Self::NAME, self.field.width())?;
        if self.field.load(bytes).is_none() {
            self.field.store(Self::NAME, bytes, value)?;
            self.statistics.stats.invalidate();
        }
        Ok(())
    }

    fn merge(&mut self, dst: &mut CounterBuffer<'_>, src: CounterRef<'_>) -> Result<()> {
        let width = self.field.width();
        let Some(partial) = self.field.load(src.checked_bytes(Self::NAME, width)?) else {
            return Ok(());
        };
        let bytes = dst.checked_bytes_mut(Self::NAME, width)?;
        if self.field.load(bytes).is_none() {
            self.field.store(Self::NAME, bytes, partial)?;
            self.statistics.stats.invalidate();
        }
        Ok(())
    }

    fn get_value_t<'a>(&self, buf: CounterRef<'a>) -> Result<Option<Cow<'a, [u8]>>> {
        let bytes = buf.checked_bytes(Self::NAME, self.field.width())?;
        Ok(self.field.load(bytes).map(Cow::Borrowed))
    }

    fn clear_skip_statistics(&mut self) {
        self.statistics.clear();
    }

    fn update_statistics(&mut self, buf: CounterRef<'_>) -> Result<bool> {
        let bytes = buf.checked_bytes(Self::NAME, self.field.width())?;
        Ok(self.statistics.update(self.field.load(bytes).is_none()))
    }

    fn pack_is_inert(&self) -> bool {
        self.statistics.inert()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::OwnedCounter;

    #[test]
    fn test_first_value_wins() {
        let mut list = List32::new();
        let mut counter = OwnedCounter::new(&mut list, 0);
        assert_eq!(list.get_value_64(counter.view()).unwrap(), None);
        for v in [7, 3, 9] {
            list.put_numeric(&mut counter.buf(), Numeric::Int(v), 1).unwrap();
        }
        assert_eq!(list.get_value_64(counter.view()).unwrap(), Some(7));
    }

    #[test]
    fn test_merge_keeps_destination() {
        let mut list = ListDouble::new();
        let mut dst = OwnedCounter::new(&mut list, 0);
        let mut src = OwnedCounter::new(&mut list, 1);
        list.put_numeric(&mut src.buf(), Numeric::Double(2.5), 1).unwrap();
        list.merge(&mut dst.buf(), src.view()).unwrap();
        assert_eq!(list.get_value_d(dst.view()).unwrap(), Some(2.5));

        let mut other = OwnedCounter::new(&mut list, 2);
        list.put_numeric(&mut other.buf(), Numeric::Double(-1.0), 1).unwrap();
        list.merge(&mut dst.buf(), other.view()).unwrap();
        assert_eq!(list.get_value_d(dst.view()).unwrap(), Some(2.5));
    }

    #[test]
    fn test_list_text() {
        let mut list = ListText::try_new(5).unwrap();
        let mut counter = OwnedCounter::new(&mut list, 0);
        list.put_text(&mut counter.buf(), b"", 1).unwrap();
        list.put_text(&mut counter.buf(), b"hello", 1).unwrap();
        assert_eq!(
            list.get_value_t(counter.view()).unwrap().as_deref(),
            Some(&b""[..])
        );

        list.reset(&mut counter.buf()).unwrap();
        assert_eq!(list.get_value_t(counter.view()).unwrap(), None);
        assert!(list.put_text(&mut counter.buf(), b"too long", 1).is_err());
    }

    #[test]
    fn test_skip_statistics() {
        let mut list = ListText::try_new(4).unwrap();
        list.reset_statistics();
        list.set_statistics_updated();
        // No group at all, nothing proves the pack is irrelevant
        assert!(!list.pack_cannot_change_aggregation().unwrap());

        let mut counter = OwnedCounter::new(&mut list, 0);
        list.put_text(&mut counter.buf(), b"a", 1).unwrap();
        list.reset_statistics();
        assert!(!list.update_statistics(counter.view()).unwrap());
        list.set_statistics_updated();
        assert!(list.pack_cannot_change_aggregation().unwrap());
    }
}
