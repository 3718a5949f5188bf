//! Counter rows of a single aggregator, addressed by group key

use std::borrow::Cow;
use std::time::Duration;

use hashbrown::HashMap;

use super::HandleAllocator;
use crate::aggregate::pack::{PackStatistics, aggregate_pack_in_one_group};
use crate::aggregate::skip::PackSkipEvaluator;
use crate::aggregate::{Aggregator, CounterAggregator, CounterBuffer, CounterRef, Result};
use crate::common::context::AggregationArgs;
use crate::common::profiler::ScopedTimerGuard;
use crate::common::types::{GroupHandle, Numeric};
use crate::common::utils::hash::{BUILD_HASHER_DEFAULT, BuildHasherDefault};

/// Metrics of the counter table
#[derive(Debug, Default, Clone)]
pub struct TableMetrics {
    /// Number of values and rows folded one by one
    pub num_rows: u64,
    /// Number of packs folded with their statistics
    pub packs_aggregated: u64,
    /// Number of packs proven irrelevant by the skip evaluator
    pub packs_skipped: u64,
    /// Time spent in combining partial tables
    pub combine_time: Duration,
}

impl TableMetrics {
    fn combine(&mut self, other: &TableMetrics) {
        self.num_rows += other.num_rows;
        self.packs_aggregated += other.packs_aggregated;
        self.packs_skipped += other.packs_skipped;
        self.combine_time += other.combine_time;
    }
}

/// Counter rows of a single aggregator
///
/// The rows are stored contiguously, each of them has exactly
/// [`CounterAggregator::buffer_byte_size`] bytes and is reset when the group is
/// created
#[derive(Debug)]
pub struct CounterTable {
    aggregator: Aggregator,
    width: usize,
    rows: Vec<u8>,
    keys: Vec<u64>,
    handles: Vec<GroupHandle>,
    index: HashMap<u64, usize, BuildHasherDefault>,
    allocator: HandleAllocator,
    evaluator: PackSkipEvaluator,
    metrics: TableMetrics,
}

impl CounterTable {
    /// Create an empty table for the aggregator
    pub fn new(aggregator: Aggregator, args: &AggregationArgs) -> Self {
        Self::with_allocator(aggregator, HandleAllocator, PackSkipEvaluator::new(args))
    }

    fn with_allocator(
        aggregator: Aggregator,
        allocator: HandleAllocator,
        evaluator: PackSkipEvaluator,
    ) -> Self {
        Self {
            width: aggregator.buffer_byte_size(),
            aggregator,
            rows: Vec::new(),
            keys: Vec::new(),
            handles: Vec::new(),
            index: HashMap::with_hasher(BUILD_HASHER_DEFAULT),
            allocator,
            evaluator,
            metrics: TableMetrics::default(),
        }
    }

    /// Aggregator of the table
    #[inline]
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Metrics of the table
    #[inline]
    pub fn metrics(&self) -> &TableMetrics {
        &self.metrics
    }

    /// Number of groups
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if the table has no group
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys of the groups, in creation order
    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.keys.iter().copied()
    }

    /// Handle of the group
    pub fn handle(&self, key: u64) -> Option<GroupHandle> {
        self.index.get(&key).map(|&row| self.handles[row])
    }

    /// Empty table with the same aggregator configuration, for another worker. The
    /// fork shares the side tables of the aggregator
    pub fn fork(&self) -> Self {
        Self::with_allocator(self.aggregator.fork(), self.allocator, self.evaluator)
    }

    /// Row of the group, a reset counter is created if the key is new
    fn group(&mut self, key: u64) -> Result<usize> {
        if let Some(&row) = self.index.get(&key) {
            return Ok(row);
        }

        let row = self.keys.len();
        let handle = self.allocator.allocate();
        self.rows.resize(self.rows.len() + self.width, 0);
        self.keys.push(key);
        self.handles.push(handle);
        self.index.insert(key, row);

        let (aggregator, mut buf) = self.split(row);
        aggregator.reset(&mut buf)?;
        Ok(row)
    }

    fn split(&mut self, row: usize) -> (&mut Aggregator, CounterBuffer<'_>) {
        let start = row * self.width;
        (
            &mut self.aggregator,
            CounterBuffer::new(self.handles[row], &mut self.rows[start..start + self.width]),
        )
    }

    /// Read only counter of the group
    pub fn counter(&self, key: u64) -> Option<CounterRef<'_>> {
        self.index.get(&key).map(|&row| self.counter_at(row))
    }

    fn counter_at(&self, row: usize) -> CounterRef<'_> {
        let start = row * self.width;
        CounterRef::new(self.handles[row], &self.rows[start..start + self.width])
    }

    /// Fold a row without value into the group
    pub fn put_row(&mut self, key: u64, factor: i64) -> Result<()> {
        let row = self.group(key)?;
        let (aggregator, mut buf) = self.split(row);
        aggregator.put_row(&mut buf, factor)?;
        self.metrics.num_rows += 1;
        Ok(())
    }

    /// Fold a numeric value into the group
    pub fn put_numeric(&mut self, key: u64, value: Numeric, factor: i64) -> Result<()> {
        let row = self.group(key)?;
        let (aggregator, mut buf) = self.split(row);
        aggregator.put_numeric(&mut buf, value, factor)?;
        self.metrics.num_rows += 1;
        Ok(())
    }

    /// Fold a text value into the group
    pub fn put_text(&mut self, key: u64, value: &[u8], factor: i64) -> Result<()> {
        let row = self.group(key)?;
        let (aggregator, mut buf) = self.split(row);
        aggregator.put_text(&mut buf, value, factor)?;
        self.metrics.num_rows += 1;
        Ok(())
    }

    /// Fold the pack, whose rows all belong to the group, with its statistics.
    /// Returns false if the caller has to scan the pack
    pub fn aggregate_pack(&mut self, key: u64, stats: &PackStatistics, factor: i64) -> Result<bool> {
        let row = self.group(key)?;
        let (aggregator, mut buf) = self.split(row);
        let aggregated = aggregate_pack_in_one_group(aggregator, &mut buf, stats, factor)?;
        if aggregated {
            self.metrics.packs_aggregated += 1;
        }
        Ok(aggregated)
    }

    /// Returns true if the pack can not change any counter of the table
    pub fn pack_cannot_change(&mut self, stats: &PackStatistics) -> Result<bool> {
        let (rows, handles, width) = (&self.rows, &self.handles, self.width);
        let groups = handles.iter().enumerate().map(|(row, &handle)| {
            let start = row * width;
            CounterRef::new(handle, &rows[start..start + width])
        });
        let skip = self
            .evaluator
            .pack_cannot_change(&mut self.aggregator, groups, handles.len(), stats)?;
        if skip {
            self.metrics.packs_skipped += 1;
        }
        Ok(skip)
    }

    /// Result of the group as integer, `None` if the group is null or absent
    pub fn value_64(&self, key: u64) -> Result<Option<i64>> {
        match self.counter(key) {
            Some(counter) => self.aggregator.get_value_64(counter),
            None => Ok(None),
        }
    }

    /// Result of the group as double, `None` if the group is null or absent
    pub fn value_d(&self, key: u64) -> Result<Option<f64>> {
        match self.counter(key) {
            Some(counter) => self.aggregator.get_value_d(counter),
            None => Ok(None),
        }
    }

    /// Result of the group as text, `None` if the group is null or absent
    pub fn value_t(&self, key: u64) -> Result<Option<Cow<'_, [u8]>>> {
        match self.counter(key) {
            Some(counter) => self.aggregator.get_value_t(counter),
            None => Ok(None),
        }
    }

    /// Merge the partial table produced by another worker into this table
    pub fn combine(&mut self, other: &CounterTable) -> Result<()> {
        let mut elapsed = Duration::ZERO;
        {
            let _guard = ScopedTimerGuard::new(&mut elapsed);
            for (row, &key) in other.keys.iter().enumerate() {
                let dst = self.group(key)?;
                let (aggregator, mut buf) = self.split(dst);
                aggregator.merge(&mut buf, other.counter_at(row))?;
            }
        }

        self.metrics.combine(&other.metrics);
        self.metrics.combine_time += elapsed;
        tracing::debug!(
            "CounterTable: combine {} rows in {} groups into {} groups of `{}` takes `{:?}`",
            other.metrics.num_rows,
            other.len(),
            self.len(),
            self.aggregator,
            elapsed
        );
        Ok(())
    }
}

impl Drop for CounterTable {
    fn drop(&mut self) {
        for &handle in &self.handles {
            self.aggregator.release(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::aggregate::avg::Avg64;
    use crate::aggregate::count::CountStar64;
    use crate::aggregate::group_concat::{GroupConcat, GroupConcatConfig};
    use crate::aggregate::min_max::Min64;
    use crate::aggregate::sum::Sum64;
    use crate::aggregate::text::{AsciiCaseInsensitive, MinText, TextOrdering};
    use crate::common::context::tests::mock_aggregation_args;

    fn table(aggregator: impl Into<Aggregator>) -> CounterTable {
        CounterTable::new(aggregator.into(), &AggregationArgs::default())
    }

    #[test]
    fn test_count_star_with_factor() {
        let mut table = table(CountStar64::new(i64::MAX));
        table.put_row(1, 1000).unwrap();
        assert_eq!(table.value_64(1).unwrap(), Some(1000));
        assert_eq!(table.value_64(2).unwrap(), None);
    }

    #[test]
    fn test_sum_of_values() {
        let mut table = table(Sum64::new());
        for v in [5, -3, 10] {
            table.put_numeric(0, Numeric::Int(v), 1).unwrap();
        }
        assert_eq!(table.value_64(0).unwrap(), Some(12));
        assert_eq!(table.metrics().num_rows, 3);
    }

    #[test]
    fn test_text_min() {
        let mut table = table(MinText::try_new(16, TextOrdering::Binary).unwrap());
        table.put_text(0, b"banana", 1).unwrap();
        table.put_text(0, b"apple", 1).unwrap();
        assert_eq!(table.value_t(0).unwrap().as_deref(), Some(&b"apple"[..]));

        let mut collated = self::table(
            MinText::try_new(16, TextOrdering::Collated(Arc::new(AsciiCaseInsensitive))).unwrap(),
        );
        collated.put_text(0, b"banana", 1).unwrap();
        collated.put_text(0, b"Apple", 1).unwrap();
        assert_eq!(collated.value_t(0).unwrap().as_deref(), Some(&b"Apple"[..]));
    }

    #[test]
    fn test_avg_combine() {
        let template = table(Avg64::new(0));
        let mut a = template.fork();
        for v in [5, 10, 15] {
            a.put_numeric(0, Numeric::Int(v), 1).unwrap();
        }
        let mut b = template.fork();
        b.put_numeric(0, Numeric::Int(10), 7).unwrap();

        a.combine(&b).unwrap();
        assert_eq!(a.value_d(0).unwrap(), Some(10.0));
        assert_eq!(a.metrics().num_rows, 4);
        assert_ne!(a.handle(0), b.handle(0));
    }

    #[test]
    fn test_pack_fast_path_and_skip() {
        let mut table = table(Min64::new());
        assert!(table.aggregate_pack(3, &PackStatistics::from_ints(&[Some(7), Some(4)]), 1).unwrap());
        table.put_numeric(5, Numeric::Int(9), 1).unwrap();
        assert_eq!(table.value_64(3).unwrap(), Some(4));

        assert!(table.pack_cannot_change(&PackStatistics::from_ints(&[Some(12), Some(15)])).unwrap());
        assert!(!table.pack_cannot_change(&PackStatistics::from_ints(&[Some(8)])).unwrap());
        table.put_numeric(5, Numeric::Int(1), 1).unwrap();
        assert!(!table.pack_cannot_change(&PackStatistics::from_ints(&[Some(3)])).unwrap());
        assert!(table.pack_cannot_change(&PackStatistics::from_ints(&[Some(4)])).unwrap());

        let metrics = table.metrics();
        assert_eq!(metrics.packs_aggregated, 1);
        assert_eq!(metrics.packs_skipped, 2);
    }

    #[test]
    fn test_group_limit_disables_skip() {
        let args = mock_aggregation_args();
        let mut table = CounterTable::new(Min64::new().into(), &args);
        for key in 0..=args.skip_group_limit as u64 {
            table.put_numeric(key, Numeric::Int(0), 1).unwrap();
        }
        assert!(!table.pack_cannot_change(&PackStatistics::from_ints(&[Some(100)])).unwrap());
    }

    #[test]
    fn test_group_concat_forks_share_lengths() {
        let config = GroupConcatConfig {
            max_len: 8,
            ..Default::default()
        };
        let template = table(GroupConcat::new(config));
        let mut a = template.fork();
        let mut b = template.fork();
        a.put_text(0, b"ab", 1).unwrap();
        b.put_text(0, b"cd", 1).unwrap();
        b.put_text(1, b"x", 1).unwrap();

        let mut combined = template.fork();
        combined.combine(&a).unwrap();
        combined.combine(&b).unwrap();
        assert_eq!(combined.value_t(0).unwrap().as_deref(), Some(&b"ab,cd"[..]));
        assert_eq!(combined.value_t(1).unwrap().as_deref(), Some(&b"x"[..]));
        assert_eq!(combined.len(), 2);
    }

    #[test]
    fn test_group_concat_tables_created_separately() {
        let aggregator = Aggregator::from(GroupConcat::new(GroupConcatConfig::default()));
        let mut a = CounterTable::new(aggregator.fork(), &AggregationArgs::default());
        let mut b = CounterTable::new(aggregator.fork(), &AggregationArgs::default());
        a.put_text(1, b"aaaa", 1).unwrap();
        b.put_text(1, b"b", 1).unwrap();
        assert_ne!(a.handle(1), b.handle(1));
        assert_eq!(a.value_t(1).unwrap().as_deref(), Some(&b"aaaa"[..]));
        assert_eq!(b.value_t(1).unwrap().as_deref(), Some(&b"b"[..]));

        a.combine(&b).unwrap();
        assert_eq!(a.value_t(1).unwrap().as_deref(), Some(&b"aaaa,b"[..]));
    }

    #[test]
    fn test_dropped_tables_release_side_state() {
        let concat = GroupConcat::new(GroupConcatConfig::default());
        let lengths = Arc::clone(concat.lengths());
        let template = table(concat);

        let mut combined = template.fork();
        {
            let mut partial = template.fork();
            for key in 0..3 {
                partial.put_text(key, b"v", 1).unwrap();
            }
            assert_eq!(lengths.len(), 3);
            combined.combine(&partial).unwrap();
            assert_eq!(lengths.len(), 6);
        }
        assert_eq!(lengths.len(), 3);
        assert_eq!(combined.value_t(2).unwrap().as_deref(), Some(&b"v"[..]));

        drop(combined);
        assert!(lengths.is_empty());
    }
}
