//! Decide whether a pack can be skipped because it can not change any counter
//!
//! The aggregators maintain an aggregate over all of the groups (e.g. the largest
//! current minimum) and compare the pack statistics with it. Refreshing this aggregate
//! visits every group, therefore it is only done when the statistics are stale and the
//! number of groups is small

use snafu::ensure;

use super::pack::PackStatistics;
use super::{CounterAggregator, CounterRef, Result, StaleStatisticsSnafu};
use crate::common::context::AggregationArgs;

/// Freshness of the skip statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatisticsState {
    /// Counters changed after the statistics were computed
    #[default]
    Dirty,
    /// Statistics reflect all of the counters
    Fresh,
}

impl StatisticsState {
    /// Statistics should be refreshed before asking for a skip decision
    #[inline]
    pub fn needs_update(self) -> bool {
        self == Self::Dirty
    }

    /// All of the groups are folded into the statistics
    #[inline]
    pub fn mark_fresh(&mut self) {
        *self = Self::Fresh;
    }

    /// A counter changed
    #[inline]
    pub fn invalidate(&mut self) {
        *self = Self::Dirty;
    }

    /// Fail if the statistics are stale
    #[inline]
    pub fn ensure_fresh(self, func: &'static str) -> Result<()> {
        ensure!(self == Self::Fresh, StaleStatisticsSnafu { func });
        Ok(())
    }
}

/// Drives the skip statistics of an aggregator over the groups of the grouping table
#[derive(Debug, Clone, Copy)]
pub struct PackSkipEvaluator {
    group_limit: usize,
}

impl Default for PackSkipEvaluator {
    fn default() -> Self {
        Self::new(&AggregationArgs::default())
    }
}

impl PackSkipEvaluator {
    /// Create a new evaluator
    pub fn new(args: &AggregationArgs) -> Self {
        Self {
            group_limit: args.skip_group_limit,
        }
    }

    /// Maximal number of groups the statistics are maintained for
    #[inline]
    pub fn group_limit(&self) -> usize {
        self.group_limit
    }

    /// Recompute the skip statistics of the aggregator if they are stale
    pub fn refresh<'a, A, I>(&self, aggregator: &mut A, groups: I) -> Result<()>
    where
        A: CounterAggregator + ?Sized,
        I: IntoIterator<Item = CounterRef<'a>>,
    {
        if !aggregator.statistics_needs_update() {
            return Ok(());
        }

        aggregator.reset_statistics();
        let mut visited = 0_usize;
        for group in groups {
            visited += 1;
            if aggregator.update_statistics(group)? {
                break;
            }
        }
        aggregator.set_statistics_updated();
        tracing::trace!(
            "`{}` refreshed its skip statistics after visiting {visited} groups",
            aggregator.name()
        );
        Ok(())
    }

    /// Returns true if the pack described by `stats` can not change any of the
    /// `group_count` counters produced by `groups`.
    ///
    /// Unknown pack statistics never lead to a skip
    pub fn pack_cannot_change<'a, A, I>(
        &self,
        aggregator: &mut A,
        groups: I,
        group_count: usize,
        stats: &PackStatistics,
    ) -> Result<bool>
    where
        A: CounterAggregator + ?Sized,
        I: IntoIterator<Item = CounterRef<'a>>,
    {
        if group_count > self.group_limit {
            return Ok(false);
        }

        self.refresh(aggregator, groups)?;

        if stats.is_null_only() && aggregator.ignore_nulls() {
            return Ok(true);
        }

        let needs = aggregator.pack_needs();
        if needs.min {
            let Some(min) = stats.min else {
                return Ok(false);
            };
            aggregator.set_aggregate_pack_min(min)?;
        }
        if needs.max {
            let Some(max) = stats.max else {
                return Ok(false);
            };
            aggregator.set_aggregate_pack_max(max)?;
        }

        let skip = aggregator.pack_cannot_change_aggregation()?;
        if skip {
            tracing::debug!(
                "`{}` can not be changed by the pack of {} rows",
                aggregator.name(),
                stats.rows
            );
        }
        Ok(skip)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::aggregate::Aggregator;
    use crate::aggregate::count::{Count32, Count64};
    use crate::aggregate::list::{List64, ListText};
    use crate::aggregate::min_max::{Max32, Max64, MaxDouble, Min32, Min64, MinDouble};
    use crate::aggregate::sum::{Sum64, SumDouble};
    use crate::aggregate::tests::OwnedCounter;
    use crate::common::types::Numeric;

    fn views(counters: &[OwnedCounter]) -> impl Iterator<Item = CounterRef<'_>> {
        counters.iter().map(|c| c.view())
    }

    #[test]
    fn test_state_machine() {
        let mut state = StatisticsState::default();
        assert!(state.needs_update());
        assert!(state.ensure_fresh("Min64").is_err());
        state.mark_fresh();
        assert!(state.ensure_fresh("Min64").is_ok());
        state.invalidate();
        assert!(state.needs_update());
    }

    #[test]
    fn test_stale_statistics_is_an_error() {
        let mut min = Min64::new();
        let mut counter = OwnedCounter::new(&mut min, 0);
        min.reset_statistics();
        min.update_statistics(counter.view()).unwrap();
        min.set_statistics_updated();
        assert!(min.pack_cannot_change_aggregation().is_ok());

        min.put_numeric(&mut counter.buf(), Numeric::Int(3), 1).unwrap();
        let err = min.pack_cannot_change_aggregation().unwrap_err();
        expect_test::expect![
            "`Min64` is asked whether the pack can change the aggregation while its statistics are stale"
        ]
        .assert_eq(&err.to_string());
    }

    #[test]
    fn test_min_scenario() {
        // Groups with minimum 5 and 9, so the largest minimum is 9
        let evaluator = PackSkipEvaluator::default();
        let mut min = Min64::new();
        let mut counters = vec![OwnedCounter::new(&mut min, 0), OwnedCounter::new(&mut min, 1)];
        min.put_numeric(&mut counters[0].buf(), Numeric::Int(5), 1).unwrap();
        min.put_numeric(&mut counters[1].buf(), Numeric::Int(9), 1).unwrap();

        let pack = PackStatistics::from_ints(&[Some(12), Some(15)]);
        assert!(
            evaluator
                .pack_cannot_change(&mut min, views(&counters), 2, &pack)
                .unwrap()
        );

        let pack = PackStatistics::from_ints(&[Some(7), Some(15)]);
        assert!(
            !evaluator
                .pack_cannot_change(&mut min, views(&counters), 2, &pack)
                .unwrap()
        );
    }

    #[test]
    fn test_null_group_prevents_skip() {
        let evaluator = PackSkipEvaluator::default();
        let mut max = Max64::new();
        let mut counters = vec![OwnedCounter::new(&mut max, 0), OwnedCounter::new(&mut max, 1)];
        max.put_numeric(&mut counters[0].buf(), Numeric::Int(100), 1).unwrap();

        let pack = PackStatistics::from_ints(&[Some(1)]);
        assert!(
            !evaluator
                .pack_cannot_change(&mut max, views(&counters), 2, &pack)
                .unwrap()
        );

        max.put_numeric(&mut counters[1].buf(), Numeric::Int(50), 1).unwrap();
        assert!(
            evaluator
                .pack_cannot_change(&mut max, views(&counters), 2, &pack)
                .unwrap()
        );
    }

    #[test]
    fn test_sum_skips_zero_packs() {
        let evaluator = PackSkipEvaluator::default();
        let mut sum = Sum64::new();
        let mut counters = vec![OwnedCounter::new(&mut sum, 0)];
        let zeros = PackStatistics::from_ints(&[Some(0), Some(0)]);
        // The null group would become 0
        assert!(
            !evaluator
                .pack_cannot_change(&mut sum, views(&counters), 1, &zeros)
                .unwrap()
        );

        sum.put_numeric(&mut counters[0].buf(), Numeric::Int(4), 1).unwrap();
        assert!(
            evaluator
                .pack_cannot_change(&mut sum, views(&counters), 1, &zeros)
                .unwrap()
        );

        let pack = PackStatistics::from_ints(&[Some(0), Some(1)]);
        assert!(
            !evaluator
                .pack_cannot_change(&mut sum, views(&counters), 1, &pack)
                .unwrap()
        );
    }

    #[test]
    fn test_count_reaches_upper_bound() {
        let evaluator = PackSkipEvaluator::default();
        let mut count = Count64::new(2);
        let mut counters = vec![OwnedCounter::new(&mut count, 0), OwnedCounter::new(&mut count, 1)];
        count.put_row(&mut counters[0].buf(), 2).unwrap();
        let pack = PackStatistics::with_rows(10);
        assert!(
            !evaluator
                .pack_cannot_change(&mut count, views(&counters), 2, &pack)
                .unwrap()
        );

        count.put_row(&mut counters[1].buf(), 2).unwrap();
        assert!(
            evaluator
                .pack_cannot_change(&mut count, views(&counters), 2, &pack)
                .unwrap()
        );
    }

    #[test]
    fn test_list_skips_when_every_group_has_value() {
        let evaluator = PackSkipEvaluator::default();
        let mut list = List64::new();
        let mut counters = vec![OwnedCounter::new(&mut list, 0)];
        let pack = PackStatistics::from_ints(&[Some(1)]);
        assert!(
            !evaluator
                .pack_cannot_change(&mut list, views(&counters), 1, &pack)
                .unwrap()
        );
        list.put_numeric(&mut counters[0].buf(), Numeric::Int(3), 1).unwrap();
        assert!(
            evaluator
                .pack_cannot_change(&mut list, views(&counters), 1, &pack)
                .unwrap()
        );
    }

    #[test]
    fn test_group_limit_and_unknown_statistics() {
        let evaluator = PackSkipEvaluator::new(&AggregationArgs {
            skip_group_limit: 1,
            ..Default::default()
        });
        let mut min = Min64::new();
        let mut counters = vec![OwnedCounter::new(&mut min, 0), OwnedCounter::new(&mut min, 1)];
        for c in &mut counters {
            min.put_numeric(&mut c.buf(), Numeric::Int(0), 1).unwrap();
        }
        let pack = PackStatistics::from_ints(&[Some(10)]);
        assert!(
            !evaluator
                .pack_cannot_change(&mut min, views(&counters), 2, &pack)
                .unwrap()
        );

        let evaluator = PackSkipEvaluator::default();
        assert!(
            evaluator
                .pack_cannot_change(&mut min, views(&counters), 2, &pack)
                .unwrap()
        );
        let unknown = PackStatistics::with_rows(1);
        assert!(
            !evaluator
                .pack_cannot_change(&mut min, views(&counters), 2, &unknown)
                .unwrap()
        );

        // Null only packs never change null ignoring aggregators
        let nulls = PackStatistics::from_ints(&[None, None]);
        assert!(
            evaluator
                .pack_cannot_change(&mut min, views(&counters), 2, &nulls)
                .unwrap()
        );
    }

    #[test]
    fn test_double_statistics_accept_infinity_markers() {
        let evaluator = PackSkipEvaluator::default();
        let mut min = MinDouble::new();
        let mut counters = vec![OwnedCounter::new(&mut min, 0)];
        min.put_numeric(&mut counters[0].buf(), Numeric::Double(1.0), 1).unwrap();
        let pack = PackStatistics {
            rows: 3,
            not_nulls: Some(3),
            sum: None,
            min: Some(Numeric::Int(crate::common::types::MINUS_INF_64)),
            max: Some(Numeric::Double(4.0)),
        };
        assert!(
            !evaluator
                .pack_cannot_change(&mut min, views(&counters), 1, &pack)
                .unwrap()
        );
    }

    #[derive(Debug, Clone, Copy)]
    enum Input {
        Int,
        Double,
        Text,
    }

    impl Input {
        fn sample(self, rng: &mut StdRng) -> Value {
            match self {
                Self::Int => Value::Numeric(Numeric::Int(rng.gen_range(-3..4))),
                Self::Double => {
                    const DOUBLES: [f64; 6] = [-1.5, -0.5, 0.0, 0.0, 0.5, 2.0];
                    Value::Numeric(Numeric::Double(DOUBLES[rng.gen_range(0..DOUBLES.len())]))
                }
                Self::Text => {
                    const TEXTS: [&[u8]; 3] = [b"a", b"bb", b""];
                    Value::Text(TEXTS[rng.gen_range(0..TEXTS.len())])
                }
            }
        }

        fn statistics(self, values: &[Option<Value>]) -> PackStatistics {
            match self {
                Self::Int => PackStatistics::from_ints(
                    &values
                        .iter()
                        .map(|v| match v {
                            Some(Value::Numeric(Numeric::Int(v))) => Some(*v),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                ),
                Self::Double => PackStatistics::from_doubles(
                    &values
                        .iter()
                        .map(|v| match v {
                            Some(Value::Numeric(Numeric::Double(v))) => Some(*v),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                ),
                Self::Text => PackStatistics {
                    rows: values.len() as i64,
                    not_nulls: Some(values.iter().flatten().count() as i64),
                    ..Default::default()
                },
            }
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum Value {
        Numeric(Numeric),
        Text(&'static [u8]),
    }

    fn put(aggregator: &mut Aggregator, counter: &mut OwnedCounter, value: Value) {
        match value {
            Value::Numeric(v) => aggregator.put_numeric(&mut counter.buf(), v, 1).unwrap(),
            Value::Text(v) => aggregator.put_text(&mut counter.buf(), v, 1).unwrap(),
        }
    }

    /// Observable state of a counter. Counts are observed through the `max_counter`
    /// bound, the grouping table never feeds a counter beyond it
    fn observe(
        aggregator: &Aggregator,
        counter: &OwnedCounter,
        max_counter: Option<i64>,
    ) -> Vec<u8> {
        match max_counter {
            Some(max) => {
                let count = aggregator.get_value_64(counter.view()).unwrap().unwrap_or(0);
                count.min(max).to_le_bytes().to_vec()
            }
            None => counter.view().bytes().to_vec(),
        }
    }

    /// Whenever the evaluator answers "skip", folding the pack row by row leaves every
    /// counter untouched
    #[test]
    fn test_skip_soundness_randomized() {
        const MAX_COUNTER: i64 = 3;

        let mut rng = StdRng::seed_from_u64(0x5eed);
        let evaluator = PackSkipEvaluator::default();
        let templates: Vec<(Aggregator, Input, Option<i64>)> = vec![
            (Min32::new().into(), Input::Int, None),
            (Min64::new().into(), Input::Int, None),
            (Max32::new().into(), Input::Int, None),
            (Max64::new().into(), Input::Int, None),
            (Sum64::new().into(), Input::Int, None),
            (List64::new().into(), Input::Int, None),
            (MinDouble::new().into(), Input::Double, None),
            (MaxDouble::new().into(), Input::Double, None),
            (SumDouble::new().into(), Input::Double, None),
            (ListText::try_new(4).unwrap().into(), Input::Text, None),
            (Count32::new(MAX_COUNTER).into(), Input::Int, Some(MAX_COUNTER)),
            (Count64::new(MAX_COUNTER).into(), Input::Double, Some(MAX_COUNTER)),
        ];

        let mut skipped = vec![0; templates.len()];
        for round in 0..2400 {
            let index = round % templates.len();
            let (template, input, max_counter) = &templates[index];
            let mut aggregator = template.fork();
            let group_count = rng.gen_range(1..5);
            let mut counters = (0..group_count)
                .map(|id| OwnedCounter::new(&mut aggregator, id))
                .collect::<Vec<_>>();

            // Pre-populate the groups, some of them stay null
            for counter in &mut counters {
                for _ in 0..rng.gen_range(0..5) {
                    let value = input.sample(&mut rng);
                    put(&mut aggregator, counter, value);
                }
            }

            let values = (0..rng.gen_range(1..6))
                .map(|_| rng.gen_bool(0.8).then(|| input.sample(&mut rng)))
                .collect::<Vec<_>>();
            let stats = input.statistics(&values);
            if !evaluator
                .pack_cannot_change(&mut aggregator, views(&counters), counters.len(), &stats)
                .unwrap()
            {
                continue;
            }
            skipped[index] += 1;

            for counter in &mut counters {
                let before = observe(&aggregator, counter, *max_counter);
                for value in values.iter().flatten() {
                    put(&mut aggregator, counter, *value);
                }
                assert_eq!(
                    before,
                    observe(&aggregator, counter, *max_counter),
                    "`{}` skipped a pack {values:?} that changes a counter",
                    aggregator
                );
            }
        }
        for ((template, ..), skipped) in templates.iter().zip(skipped) {
            assert!(skipped > 0, "`{template}` never skipped a pack");
        }
    }
}
