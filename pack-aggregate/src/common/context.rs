//! [`AggregationArgs`] holds the knobs of the aggregation kernel that the session
//! configures before the scan

/// Default number of groups above which the skip statistics are not maintained
pub const DEFAULT_SKIP_GROUP_LIMIT: usize = 1024;

/// Default upper bound, in bytes, of a `GROUP_CONCAT` result
pub const DEFAULT_GROUP_CONCAT_MAX_LEN: usize = 1024;

/// Arguments for the aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationArgs {
    /// When the grouping table holds more groups than this limit, refreshing the skip
    /// statistics costs more than scanning the pack. The skip evaluator then answers
    /// that the pack may change the aggregation
    pub skip_group_limit: usize,
    /// Maximal length of the `GROUP_CONCAT` result, the excess bytes are dropped
    pub group_concat_max_len: usize,
}

impl Default for AggregationArgs {
    fn default() -> Self {
        Self {
            skip_group_limit: DEFAULT_SKIP_GROUP_LIMIT,
            group_concat_max_len: DEFAULT_GROUP_CONCAT_MAX_LEN,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn mock_aggregation_args() -> AggregationArgs {
        AggregationArgs {
            skip_group_limit: 16,
            group_concat_max_len: 32,
        }
    }

    #[test]
    fn test_default_args() {
        let args = AggregationArgs::default();
        assert_eq!(args.skip_group_limit, 1024);
        assert_eq!(args.group_concat_max_len, 1024);
        assert_ne!(mock_aggregation_args(), args);
    }
}
