//! `GROUP_CONCAT` aggregation function
//!
//! The counter is a bounded region of `max_len` bytes that holds the concatenated
//! values. The length of each group lives in [`ConcatLengths`], a side table keyed by
//! the [`GroupHandle`] and shared by all of the copies of the aggregator. Handles are
//! unique within the process, so tables created independently from copies of the
//! same aggregator never share an entry. Absence of the group in the side table means
//! null.
//!
//! Ordered results are produced at read time: the region is split on the separator
//! and the pieces are sorted. Values that contain the separator are split too

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use super::skip::StatisticsState;
use super::{
    Capabilities, CounterAggregator, CounterBuffer, CounterRef, Result, Stringify, parse_real,
};
use crate::common::context::{AggregationArgs, DEFAULT_GROUP_CONCAT_MAX_LEN};
use crate::common::types::GroupHandle;
use crate::common::utils::hash::{BUILD_HASHER_DEFAULT, BuildHasherDefault};

/// Order of the concatenated values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcatOrder {
    /// Values in the order they are folded
    #[default]
    Unordered,
    /// Ascending
    Ascending,
    /// Descending
    Descending,
}

impl fmt::Display for ConcatOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unordered => f.write_str("unordered"),
            Self::Ascending => f.write_str("asc"),
            Self::Descending => f.write_str("desc"),
        }
    }
}

/// Kind of the aggregated column, decides how ordered results are sorted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcatValueKind {
    /// Sort the values as byte strings
    #[default]
    Text,
    /// Sort the values as numbers, the caller passes their text form
    Numeric,
}

/// Configuration of `GROUP_CONCAT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConcatConfig {
    /// Separator between two values
    pub separator: Vec<u8>,
    /// Order of the values in the result
    pub order: ConcatOrder,
    /// Maximal length of the result, the excess bytes are dropped
    pub max_len: usize,
    /// Kind of the aggregated column
    pub value_kind: ConcatValueKind,
}

impl Default for GroupConcatConfig {
    fn default() -> Self {
        Self {
            separator: b",".to_vec(),
            order: ConcatOrder::Unordered,
            max_len: DEFAULT_GROUP_CONCAT_MAX_LEN,
            value_kind: ConcatValueKind::Text,
        }
    }
}

impl GroupConcatConfig {
    /// Default configuration bounded by the session arguments
    pub fn with_args(args: &AggregationArgs) -> Self {
        Self {
            max_len: args.group_concat_max_len,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ConcatEntry {
    len: usize,
    truncated: bool,
}

/// Length side table of `GROUP_CONCAT`, keyed by the group handle
///
/// Concurrent accumulation into the same group from different threads is not
/// serialized by the table, only the accesses to the table itself are
#[derive(Debug)]
pub struct ConcatLengths {
    entries: Mutex<HashMap<GroupHandle, ConcatEntry, BuildHasherDefault>>,
}

impl Default for ConcatLengths {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::with_hasher(BUILD_HASHER_DEFAULT)),
        }
    }
}

impl ConcatLengths {
    /// Length of the group, `None` means null
    pub fn get(&self, handle: GroupHandle) -> Option<usize> {
        self.entries.lock().get(&handle).map(|entry| entry.len)
    }

    /// Number of not null groups
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if all of the groups are null
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn entry(&self, handle: GroupHandle) -> Option<ConcatEntry> {
        self.entries.lock().get(&handle).copied()
    }

    fn set(&self, handle: GroupHandle, entry: ConcatEntry) {
        self.entries.lock().insert(handle, entry);
    }

    fn remove(&self, handle: GroupHandle) {
        self.entries.lock().remove(&handle);
    }
}

/// `GROUP_CONCAT`
#[derive(Debug, Clone)]
pub struct GroupConcat {
    config: GroupConcatConfig,
    lengths: Arc<ConcatLengths>,
    stats: StatisticsState,
}

impl GroupConcat {
    const NAME: &'static str = "GroupConcat";

    /// Create a new `GROUP_CONCAT` with its own side table
    pub fn new(config: GroupConcatConfig) -> Self {
        Self::with_lengths(config, Arc::default())
    }

    /// Create a new `GROUP_CONCAT` that records the lengths into `lengths`
    pub fn with_lengths(config: GroupConcatConfig, lengths: Arc<ConcatLengths>) -> Self {
        Self {
            config,
            lengths,
            stats: StatisticsState::default(),
        }
    }

    /// Configuration of the aggregator
    pub fn config(&self) -> &GroupConcatConfig {
        &self.config
    }

    /// Side table of the lengths
    pub fn lengths(&self) -> &Arc<ConcatLengths> {
        &self.lengths
    }

    /// Append `value` to the group `repeat` times, the separator goes between two
    /// values
    fn append(&mut self, buf: &mut CounterBuffer<'_>, value: &[u8], repeat: usize) -> Result<()> {
        let handle = buf.handle();
        let bytes = buf.checked_bytes_mut(Self::NAME, self.config.max_len)?;
        if repeat == 0 {
            return Ok(());
        }
        let previous = self.lengths.entry(handle);
        let mut len = previous.map(|entry| entry.len);
        let mut truncated = false;
        for _ in 0..repeat {
            let current = match len {
                None => 0,
                Some(current) => {
                    if current >= bytes.len() {
                        truncated = true;
                        break;
                    }
                    let (current, cut) = copy_bounded(bytes, current, &self.config.separator);
                    truncated |= cut;
                    current
                }
            };
            let (current, cut) = copy_bounded(bytes, current, value);
            truncated |= cut;
            len = Some(current);
        }

        let Some(len) = len else {
            return Ok(());
        };
        let warned = previous.is_some_and(|entry| entry.truncated);
        if truncated && !warned {
            tracing::warn!(
                "`{}` result of group {} is truncated to {} bytes",
                Self::NAME,
                handle,
                self.config.max_len
            );
        }
        self.lengths.set(
            handle,
            ConcatEntry {
                len,
                truncated: truncated || warned,
            },
        );
        self.stats.invalidate();
        Ok(())
    }

    fn sort(&self, pieces: &mut [&[u8]]) {
        match self.config.value_kind {
            ConcatValueKind::Text => pieces.sort_unstable(),
            ConcatValueKind::Numeric => pieces.sort_by(|lhs, rhs| compare_numeric(lhs, rhs)),
        }
        if self.config.order == ConcatOrder::Descending {
            pieces.reverse();
        }
    }
}

/// Copy `part` at `offset`, as many bytes as the region can hold. Returns the new
/// length and whether bytes are dropped
#[inline]
fn copy_bounded(bytes: &mut [u8], offset: usize, part: &[u8]) -> (usize, bool) {
    let room = bytes.len() - offset;
    let copied = part.len().min(room);
    bytes[offset..offset + copied].copy_from_slice(&part[..copied]);
    (offset + copied, copied < part.len())
}

/// Unparsable values come first
fn compare_numeric(lhs: &[u8], rhs: &[u8]) -> Ordering {
    match (parse_real(lhs), parse_real(rhs)) {
        (Some(l), Some(r)) => l.total_cmp(&r),
        (l, r) => l.is_some().cmp(&r.is_some()),
    }
}

fn split_separator<'a>(haystack: &'a [u8], separator: &[u8]) -> Vec<&'a [u8]> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut cursor = 0;
    while cursor + separator.len() <= haystack.len() {
        if &haystack[cursor..cursor + separator.len()] == separator {
            pieces.push(&haystack[start..cursor]);
            cursor += separator.len();
            start = cursor;
        } else {
            cursor += 1;
        }
    }
    pieces.push(&haystack[start..]);
    pieces
}

impl Stringify for GroupConcat {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(separator: {:?}, order: {}, max_len: {})",
            Self::NAME,
            String::from_utf8_lossy(&self.config.separator),
            self.config.order,
            self.config.max_len
        )
    }
}

impl CounterAggregator for GroupConcat {
    fn buffer_byte_size(&self) -> usize {
        self.config.max_len
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
        let handle = buf.handle();
        buf.checked_bytes_mut(Self::NAME, self.config.max_len)?.fill(0);
        self.lengths.remove(handle);
        self.stats.invalidate();
        Ok(())
    }

    /// The value is appended `factor` times
    fn put_text(&mut self, buf: &mut CounterBuffer<'_>, value: &[u8], factor: i64) -> Result<()> {
        self.append(buf, value, usize::try_from(factor).unwrap_or_default())
    }

    fn merge(&mut self, dst: &mut CounterBuffer<'_>, src: CounterRef<'_>) -> Result<()> {
        let bytes = src.checked_bytes(Self::NAME, self.config.max_len)?;
        match self.lengths.get(src.handle()) {
            Some(len) => self.append(dst, &bytes[..len], 1),
            None => Ok(()),
        }
    }

    fn release(&mut self, handle: GroupHandle) {
        self.lengths.remove(handle);
    }

    fn get_value_t<'a>(&self, buf: CounterRef<'a>) -> Result<Option<Cow<'a, [u8]>>> {
        let bytes = buf.checked_bytes(Self::NAME, self.config.max_len)?;
        let Some(len) = self.lengths.get(buf.handle()) else {
            return Ok(None);
        };
        let concatenated = &bytes[..len];
        if self.config.order == ConcatOrder::Unordered || self.config.separator.is_empty() {
            return Ok(Some(Cow::Borrowed(concatenated)));
        }

        let mut pieces = split_separator(concatenated, &self.config.separator);
        self.sort(&mut pieces);
        let mut sorted = pieces.join(&self.config.separator[..]);
        sorted.truncate(self.config.max_len);
        Ok(Some(Cow::Owned(sorted)))
    }
}
