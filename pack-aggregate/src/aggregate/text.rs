//! Min/Max over text, bytewise or through a collation

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt::{self, Debug};
use std::sync::Arc;

use super::buffer::TextField;
use super::skip::StatisticsState;
use super::{
    Capabilities, CounterAggregator, CounterBuffer, CounterRef, PackNeeds, Result, Stringify,
};

/// Comparator of the type subsystem. The aggregators only rely on it being a total
/// order over the byte strings
pub trait Collation: Debug + Send + Sync {
    /// Name of the collation
    fn name(&self) -> &str;

    /// Compare two strings
    fn compare(&self, lhs: &[u8], rhs: &[u8]) -> Ordering;
}

/// ASCII case insensitive collation, the other bytes compare bytewise
#[derive(Debug, Clone, Copy, Default)]
pub struct AsciiCaseInsensitive;

impl Collation for AsciiCaseInsensitive {
    fn name(&self) -> &str {
        "ascii_ci"
    }

    fn compare(&self, lhs: &[u8], rhs: &[u8]) -> Ordering {
        lhs.iter()
            .map(u8::to_ascii_lowercase)
            .cmp(rhs.iter().map(u8::to_ascii_lowercase))
    }
}

/// How the text aggregators order the strings
#[derive(Debug, Clone, Default)]
pub enum TextOrdering {
    /// Compare the bytes
    #[default]
    Binary,
    /// Compare with the collation
    Collated(Arc<dyn Collation>),
}

impl TextOrdering {
    /// Compare two strings
    #[inline]
    pub fn compare(&self, lhs: &[u8], rhs: &[u8]) -> Ordering {
        match self {
            Self::Binary => lhs.cmp(rhs),
            Self::Collated(collation) => collation.compare(lhs, rhs),
        }
    }
}

impl fmt::Display for TextOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("binary"),
            Self::Collated(collation) => f.write_str(collation.name()),
        }
    }
}

/// Min/Max over text
///
/// The counter holds at most `max_len` bytes. Text is compared with the
/// [`TextOrdering`]. There is no pack fast path and no pack can be skipped: the pack
/// statistics of text columns are not available to the aggregators
#[derive(Debug, Clone)]
pub struct TextMinMax<const IS_MIN: bool> {
    field: TextField,
    ordering: TextOrdering,
    stats: StatisticsState,
}

/// Min over text
pub type MinText = TextMinMax<true>;
/// Max over text
pub type MaxText = TextMinMax<false>;

impl<const IS_MIN: bool> TextMinMax<IS_MIN> {
    const NAME: &'static str = if IS_MIN { "MinText" } else { "MaxText" };

    /// Create a new min/max over text no longer than `max_len` bytes
    pub fn try_new(max_len: usize, ordering: TextOrdering) -> Result<Self> {
        Ok(Self {
            field: TextField::try_new(Self::NAME, max_len)?,
            ordering,
            stats: StatisticsState::default(),
        })
    }

    fn fold(&mut self, bytes: &mut [u8], value: &[u8]) -> Result<()> {
        let replace = match self.field.load(bytes) {
            None => true,
            Some(current) => {
                let ordering = self.ordering.compare(value, current);
                if IS_MIN {
                    ordering == Ordering::Less
                } else {
                    ordering == Ordering::Greater
                }
            }
        };
        if replace {
            self.field.store(Self::NAME, bytes, value)?;
            self.stats.invalidate();
        }
        Ok(())
    }
}

impl<const IS_MIN: bool> Stringify for TextMinMax<IS_MIN> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(max_len: {}, ordering: {})",
            Self::NAME,
            self.field.capacity(),
            self.ordering
        )
    }
}

impl<const IS_MIN: bool> CounterAggregator for TextMinMax<IS_MIN> {
    fn buffer_byte_size(&self) -> usize {
        self.field.width()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new()
            .distinct_irrelevant()
            .factor_irrelevant()
            .with_pack(PackNeeds {
                distinct_irrelevant: true,
                ..PackNeeds::NONE
            })
    }

    fn statistics(&self) -> StatisticsState {
        self.stats
    }

    fn statistics_mut(&mut self) -> &mut StatisticsState {
        &mut self.stats
    }

    fn reset(&mut self, buf: &mut CounterBuffer<'_>) -> Result<()> {
        self.field
            .clear(buf.checked_bytes_mut(Self::NAME, self.field.width())?);
        self.stats.invalidate();
        Ok(())
    }

    fn put_text(&mut self, buf: &mut CounterBuffer<'_>, value: &[u8], _factor: i64) -> Result<()> {
        let width = self.field.width();
        self.fold(buf.checked_bytes_mut(Self::NAME, width)?, value)
    }

    fn merge(&mut self, dst: &mut CounterBuffer<'_>, src: CounterRef<'_>) -> Result<()> {
        let width = self.field.width();
        if let Some(partial) = self.field.load(src.checked_bytes(Self::NAME, width)?) {
            self.fold(dst.checked_bytes_mut(Self::NAME, width)?, partial)?;
        }
        Ok(())
    }

    fn get_value_t<'a>(&self, buf: CounterRef<'a>) -> Result<Option<Cow<'a, [u8]>>> {
        let bytes = buf.checked_bytes(Self::NAME, self.field.width())?;
        Ok(self.field.load(bytes).map(Cow::Borrowed))
    }
}
