//! Types shared by the counters and the storage statistics

use std::fmt::{self, Display};

/// Null marker of the 64-bit integer counters
pub const NULL_VALUE_64: i64 = i64::MIN + 1;
/// Null marker of the 32-bit integer counters
pub const NULL_VALUE_32: i32 = i32::MIN;
/// Pack statistics use it to express an unbounded minimum
pub const MINUS_INF_64: i64 = i64::MIN;
/// Pack statistics use it to express an unbounded maximum
pub const PLUS_INF_64: i64 = i64::MAX;
/// Bit pattern of the null double: the double whose bits equal [`NULL_VALUE_64`].
///
/// It is not a NaN but the smallest negative subnormal, `-f64::from_bits(1)`. The
/// double counters store their values through [`not_null_double`] so that this value
/// is never taken for null
pub const NULL_VALUE_D_BITS: u64 = NULL_VALUE_64 as u64;

/// Flush the double that collides with [`NULL_VALUE_D_BITS`] to `-0.0`
#[inline]
pub fn not_null_double(v: f64) -> f64 {
    if v.to_bits() == NULL_VALUE_D_BITS { -0.0 } else { v }
}

/// Value passed into the numeric counters and returned by the pack statistics
///
/// Integer columns carry scaled integers, the precision is a property of the
/// aggregator that consumes them
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    /// Integer value
    Int(i64),
    /// Floating point value
    Double(f64),
}

impl Numeric {
    /// Widen the value to double
    #[inline]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Double(v) => v,
        }
    }

    /// Name of the kind, used in error messages
    #[inline]
    pub fn kind(self) -> &'static str {
        match self {
            Self::Int(_) => "integer",
            Self::Double(_) => "double",
        }
    }
}

impl Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
        }
    }
}

/// Stable identity of a group in the grouping table.
///
/// The handle does not change when the grouping table moves the counter rows, side
/// tables of the aggregators are keyed by it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct GroupHandle(u64);

impl GroupHandle {
    /// Create a new handle
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id of the handle
    #[inline]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl Display for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
