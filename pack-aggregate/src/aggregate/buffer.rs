//! Typed views over the counter buffers.
//!
//! The grouping table owns the bytes, the aggregators only know the layout of their
//! counters. Instead of casting the raw bytes to structs, each aggregator declares the
//! [`Field`]s of its counter and reads/writes them in little endian. The width of the
//! buffer is checked once when the aggregator touches it, afterwards the field accesses
//! are in bounds

use std::marker::PhantomData;

use snafu::ensure;

use super::{BufferWidthMismatchSnafu, Result, TextCapacitySnafu, TextTooLongSnafu};
use crate::common::types::{GroupHandle, NULL_VALUE_D_BITS};

/// Value that can be stored in a [`Field`]
pub trait SlotValue: Copy {
    /// Number of bytes the value occupies
    const WIDTH: usize;

    /// Decode the value from the first `WIDTH` bytes
    fn decode(bytes: &[u8]) -> Self;

    /// Encode the value into the first `WIDTH` bytes
    fn encode(self, bytes: &mut [u8]);
}

macro_rules! impl_slot_value {
    ($($ty:ty),+) => {
        $(
            impl SlotValue for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0_u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::WIDTH]);
                    <$ty>::from_le_bytes(raw)
                }

                #[inline]
                fn encode(self, bytes: &mut [u8]) {
                    bytes[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
                }
            }
        )+
    };
}

impl_slot_value!(u8, u16, i32, i64, u64, f64);

/// Field of a counter at a fixed offset
#[derive(Debug, Clone, Copy)]
pub struct Field<T> {
    offset: usize,
    _phantom: PhantomData<T>,
}

impl<T: SlotValue> Field<T> {
    /// Create a field that starts at `offset`
    pub const fn at(offset: usize) -> Self {
        Self {
            offset,
            _phantom: PhantomData,
        }
    }

    /// Offset of the first byte after the field
    pub const fn end(&self) -> usize {
        self.offset + T::WIDTH
    }

    /// Read the field
    #[inline]
    pub fn read(&self, bytes: &[u8]) -> T {
        T::decode(&bytes[self.offset..])
    }

    /// Write the field
    #[inline]
    pub fn write(&self, bytes: &mut [u8], value: T) {
        value.encode(&mut bytes[self.offset..])
    }
}

impl Field<f64> {
    /// Read the double, the null bit pattern is returned as `None`
    #[inline]
    pub fn read_nullable(&self, bytes: &[u8]) -> Option<f64> {
        let bits = u64::decode(&bytes[self.offset..]);
        (bits != NULL_VALUE_D_BITS).then(|| f64::from_bits(bits))
    }

    /// Write the null bit pattern
    #[inline]
    pub fn write_null(&self, bytes: &mut [u8]) {
        NULL_VALUE_D_BITS.encode(&mut bytes[self.offset..])
    }
}

/// Layout of the text counters: `<len u16><bytes[capacity]>`.
///
/// A zero length with the marker byte (the first byte of the payload) unset is null,
/// with the marker set it is the empty string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextField {
    capacity: usize,
}

impl TextField {
    const LEN: Field<u16> = Field::at(0);
    const PAYLOAD: usize = 2;
    const EMPTY_MARKER: u8 = 1;

    /// Create the layout of a text counter that holds at most `capacity` bytes
    pub fn try_new(func: &'static str, capacity: usize) -> Result<Self> {
        ensure!(
            capacity <= u16::MAX as usize,
            TextCapacitySnafu { func, capacity }
        );
        Ok(Self { capacity })
    }

    /// Maximal number of bytes the counter can hold
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Width of the counter. The marker byte needs room even if the capacity is zero
    #[inline]
    pub fn width(&self) -> usize {
        Self::PAYLOAD + self.capacity.max(1)
    }

    /// Load the text, `None` means null
    #[inline]
    pub fn load<'a>(&self, bytes: &'a [u8]) -> Option<&'a [u8]> {
        let len = (Self::LEN.read(bytes) as usize).min(self.capacity);
        if len == 0 && bytes[Self::PAYLOAD] != Self::EMPTY_MARKER {
            None
        } else {
            Some(&bytes[Self::PAYLOAD..Self::PAYLOAD + len])
        }
    }

    /// Store the text, text longer than the capacity is rejected
    pub fn store(&self, func: &'static str, bytes: &mut [u8], text: &[u8]) -> Result<()> {
        ensure!(
            text.len() <= self.capacity,
            TextTooLongSnafu {
                func,
                len: text.len(),
                capacity: self.capacity
            }
        );
        self.clear(bytes);
        Self::LEN.write(bytes, text.len() as u16);
        if text.is_empty() {
            bytes[Self::PAYLOAD] = Self::EMPTY_MARKER;
        } else {
            bytes[Self::PAYLOAD..Self::PAYLOAD + text.len()].copy_from_slice(text);
        }
        Ok(())
    }

    /// Set the counter to null
    #[inline]
    pub fn clear(&self, bytes: &mut [u8]) {
        bytes[..self.width()].fill(0);
    }
}

/// Mutable counter of a single group
#[derive(Debug)]
pub struct CounterBuffer<'a> {
    handle: GroupHandle,
    bytes: &'a mut [u8],
}

impl<'a> CounterBuffer<'a> {
    /// Create a counter buffer of the group identified by `handle`
    #[inline]
    pub fn new(handle: GroupHandle, bytes: &'a mut [u8]) -> Self {
        Self { handle, bytes }
    }

    /// Handle of the group that owns the counter
    #[inline]
    pub fn handle(&self) -> GroupHandle {
        self.handle
    }

    /// Number of bytes in the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the buffer has no byte
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read only view of the counter
    #[inline]
    pub fn view(&self) -> CounterRef<'_> {
        CounterRef {
            handle: self.handle,
            bytes: &*self.bytes,
        }
    }

    /// Bytes of the counter, checked against the width expected by `func`
    #[inline]
    pub fn checked_bytes_mut(&mut self, func: &'static str, width: usize) -> Result<&mut [u8]> {
        check_width(func, width, self.bytes.len())?;
        Ok(&mut *self.bytes)
    }
}

/// Read only counter of a single group
#[derive(Debug, Clone, Copy)]
pub struct CounterRef<'a> {
    handle: GroupHandle,
    bytes: &'a [u8],
}

impl<'a> CounterRef<'a> {
    /// Create a read only counter of the group identified by `handle`
    #[inline]
    pub fn new(handle: GroupHandle, bytes: &'a [u8]) -> Self {
        Self { handle, bytes }
    }

    /// Handle of the group that owns the counter
    #[inline]
    pub fn handle(&self) -> GroupHandle {
        self.handle
    }

    /// Raw bytes of the counter
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Bytes of the counter, checked against the width expected by `func`
    #[inline]
    pub fn checked_bytes(&self, func: &'static str, width: usize) -> Result<&'a [u8]> {
        check_width(func, width, self.bytes.len())?;
        Ok(self.bytes)
    }
}

#[inline]
fn check_width(func: &'static str, expected: usize, actual: usize) -> Result<()> {
    ensure!(
        expected == actual,
        BufferWidthMismatchSnafu {
            func,
            expected,
            actual
        }
    );
    Ok(())
}
