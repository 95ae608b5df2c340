//! Colour filter array definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Colour channel of a sensel.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Red channel.
    Red = 0,
    /// Green channel.
    Green = 1,
    /// Blue channel.
    Blue = 2,
}

impl Channel {
    /// Index of the channel inside an `[R, G, B, norm]` pixel.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The other non-green channel (red for blue and blue for red).
    ///
    /// Green maps onto itself.
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Channel::Red => Channel::Blue,
            Channel::Blue => Channel::Red,
            Channel::Green => Channel::Green,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Red => f.write_str("R"),
            Self::Green => f.write_str("G"),
            Self::Blue => f.write_str("B"),
        }
    }
}

/// Lookup of the filter colour at a sensel position.
///
/// Coordinates are absolute image coordinates. Implementations must be cheap,
/// they are called from the innermost loops.
pub trait CfaLookup: Sync {
    /// The colour of the filter over sensel (`row`, `col`).
    fn channel_at(&self, row: usize, col: usize) -> Channel;

    /// Whether sensel (`row`, `col`) sits under a green filter.
    #[inline]
    fn is_green(&self, row: usize, col: usize) -> bool {
        self.channel_at(row, col) == Channel::Green
    }
}

/// The 2x2 colour filter array (CFA) pattern.
///
/// The sequence of R, G, B describe the colours of the top-left,
/// top-right, bottom-left, and bottom-right pixels in the 2x2 block,
/// in that order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ColorFilterArray {
    /// Blue-Green-Green-Red.
    Bggr,
    /// Green-Blue-Red-Green.
    Gbrg,
    /// Green-Red-Blue-Green.
    Grbg,
    /// Red-Green-Green-Blue.
    Rggb,
}

impl ColorFilterArray {
    /// The 2x2 pixel block obtained when moving right 1 column.
    pub fn next_x(self) -> Self {
        match self {
            ColorFilterArray::Bggr => ColorFilterArray::Gbrg,
            ColorFilterArray::Gbrg => ColorFilterArray::Bggr,
            ColorFilterArray::Grbg => ColorFilterArray::Rggb,
            ColorFilterArray::Rggb => ColorFilterArray::Grbg,
        }
    }

    /// The 2x2 pixel block obtained when moving down 1 row.
    pub fn next_y(self) -> Self {
        match self {
            ColorFilterArray::Bggr => ColorFilterArray::Grbg,
            ColorFilterArray::Gbrg => ColorFilterArray::Rggb,
            ColorFilterArray::Grbg => ColorFilterArray::Bggr,
            ColorFilterArray::Rggb => ColorFilterArray::Gbrg,
        }
    }

    /// Pattern seen by a crop starting at (`dy`, `dx`).
    pub fn shift(self, dy: usize, dx: usize) -> Self {
        let shifted = if dy % 2 == 1 { self.next_y() } else { self };
        if dx % 2 == 1 {
            shifted.next_x()
        } else {
            shifted
        }
    }

    fn block(self) -> [Channel; 4] {
        use Channel::*;
        match self {
            ColorFilterArray::Bggr => [Blue, Green, Green, Red],
            ColorFilterArray::Gbrg => [Green, Blue, Red, Green],
            ColorFilterArray::Grbg => [Green, Red, Blue, Green],
            ColorFilterArray::Rggb => [Red, Green, Green, Blue],
        }
    }
}

impl CfaLookup for ColorFilterArray {
    #[inline]
    fn channel_at(&self, row: usize, col: usize) -> Channel {
        self.block()[((row & 1) << 1) | (col & 1)]
    }
}

impl<F> CfaLookup for F
where
    F: Fn(usize, usize) -> Channel + Sync,
{
    #[inline]
    fn channel_at(&self, row: usize, col: usize) -> Channel {
        self(row, col)
    }
}

impl fmt::Display for ColorFilterArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.block() {
            write!(f, "{c}")?;
        }
        Ok(())
    }
}
