//! Signed 64-bit grid positions and patch/cell decomposition.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A cell position within the infinite 2-D grid, or a patch coordinate
/// (a position in units of whole patches).
///
/// Positions are signed 64-bit pairs. The world has no bounds; patches
/// are materialized on demand around whatever positions are touched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    /// Horizontal component. Positive x points right.
    pub x: i64,
    /// Vertical component. Positive y points up.
    pub y: i64,
}

/// A cell coordinate local to one patch: both components in `0..patch_size`.
pub type CellCoord = (u32, u32);

impl Position {
    /// The origin, `(0, 0)`.
    pub const ORIGIN: Position = Position { x: 0, y: 0 };

    /// Construct a position from its components.
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean length as `i128`.
    ///
    /// `i128` because `i64::MAX²` does not fit in 64 bits. Callers that
    /// need a float distance should convert the result themselves.
    pub fn squared_length(self) -> i128 {
        let x = self.x as i128;
        let y = self.y as i128;
        x * x + y * y
    }

    /// The patch coordinate containing this cell position.
    ///
    /// Uses floor division so negative positions map to negative patch
    /// coordinates: with `patch_size = 4`, cell `(-1, -1)` lies in patch
    /// `(-1, -1)`.
    pub fn patch_of(self, patch_size: u32) -> Position {
        let n = patch_size as i64;
        Position {
            x: self.x.div_euclid(n),
            y: self.y.div_euclid(n),
        }
    }

    /// The cell coordinate of this position within its patch.
    ///
    /// Both components are in `0..patch_size`.
    pub fn cell_of(self, patch_size: u32) -> CellCoord {
        let n = patch_size as i64;
        (self.x.rem_euclid(n) as u32, self.y.rem_euclid(n) as u32)
    }

    /// Split this position into `(patch_coord, cell_coord)`.
    pub fn decompose(self, patch_size: u32) -> (Position, CellCoord) {
        (self.patch_of(patch_size), self.cell_of(patch_size))
    }

    /// Reassemble a world position from a patch coordinate and a cell
    /// coordinate within that patch.
    pub fn compose(patch: Position, cell: CellCoord, patch_size: u32) -> Position {
        let n = patch_size as i64;
        Position {
            x: patch.x * n + cell.0 as i64,
            y: patch.y * n + cell.1 as i64,
        }
    }
}

impl Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position {
            x: self.x.wrapping_add(rhs.x),
            y: self.y.wrapping_add(rhs.y),
        }
    }
}

impl AddAssign for Position {
    fn add_assign(&mut self, rhs: Position) {
        *self = *self + rhs;
    }
}

impl Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Position) -> Position {
        Position {
            x: self.x.wrapping_sub(rhs.x),
            y: self.y.wrapping_sub(rhs.y),
        }
    }
}

impl SubAssign for Position {
    fn sub_assign(&mut self, rhs: Position) {
        *self = *self - rhs;
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}
