//! Axis-aligned rectangle type shared by agent records, region claims,
//! and spatial discovery filters.
//!
//! Overlap uses half-open interval semantics: a rectangle covers
//! `[x, x + width)` × `[y, y + height)`, so two rectangles that merely
//! touch along an edge do not overlap.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle on the shared 2D grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Region {
    /// Create a new region.
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Half-open intersection test: both the x- and y-intervals must overlap.
    ///
    /// This is the single overlap predicate used everywhere (region claims,
    /// `query_region`, and `discover` with a spatial filter), so conflict
    /// detection and discovery always agree.
    pub fn overlaps(&self, other: &Region) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }

    /// A region with zero width or height covers nothing.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
