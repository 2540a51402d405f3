// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Core geometry types shared by commands and devices

use serde::{Deserialize, Serialize};

/// Integer device coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: i32,
    pub y: i32,
}

impl Vector2 {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Target area for a tap or swipe. Missing width/height means an exact point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect2 {
    pub x: i32,
    pub y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl Rect2 {
    pub const fn point(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            width: None,
            height: None,
        }
    }

    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width: Some(width),
            height: Some(height),
        }
    }
}

impl From<Vector2> for Rect2 {
    fn from(v: Vector2) -> Self {
        Rect2::point(v.x, v.y)
    }
}

/// Device resolution divided by the logical resolution commands were authored against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionRatio {
    pub x: f64,
    pub y: f64,
}

impl ResolutionRatio {
    pub const IDENTITY: ResolutionRatio = ResolutionRatio { x: 1.0, y: 1.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Ratio between a physical and a logical resolution.
    ///
    /// An axis whose physical or logical size is still unknown (zero) scales by 1.
    pub fn between(physical: Vector2, logical: Vector2) -> Self {
        fn axis(physical: i32, logical: i32) -> f64 {
            if physical <= 0 || logical <= 0 {
                1.0
            } else {
                physical as f64 / logical as f64
            }
        }

        Self {
            x: axis(physical.x, logical.x),
            y: axis(physical.y, logical.y),
        }
    }

    /// Scale a logical point, truncating to whole device pixels.
    pub fn scale(&self, point: Vector2) -> Vector2 {
        Vector2 {
            x: (point.x as f64 * self.x) as i32,
            y: (point.y as f64 * self.y) as i32,
        }
    }
}

impl Default for ResolutionRatio {
    fn default() -> Self {
        Self::IDENTITY
    }
}
