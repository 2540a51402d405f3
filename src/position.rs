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

//! Position sampling for tap and swipe targets
//!
//! A point is jittered inside the first tenth of the rectangle on each axis.
//! Recorded flows were tuned against this exact spread, so it must not be
//! widened to the full rectangle.

use rand::Rng;

use crate::types::{Rect2, Vector2};

fn jitter_axis<R: Rng + ?Sized>(origin: i32, extent: Option<u32>, rng: &mut R) -> i32 {
    match extent {
        Some(extent) if extent > 0 => {
            let offset = (rng.random::<f64>() * (extent as f64 + 1.0) / 10.0).floor();
            origin.saturating_add(offset as i32)
        }
        _ => origin,
    }
}

/// Largest offset the sampler can add along an axis of the given extent.
pub fn max_jitter(extent: u32) -> i32 {
    if extent == 0 {
        0
    } else {
        ((extent as f64 + 1.0) / 10.0).floor() as i32
    }
}

/// Sample a point from `rect` using the supplied generator.
pub fn sample_position<R: Rng + ?Sized>(rect: &Rect2, rng: &mut R) -> Vector2 {
    Vector2 {
        x: jitter_axis(rect.x, rect.width, rng),
        y: jitter_axis(rect.y, rect.height, rng),
    }
}

/// Sample a point from `rect` using the thread-local generator.
pub fn random_position(rect: &Rect2) -> Vector2 {
    let mut rng = rand::rng();
    sample_position(rect, &mut rng)
}
