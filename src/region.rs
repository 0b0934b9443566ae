use serde::{Deserialize, Serialize};

use crate::my_types::*;

/// Axis-aligned rectangle in frame coordinates. The top-left corner may lie
/// outside the frame once the tracked object drifts off screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Region {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn center(&self) -> Vector2d {
        Vector2d::new(
            self.x as f64 + self.width as f64 / 2.,
            self.y as f64 + self.height as f64 / 2.,
        )
    }

    /// Same size, placed so that its center is at `center`.
    /// The top-left is truncated toward zero.
    pub fn centered_at(&self, center: Vector2d) -> Region {
        Region {
            x: (center[0] - self.width as f64 / 2.) as i32,
            y: (center[1] - self.height as f64 / 2.) as i32,
            ..*self
        }
    }

    /// Shrink by `padding` (fraction of the size) on each side
    pub fn padded(&self, padding: f64) -> Region {
        let (w, h) = (self.width as f64, self.height as f64);
        Region {
            x: (self.x as f64 + w * padding) as i32,
            y: (self.y as f64 + h * padding) as i32,
            width: (w * (1. - 2. * padding)) as i32,
            height: (h * (1. - 2. * padding)) as i32,
        }
    }

    /// Force the region inside a `width` x `height` frame while keeping at
    /// least one pixel
    pub fn clamped(&self, width: usize, height: usize) -> Region {
        let (fw, fh) = (width as i32, height as i32);
        let x = self.x.min(fw - 1).max(0);
        let y = self.y.min(fh - 1).max(0);
        Region {
            x,
            y,
            width: self.width.min(fw - x).max(1),
            height: self.height.min(fh - y).max(1),
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

impl From<(i32, i32, i32, i32)> for Region {
    fn from((x, y, width, height): (i32, i32, i32, i32)) -> Self {
        Region::new(x, y, width, height)
    }
}
