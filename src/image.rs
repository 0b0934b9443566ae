use anyhow::{ensure, Result};

use crate::my_types::*;

/// Row-major grayscale image storage
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Image {
    /// Wrap an existing row-major buffer, checking that it matches the shape
    pub fn new(data: Vec<u8>, width: usize, height: usize) -> Result<Image> {
        ensure!(
            data.len() == width * height,
            "image buffer holds {} bytes, expected {width} x {height}",
            data.len()
        );
        Ok(Image {
            data,
            width,
            height,
        })
    }

    /// Create an empty image
    pub fn empty() -> Image {
        Image {
            data: vec![],
            width: 0,
            height: 0,
        }
    }

    /// Create an image where every pixel has the same intensity
    pub fn filled(width: usize, height: usize, value: u8) -> Image {
        Image {
            data: vec![value; width * height],
            width,
            height,
        }
    }

    /// Convert an interleaved 3-channel buffer to intensity.
    /// `bgr` selects the channel order used by most capture devices.
    pub fn from_rgb(data: &[u8], width: usize, height: usize, bgr: bool) -> Result<Image> {
        ensure!(
            data.len() == 3 * width * height,
            "color buffer holds {} bytes, expected 3 x {width} x {height}",
            data.len()
        );
        let gray = data
            .chunks_exact(3)
            .map(|px| {
                let (r, b) = if bgr { (px[2], px[0]) } else { (px[0], px[2]) };
                // ITU-R BT.601 luma
                let y = 0.299 * r as f64 + 0.587 * px[1] as f64 + 0.114 * b as f64;
                y.round().min(255.) as u8
            })
            .collect();
        Ok(Image {
            data: gray,
            width,
            height,
        })
    }

    /// Clear the image storage
    pub fn clear(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
    }

    pub fn same_shape(&self, other: &Image) -> bool {
        self.width == other.width && self.height == other.height
    }

    #[inline(always)]
    pub fn value(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline(always)]
    pub fn value_i32(&self, x: i32, y: i32) -> u8 {
        self.data[y as usize * self.width + x as usize]
    }

    /// Pixel lookup that replicates the border for out of range coordinates
    #[inline(always)]
    pub fn value_clamped(&self, x: i32, y: i32) -> u8 {
        let x = x.clamp(0, self.width as i32 - 1);
        let y = y.clamp(0, self.height as i32 - 1);
        self.value_i32(x, y)
    }

    #[inline(always)]
    pub fn set_value(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }

    /// Paste `sub` with its top-left corner at (x, y), skipping pixels that
    /// fall outside this image
    pub fn set_sub_image_i32(&mut self, x: i32, y: i32, sub: &Image) {
        for sy in 0..sub.height as i32 {
            for sx in 0..sub.width as i32 {
                let (tx, ty) = (x + sx, y + sy);
                if tx < 0 || ty < 0 || tx >= self.width as i32 || ty >= self.height as i32 {
                    continue;
                }
                self.set_value(tx as usize, ty as usize, sub.value_i32(sx, sy));
            }
        }
    }
}

/// Bilinear interpolation. Coordinate (0, 0) is the center of the top-left
/// pixel; samples outside the image replicate the border.
pub fn bilinear(image: &Image, p: Vector2d) -> f64 {
    let x0 = p[0].floor();
    let y0 = p[1].floor();
    let ax = p[0] - x0;
    let ay = p[1] - y0;
    let (x, y) = (x0 as i32, y0 as i32);
    let v = |x: i32, y: i32| image.value_clamped(x, y) as f64;
    (1. - ax) * (1. - ay) * v(x, y)
        + ax * (1. - ay) * v(x + 1, y)
        + (1. - ax) * ay * v(x, y + 1)
        + ax * ay * v(x + 1, y + 1)
}
