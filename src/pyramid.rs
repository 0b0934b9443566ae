use anyhow::{ensure, Result};

use crate::image::Image;

#[derive(Debug, Clone)]
pub struct Pyramid {
    pub levels: Vec<Image>,
}

impl Pyramid {
    pub fn empty() -> Self {
        Self {
            levels: vec![],
        }
    }

    /// Build `level_count` successively halved images from `frame`.
    /// The frame itself is not stored.
    pub fn compute(&mut self, frame: &Image, level_count: usize) -> Result<()> {
        ensure!(
            frame.width > 0 && frame.height > 0,
            "cannot build a pyramid from an empty image"
        );
        self.compute_levels(frame, level_count);
        Ok(())
    }

    fn compute_levels(&mut self, frame: &Image, level_count: usize) {
        self.levels.truncate(level_count);
        while self.levels.len() < level_count {
            self.levels.push(Image::empty())
        }
        if level_count == 0 {
            return;
        }
        downscale(frame, &mut self.levels[0]);
        for i in 0..(level_count - 1) {
            let rest = &mut self.levels[i..];
            // split_first_mut Returns the first and all the rest of the elements of the slice, or None if it is empty
            if let Some((parent, rest)) = rest.split_first_mut() {
                downscale(parent, &mut rest[0]);
            }
        }
    }
}

/// downscale the parent image and store the result in child.
/// Odd sizes round up so that the last row/column is kept.
fn downscale(parent: &Image, child: &mut Image) {
    let w_half = (parent.width + 1) / 2;
    let h_half = (parent.height + 1) / 2;
    child.data.clear();
    child.width = w_half;
    child.height = h_half;

    // prevent pixel out of bounds
    let v = |x: i32, y: i32| -> u32 { parent.value_clamped(x, y) as u32 };

    for y in 0..h_half as i32 {
        let y2 = 2 * y;
        for x in 0..w_half as i32 {
            let x2 = 2 * x;
            // 3x3 binomial kernel [1 2 1] x [1 2 1] / 16
            let sum = 4 * v(x2, y2)
                + 2 * (v(x2 + 1, y2) + v(x2 - 1, y2) + v(x2, y2 + 1) + v(x2, y2 - 1))
                + (v(x2 + 1, y2 + 1) + v(x2 - 1, y2 - 1) + v(x2 - 1, y2 + 1) + v(x2 + 1, y2 - 1));
            child.data.push(((sum + 8) / 16) as u8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_sizes() {
        let image = Image::filled(101, 64, 10);
        let mut pyramid = Pyramid::empty();
        pyramid.compute(&image, 3).unwrap();
        let sizes: Vec<_> = pyramid.levels.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(sizes, vec![(51, 32), (26, 16), (13, 8)]);

        // recomputing with fewer levels drops the stale ones
        pyramid.compute(&image, 1).unwrap();
        assert_eq!(pyramid.levels.len(), 1);
    }

    #[test]
    fn test_uniform_stays_uniform() {
        let image = Image::filled(16, 16, 77);
        let mut pyramid = Pyramid::empty();
        pyramid.compute(&image, 2).unwrap();
        for level in &pyramid.levels {
            assert!(level.data.iter().all(|&v| v == 77));
        }
    }

    #[test]
    fn test_empty_image_rejected() {
        let mut pyramid = Pyramid::empty();
        assert!(pyramid.compute(&Image::empty(), 2).is_err());
    }
}
