use anyhow::{ensure, Result};
use log::debug;
use ndarray::Array2;

use crate::config::FeatureParams;
use crate::image::Image;
use crate::mask::Mask;
use crate::my_types::*;

/// Half-open pixel box [x0, y0, x1, y1)
type Area = [usize; 4];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corner {
    pub point: Vector2d,
    /// smaller eigenvalue of the windowed gradient covariance
    pub score: f64,
}

/// Shi-Tomasi corner selection restricted to a mask.
///
/// ref J. Shi and C. Tomasi, Good Features to Track, CVPR 1994
pub struct Detector {
    params: FeatureParams,
}

impl Detector {
    pub fn new(params: FeatureParams) -> Self {
        Detector { params }
    }

    /// Returns corners ordered by descending score. Equal scores keep raster
    /// order. Candidates closer than `min_distance` to any of `seeds` or to an
    /// already accepted corner are rejected.
    pub fn detect(&self, image: &Image, mask: &Mask, seeds: &[Vector2d]) -> Result<Vec<Corner>> {
        ensure!(
            mask.width == image.width && mask.height == image.height,
            "mask is {} x {} but image is {} x {}",
            mask.width,
            mask.height,
            image.width,
            image.height
        );
        ensure!(self.params.block_size > 0, "block size must be positive");

        let bbox = if let Some(bbox) = mask.bounding_box() {
            bbox
        } else {
            return Ok(vec![]);
        };
        // one extra pixel around the mask for the local maximum test
        let area = [
            bbox[0].saturating_sub(1),
            bbox[1].saturating_sub(1),
            usize::min(bbox[2] + 1, image.width),
            usize::min(bbox[3] + 1, image.height),
        ];
        let scores = min_eigen_scores(image, area, self.params.block_size);
        let score = |x: usize, y: usize| scores[[y - area[1], x - area[0]]];

        let mut max_score = 0f64;
        for y in bbox[1]..bbox[3] {
            for x in bbox[0]..bbox[2] {
                if mask.get(x, y) {
                    max_score = max_score.max(score(x, y));
                }
            }
        }
        if max_score <= 0. {
            return Ok(vec![]);
        }
        let threshold = max_score * self.params.quality_level;

        let is_local_max = |x: usize, y: usize| {
            let s = score(x, y);
            for ny in (y - 1)..=(y + 1) {
                for nx in (x - 1)..=(x + 1) {
                    if score(nx, ny) > s {
                        return false;
                    }
                }
            }
            true
        };

        // raster order, the image border is never a candidate
        let mut candidates = vec![];
        for y in bbox[1].max(1)..bbox[3].min(image.height - 1) {
            for x in bbox[0].max(1)..bbox[2].min(image.width - 1) {
                if !mask.get(x, y) {
                    continue;
                }
                let s = score(x, y);
                if s >= threshold && is_local_max(x, y) {
                    candidates.push(Corner {
                        point: Vector2d::new(x as f64, y as f64),
                        score: s,
                    });
                }
            }
        }
        // stable sort keeps raster order among equal scores
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        let min_distance2 = self.params.min_distance.powi(2);
        let mut corners: Vec<Corner> = vec![];
        for candidate in candidates {
            let crowded = seeds
                .iter()
                .chain(corners.iter().map(|c| &c.point))
                .any(|p| (p - candidate.point).norm_squared() < min_distance2);
            if crowded {
                continue;
            }
            corners.push(candidate);
            if self.params.max_corners > 0 && corners.len() >= self.params.max_corners {
                break;
            }
        }

        debug!(
            "selected {} corners, max score {:.1}, {} seeds",
            corners.len(),
            max_score,
            seeds.len()
        );
        Ok(corners)
    }
}

/// Select corners inside `mask` with no seeds
pub fn select_corners(image: &Image, mask: &Mask, params: &FeatureParams) -> Result<Vec<Vector2d>> {
    let corners = Detector::new(params.clone()).detect(image, mask, &[])?;
    Ok(corners.into_iter().map(|c| c.point).collect())
}

/// Smaller eigenvalue of the gradient covariance summed over a
/// `block_size` window, for every pixel of `area`. Row index is y.
///
/// Gradients are 3x3 Sobel responses with a replicated border and the
/// covariance sums are exact integers, so mirrored image content gives
/// bitwise equal scores.
fn min_eigen_scores(image: &Image, area: Area, block_size: usize) -> Array2<f64> {
    let r_lo = block_size / 2;
    let r_hi = block_size - 1 - r_lo;

    // pixels whose gradients may enter a window centered inside `area`
    let gx0 = area[0].saturating_sub(r_lo);
    let gy0 = area[1].saturating_sub(r_lo);
    let gx1 = usize::min(area[2] + r_hi, image.width);
    let gy1 = usize::min(area[3] + r_hi, image.height);
    let (gw, gh) = (gx1 - gx0, gy1 - gy0);

    // integral images of the gradient products
    let mut sxx = Array2::<i64>::zeros((gh + 1, gw + 1));
    let mut sxy = Array2::<i64>::zeros((gh + 1, gw + 1));
    let mut syy = Array2::<i64>::zeros((gh + 1, gw + 1));
    let v = |x: usize, y: usize, dx: i32, dy: i32| -> i64 {
        image.value_clamped(x as i32 + dx, y as i32 + dy) as i64
    };
    for j in 0..gh {
        let y = gy0 + j;
        for i in 0..gw {
            let x = gx0 + i;
            let ix = v(x, y, 1, -1) + 2 * v(x, y, 1, 0) + v(x, y, 1, 1)
                - v(x, y, -1, -1)
                - 2 * v(x, y, -1, 0)
                - v(x, y, -1, 1);
            let iy = v(x, y, -1, 1) + 2 * v(x, y, 0, 1) + v(x, y, 1, 1)
                - v(x, y, -1, -1)
                - 2 * v(x, y, 0, -1)
                - v(x, y, 1, -1);
            for (table, value) in [(&mut sxx, ix * ix), (&mut sxy, ix * iy), (&mut syy, iy * iy)] {
                table[[j + 1, i + 1]] =
                    value + table[[j, i + 1]] + table[[j + 1, i]] - table[[j, i]];
            }
        }
    }

    let window_sum = |table: &Array2<i64>, x0: usize, y0: usize, x1: usize, y1: usize| -> f64 {
        (table[[y1, x1]] - table[[y0, x1]] - table[[y1, x0]] + table[[y0, x0]]) as f64
    };

    let (aw, ah) = (area[2] - area[0], area[3] - area[1]);
    let mut scores = Array2::<f64>::zeros((ah, aw));
    for j in 0..ah {
        let y = area[1] + j;
        // window rows clipped to the image, relative to the gradient box
        let y0 = y.saturating_sub(r_lo).max(gy0) - gy0;
        let y1 = usize::min(y + r_hi + 1, gy1) - gy0;
        for i in 0..aw {
            let x = area[0] + i;
            let x0 = x.saturating_sub(r_lo).max(gx0) - gx0;
            let x1 = usize::min(x + r_hi + 1, gx1) - gx0;
            let a = window_sum(&sxx, x0, y0, x1, y1);
            let b = window_sum(&sxy, x0, y0, x1, y1);
            let c = window_sum(&syy, x0, y0, x1, y1);
            let eig = ((a + c) - ((a - c).powi(2) + 4. * b * b).sqrt()) / 2.;
            scores[[j, i]] = eig.max(0.);
        }
    }
    scores
}
