use anyhow::{ensure, Result};
use log::debug;
use nalgebra as na;

use crate::config::FlowParams;
use crate::frame::PyramidFrame;
use crate::image::*;
use crate::my_types::*;

type Range = [[i16; 2]; 2];

/// Pyramidal Lucas-Kanade tracker for a sparse set of points
pub struct OpticalFlow {
    lk_iters: usize,
    lk_levels: usize,
    lk_win_size: usize,
    lk_term: f64,
    lk_min_eig: f64,
    ix: Matrixd,
    iy: Matrixd,
    it: Matrixd,
    grid: Matrixd,
}

impl OpticalFlow {
    pub fn new(params: &FlowParams) -> OpticalFlow {
        // the window is centered on the point, so force an odd side
        let lk_win_size = params.window_size.max(1) | 1;

        OpticalFlow {
            lk_iters: params.max_iterations,
            lk_levels: params.max_level,
            lk_win_size,
            lk_term: params.epsilon,
            lk_min_eig: params.min_eigen_threshold,
            ix: na::DMatrix::zeros(lk_win_size, lk_win_size),
            iy: na::DMatrix::zeros(lk_win_size, lk_win_size),
            it: na::DMatrix::zeros(lk_win_size, lk_win_size),
            grid: na::DMatrix::zeros(lk_win_size + 2, lk_win_size + 2),
        }
    }

    /// Pyramid levels the frames handed to `process` should carry
    pub fn levels(&self) -> usize {
        self.lk_levels
    }

    /// Track `points0` from `pyramid_frame0` into `pyramid_frame1`. Returns
    /// one position and one status per input point; a lost point keeps its
    /// input position.
    pub fn process(
        &mut self,
        pyramid_frame0: &PyramidFrame,
        pyramid_frame1: &PyramidFrame,
        points0: &[Vector2d],
    ) -> Result<(Vec<Vector2d>, Vec<bool>)> {
        ensure!(
            pyramid_frame0.image.same_shape(&pyramid_frame1.image),
            "previous image is {} x {} but current image is {} x {}",
            pyramid_frame0.image.width,
            pyramid_frame0.image.height,
            pyramid_frame1.image.width,
            pyramid_frame1.image.height
        );
        ensure!(
            pyramid_frame0.level_count() == pyramid_frame1.level_count(),
            "pyramids have {} and {} levels",
            pyramid_frame0.level_count(),
            pyramid_frame1.level_count()
        );

        let mut points1 = Vec::with_capacity(points0.len());
        let mut status = Vec::with_capacity(points0.len());
        for point0 in points0 {
            match self.process_point(pyramid_frame0, pyramid_frame1, *point0) {
                Some(point1) => {
                    points1.push(point1);
                    status.push(true);
                }
                None => {
                    points1.push(*point0);
                    status.push(false);
                }
            }
        }
        debug!(
            "optical flow kept {} of {} points",
            status.iter().filter(|&&s| s).count(),
            points0.len()
        );
        Ok((points1, status))
    }

    /// Coarsest level used for `frame`. Levels too small to hold a padded
    /// window are skipped.
    fn top_level(&self, frame: &PyramidFrame) -> usize {
        let min_side = self.lk_win_size + 2;
        (0..usize::min(self.lk_levels, frame.level_count() - 1) + 1)
            .take_while(|&level| {
                let image = frame.get_image_at_level(level);
                level == 0 || (image.width >= min_side && image.height >= min_side)
            })
            .last()
            .unwrap_or(0)
    }

    /// ref http://robots.stanford.edu/cs223b04/algo_tracking.pdf
    ///
    /// The point is lost when its window leaves the image at any level, when
    /// the full resolution window is too flat, or when the full resolution
    /// refinement does not converge. A flat window on a coarser level only
    /// skips the refinement there.
    fn process_point(
        &mut self,
        pyramid_frame0: &PyramidFrame,
        pyramid_frame1: &PyramidFrame,
        point0: Vector2d,
    ) -> Option<Vector2d> {
        let lk_term2 = self.lk_term.powi(2);
        let r = (self.lk_win_size - 1) / 2;
        let top_level = self.top_level(pyramid_frame0);

        // guess carried from the coarser level
        let mut g = Vector2d::zeros();
        for level in (0..top_level + 1).rev() {
            let level0 = pyramid_frame0.get_image_at_level(level);
            let level1 = pyramid_frame1.get_image_at_level(level);
            let u = point0 / 2f64.powi(level as i32);
            let range = full_window(level0, u, r, 1)?;
            // compute the derivative
            scharr(
                level0,
                u,
                range,
                &mut self.ix,
                &mut self.iy,
                &mut self.grid,
            );
            let gradient = spatial_gradient(&self.ix, &self.iy);
            let area = (self.ix.nrows() * self.ix.ncols()) as f64;
            if gradient.symmetric_eigenvalues().min() / area < self.lk_min_eig {
                if level == 0 {
                    return None;
                }
                g *= 2.;
                continue;
            }

            let mut converged = false;
            let mut nu = Vector2d::zeros();
            for _ in 0..self.lk_iters {
                image_difference(range, &self.grid, &mut self.it, level1, u + g + nu)?;
                let eta = flow_vector(&gradient, &self.ix, &self.iy, &self.it)?;
                nu += eta;
                if eta.norm_squared() < lk_term2 {
                    converged = true;
                    break;
                }
            }

            if level == 0 {
                return if converged { Some(point0 + g + nu) } else { None };
            }
            g = 2. * (g + nu);
        }
        None
    }
}

/// Track `points` between two plain images, building the pyramids on the fly
pub fn propagate(
    prev_image: &Image,
    curr_image: &Image,
    points: &[Vector2d],
    params: &FlowParams,
) -> Result<(Vec<Vector2d>, Vec<bool>)> {
    ensure!(
        prev_image.same_shape(curr_image),
        "previous image is {} x {} but current image is {} x {}",
        prev_image.width,
        prev_image.height,
        curr_image.width,
        curr_image.height
    );
    let mut flow = OpticalFlow::new(params);
    let frame0 = PyramidFrame::new(prev_image, flow.levels(), None)?;
    let frame1 = PyramidFrame::new(curr_image, flow.levels(), None)?;
    flow.process(&frame0, &frame1, points)
}

fn flow_vector(gradient: &Matrix2d, ix: &Matrixd, iy: &Matrixd, it: &Matrixd) -> Option<Vector2d> {
    let mut b = Vector2d::zeros();

    for y in 0..iy.nrows() {
        for x in 0..ix.ncols() {
            b[0] += it[(y, x)] * ix[(y, x)];
            b[1] += it[(y, x)] * iy[(y, x)];
        }
    }

    gradient.try_inverse().map(|inv_g| inv_g * b)
}

/// it = I0 - I1(center + range). `i0` is the padded grid sampled by `scharr`.
/// Returns None when the shifted window leaves `level`.
fn image_difference(
    range: Range,
    i0: &Matrixd,
    it: &mut Matrixd,
    level: &Image,
    center: Vector2d,
) -> Option<()> {
    if !window_inside(level, center, range) {
        return None;
    }
    fill_grid(level, range, center, it);
    *it *= -1.;
    *it += i0.view((1, 1), (it.nrows(), it.ncols()));
    Some(())
}

fn spatial_gradient(ix: &Matrixd, iy: &Matrixd) -> Matrix2d {
    assert_eq!(ix.nrows(), iy.nrows());
    assert_eq!(ix.ncols(), iy.ncols());

    let mut x2 = 0.;
    let mut y2 = 0.;
    let mut xy = 0.;

    for y in 0..iy.nrows() {
        for x in 0..ix.ncols() {
            x2 += ix[(y, x)] * ix[(y, x)];
            y2 += iy[(y, x)] * iy[(y, x)];
            xy += ix[(y, x)] * iy[(y, x)];
        }
    }

    Matrix2d::new(x2, xy, xy, y2)
}

/// ref https://theailearner.com/tag/scharr-operator/
fn scharr(
    level: &Image,
    center: Vector2d,
    range: Range,
    out_x: &mut Matrixd,
    out_y: &mut Matrixd,
    grid: &mut Matrixd,
) {
    let grange = [
        [range[0][0] - 1, range[0][1] + 1],
        [range[1][0] - 1, range[1][1] + 1],
    ];
    fill_grid(level, grange, center, grid);

    *out_x = Matrixd::zeros(grid.nrows() - 2, grid.ncols() - 2);
    *out_y = Matrixd::zeros(grid.nrows() - 2, grid.ncols() - 2);
    for y in 1..(grid.nrows() - 1) {
        for x in 1..(grid.ncols() - 1) {
            out_x[(y - 1, x - 1)] =
                (10. * grid[(y, x + 1)] + 3. * grid[(y + 1, x + 1)] + 3. * grid[(y - 1, x + 1)]
                    - 10. * grid[(y, x - 1)]
                    - 3. * grid[(y + 1, x - 1)]
                    - 3. * grid[(y - 1, x - 1)])
                    / 32.;
            out_y[(y - 1, x - 1)] =
                (10. * grid[(y + 1, x)] + 3. * grid[(y + 1, x + 1)] + 3. * grid[(y + 1, x - 1)]
                    - 10. * grid[(y - 1, x)]
                    - 3. * grid[(y - 1, x + 1)]
                    - 3. * grid[(y - 1, x - 1)])
                    / 32.;
        }
    }
}

fn fill_grid(level: &Image, range: Range, center: Vector2d, grid: &mut Matrixd) {
    *grid = na::DMatrix::zeros(
        (range[1][1] - range[1][0] + 1) as usize,
        (range[0][1] - range[0][0] + 1) as usize,
    );

    for (y_ind, y) in (range[1][0]..=range[1][1]).enumerate() {
        for (x_ind, x) in (range[0][0]..=range[0][1]).enumerate() {
            grid[(y_ind, x_ind)] = bilinear(level, center + Vector2d::new(x as f64, y as f64));
        }
    }
}

/// The full `[-r, r]` window around `center`, provided it fits on `level`
/// together with `padding` extra pixels on every side
fn full_window(level: &Image, center: Vector2d, r: usize, padding: i16) -> Option<Range> {
    let r = r as i16;
    let padded = [[-r - padding, r + padding], [-r - padding, r + padding]];
    if window_inside(level, center, padded) {
        Some([[-r, r], [-r, r]])
    } else {
        None
    }
}

/// Whether every sample of the window `center + range` lies on `level`
fn window_inside(level: &Image, center: Vector2d, range: Range) -> bool {
    for i in 0..2 {
        let s = if i == 0 { level.width } else { level.height };
        let lo = center[i] + range[i][0] as f64;
        let hi = center[i] + range[i][1] as f64;
        if !(lo >= 0. && hi <= (s - 1) as f64) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{checkerboard, random_blobs, render_blobs, Blob};
    use crate::region::Region;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn make_pyramid_frame(image: &Image, lk_levels: usize) -> PyramidFrame {
        PyramidFrame::new(image, lk_levels, None).unwrap()
    }

    #[test]
    fn test_flow() {
        let blob = [Blob {
            center: Vector2d::new(64., 64.),
            sigma: 5.,
            amplitude: 180.,
        }];
        let (dx, dy) = (-6., 3.);
        let image0 = render_blobs(128, 128, 20, &blob, Vector2d::zeros());
        let image1 = render_blobs(128, 128, 20, &blob, Vector2d::new(dx, dy));

        let params = FlowParams {
            max_iterations: 30,
            ..Default::default()
        };
        let mut flow = OpticalFlow::new(&params);
        let frame0 = make_pyramid_frame(&image0, flow.levels());
        let frame1 = make_pyramid_frame(&image1, flow.levels());

        // a point on the blob flank, where the gradient is strong
        let point0 = Vector2d::new(60., 61.);
        let point1 = flow
            .process_point(&frame0, &frame1, point0)
            .expect("blob point lost");
        let err = (point1 - point0) - Vector2d::new(dx, dy);
        assert!(err.norm() < 0.5, "optical flow err {}", err.norm());
    }

    #[test]
    fn test_identical_frames_do_not_move() {
        let image = checkerboard(160, 120, 20);
        let points = vec![Vector2d::new(37., 37.), Vector2d::new(62., 42.)];
        let (moved, status) = propagate(&image, &image, &points, &FlowParams::default()).unwrap();
        assert_eq!(status, vec![true, true]);
        assert_eq!(moved, points);
    }

    #[test]
    fn test_translated_texture() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let blobs = random_blobs(&mut rng, 135, &Region::new(0, 0, 240, 180));
        let shift = Vector2d::new(3., -2.);
        let image0 = render_blobs(240, 180, 60, &blobs, Vector2d::zeros());
        let image1 = render_blobs(240, 180, 60, &blobs, shift);

        // far enough from the border for the window to fit on every level
        let points: Vec<_> = (0..5)
            .flat_map(|j| (0..6).map(move |i| Vector2d::new(60. + 24. * i as f64, 50. + 20. * j as f64)))
            .collect();
        let (moved, status) = propagate(&image0, &image1, &points, &FlowParams::default()).unwrap();
        assert_eq!(moved.len(), points.len());

        let tracked = status.iter().filter(|&&s| s).count();
        assert!(tracked * 2 >= points.len(), "only {tracked} points tracked");
        let mut accurate = 0;
        for ((p0, p1), ok) in points.iter().zip(&moved).zip(&status) {
            if !*ok {
                assert_eq!(p0, p1);
            } else if ((p1 - p0) - shift).norm() < 0.5 {
                accurate += 1;
            }
        }
        assert!(accurate * 5 >= tracked * 4, "{accurate} of {tracked} accurate");
    }

    #[test]
    fn test_uniform_window_is_lost() {
        let image = Image::filled(64, 64, 90);
        let points = vec![Vector2d::new(32., 32.)];
        let (_, status) = propagate(&image, &image, &points, &FlowParams::default()).unwrap();
        assert_eq!(status, vec![false]);
    }

    #[test]
    fn test_vanished_texture_is_lost() {
        let image0 = checkerboard(160, 120, 20);
        let image1 = Image::filled(160, 120, 0);
        let points = vec![Vector2d::new(37., 37.), Vector2d::new(62., 62.)];
        let (_, status) = propagate(&image0, &image1, &points, &FlowParams::default()).unwrap();
        assert_eq!(status, vec![false, false]);
    }

    #[test]
    fn test_point_outside_image_is_lost() {
        let image = checkerboard(64, 64, 8);
        let points = vec![Vector2d::new(-5., 10.), Vector2d::new(10., 80.)];
        let (_, status) = propagate(&image, &image, &points, &FlowParams::default()).unwrap();
        assert_eq!(status, vec![false, false]);
    }

    #[test]
    fn test_partly_outside_window_is_lost() {
        let image = checkerboard(160, 120, 8);
        // (3, 40) pokes out at full resolution, (8, 8) only at the coarser levels
        let points = vec![
            Vector2d::new(8., 8.),
            Vector2d::new(3., 40.),
            Vector2d::new(80., 60.),
        ];
        let (moved, status) = propagate(&image, &image, &points, &FlowParams::default()).unwrap();
        assert_eq!(status, vec![false, false, true]);
        assert_eq!(moved, points);
    }

    #[test]
    fn test_deep_pyramid_stops_at_window_size() {
        let image = checkerboard(160, 120, 8);
        let params = FlowParams {
            max_level: 40,
            ..Default::default()
        };
        let mut flow = OpticalFlow::new(&params);
        let frame = make_pyramid_frame(&image, flow.levels());
        // 40 x 30 is the last level that holds a padded 15 x 15 window
        assert_eq!(flow.top_level(&frame), 2);

        let points = vec![Vector2d::new(80., 60.)];
        let (moved, status) = flow.process(&frame, &frame, &points).unwrap();
        assert_eq!(status, vec![true]);
        assert_eq!(moved, points);
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let image0 = Image::filled(64, 64, 0);
        let image1 = Image::filled(64, 32, 0);
        assert!(propagate(&image0, &image1, &[], &FlowParams::default()).is_err());
    }

    #[test]
    fn test_scharr() {
        let mut image = Image {
            data: vec![
                0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            ],
            width: 5,
            height: 5,
        };

        let mut out_x = na::dmatrix!();
        let mut out_y = na::dmatrix!();
        let mut grid = na::dmatrix!();

        let center = Vector2d::new(2.0, 2.0);
        let range = full_window(&image, center, 1, 1).unwrap();
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        assert_eq!(out_x, na::DMatrix::zeros(3, 3));
        assert_eq!(out_y, na::DMatrix::zeros(3, 3));

        image.data = vec![
            0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4,
        ];
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        assert_eq!(out_x, na::DMatrix::repeat(3, 3, 1.));
        assert_eq!(out_y, na::DMatrix::zeros(3, 3));

        image.data = vec![
            0, 0, 5, 0, 0,
            0, 0, 5, 0, 0,
            0, 0, 5, 0, 0,
            0, 0, 5, 0, 0,
            0, 0, 5, 0, 0,
        ];
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        let answer_x = na::dmatrix!(
            2.5, 0., -2.5;
            2.5, 0., -2.5;
            2.5, 0., -2.5;
        );
        assert_eq!(out_x, answer_x);
        assert_eq!(out_y, na::DMatrix::zeros(3, 3));
    }

    #[test]
    fn test_full_window() {
        // Coordinate (0, 0) means center of top-left pixel. Thus (9, 9) is the
        // center of the bottom-right pixel for 10x10 image.
        let image = Image::filled(10, 10, 0);
        assert_eq!(full_window(&image, Vector2d::new(4.5, 4.5), 3, 0), Some([[-3, 3], [-3, 3]]));
        assert_eq!(full_window(&image, Vector2d::new(4., 5.), 3, 1), Some([[-3, 3], [-3, 3]]));
        assert_eq!(full_window(&image, Vector2d::new(3., 5.), 3, 1), None);
        assert_eq!(full_window(&image, Vector2d::new(6.5, 4.5), 3, 0), None);
        assert_eq!(full_window(&image, Vector2d::new(9.5, 2.0), 3, 0), None);
    }

    #[test]
    fn test_window_inside() {
        let image = Image::filled(10, 10, 0);
        assert!(window_inside(&image, Vector2d::new(4.5, 4.5), [[-3, 3], [-3, 3]]));
        assert!(window_inside(&image, Vector2d::new(3., 6.), [[-3, 3], [-3, 3]]));
        assert!(!window_inside(&image, Vector2d::new(6.5, 4.5), [[-3, 3], [-3, 3]]));
        assert!(!window_inside(&image, Vector2d::new(4.5, 2.9), [[-3, 3], [-3, 3]]));
    }
}
