use anyhow::{ensure, Result};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::app::{EventSource, InputEvent};
use crate::image::Image;
use crate::my_types::*;
use crate::region::Region;

/// Isotropic Gaussian intensity bump
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Blob {
    pub center: Vector2d,
    pub sigma: f64,
    pub amplitude: f64,
}

/// Squares of `square` pixels, white where the square indices sum to an even number
pub fn checkerboard(width: usize, height: usize, square: usize) -> Image {
    let mut image = Image::filled(width, height, 0);
    for y in 0..height {
        for x in 0..width {
            if (x / square + y / square) % 2 == 0 {
                image.set_value(x, y, 255);
            }
        }
    }
    image
}

/// Blobs with centers inside `area`, sigma in [2, 4) and amplitude of
/// either sign with magnitude in [60, 120)
pub fn random_blobs(rng: &mut impl Rng, count: usize, area: &Region) -> Vec<Blob> {
    (0..count)
        .map(|_| {
            let sign = if rng.gen::<bool>() { 1. } else { -1. };
            Blob {
                center: Vector2d::new(
                    area.x as f64 + rng.gen::<f64>() * area.width as f64,
                    area.y as f64 + rng.gen::<f64>() * area.height as f64,
                ),
                sigma: rng.gen_range(2.0..4.0),
                amplitude: sign * rng.gen_range(60.0..120.0),
            }
        })
        .collect()
}

/// Render `blobs` moved by `offset` over a flat background
pub fn render_blobs(
    width: usize,
    height: usize,
    background: u8,
    blobs: &[Blob],
    offset: Vector2d,
) -> Image {
    let mut acc = vec![background as f64; width * height];
    for blob in blobs {
        let c = blob.center + offset;
        let reach = 4. * blob.sigma;
        let x0 = (c[0] - reach).floor().max(0.) as usize;
        let y0 = (c[1] - reach).floor().max(0.) as usize;
        let x1 = ((c[0] + reach).ceil().max(0.) as usize).min(width);
        let y1 = ((c[1] + reach).ceil().max(0.) as usize).min(height);
        let denom = 2. * blob.sigma * blob.sigma;
        for y in y0..y1 {
            for x in x0..x1 {
                let d2 = (x as f64 - c[0]).powi(2) + (y as f64 - c[1]).powi(2);
                acc[y * width + x] += blob.amplitude * (-d2 / denom).exp();
            }
        }
    }
    Image {
        data: acc.iter().map(|v| v.round().clamp(0., 255.) as u8).collect(),
        width,
        height,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, clap::Args)]
pub struct SyntheticParams {
    /// Frames in the generated sequence
    #[clap(long, default_value = "120")]
    pub frames: usize,

    #[clap(long, default_value = "640")]
    pub width: usize,

    #[clap(long, default_value = "480")]
    pub height: usize,

    /// Initial object rectangle, also used as the selection
    #[clap(long, default_value = "200")]
    pub object_x: i32,
    #[clap(long, default_value = "150")]
    pub object_y: i32,
    #[clap(long, default_value = "120")]
    pub object_width: i32,
    #[clap(long, default_value = "90")]
    pub object_height: i32,

    /// Object motion in pixels per frame
    #[clap(long, default_value = "2", allow_hyphen_values = true)]
    pub velocity_x: f64,
    #[clap(long, default_value = "1", allow_hyphen_values = true)]
    pub velocity_y: f64,

    #[clap(long, default_value = "40")]
    pub blob_count: usize,

    #[clap(long, default_value = "0")]
    pub seed: u64,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            frames: 120,
            width: 640,
            height: 480,
            object_x: 200,
            object_y: 150,
            object_width: 120,
            object_height: 90,
            velocity_x: 2.,
            velocity_y: 1.,
            blob_count: 40,
            seed: 0,
        }
    }
}

/// A textured object translating over a flat background. Emits the first
/// frame, then a selection of the object, then the remaining frames.
pub struct SyntheticSequence {
    params: SyntheticParams,
    blobs: Vec<Blob>,
    step: usize,
}

const BACKGROUND: u8 = 60;

impl SyntheticSequence {
    pub fn new(params: &SyntheticParams) -> Result<Self> {
        ensure!(
            params.width > 0 && params.height > 0,
            "synthetic frames need a positive size"
        );
        ensure!(
            params.object_width > 0 && params.object_height > 0,
            "synthetic object needs a positive size"
        );
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(params.seed);
        // keep the blobs off the object border so the texture stays inside it
        let inner = Region::new(
            params.object_x + 6,
            params.object_y + 6,
            (params.object_width - 12).max(1),
            (params.object_height - 12).max(1),
        );
        let blobs = random_blobs(&mut rng, params.blob_count, &inner);
        Ok(Self {
            params: params.clone(),
            blobs,
            step: 0,
        })
    }

    pub fn initial_region(&self) -> Region {
        Region::new(
            self.params.object_x,
            self.params.object_y,
            self.params.object_width,
            self.params.object_height,
        )
    }

    /// Object displacement at frame `index`
    pub fn offset(&self, index: usize) -> Vector2d {
        Vector2d::new(self.params.velocity_x, self.params.velocity_y) * index as f64
    }

    pub fn render(&self, index: usize) -> Image {
        render_blobs(
            self.params.width,
            self.params.height,
            BACKGROUND,
            &self.blobs,
            self.offset(index),
        )
    }
}

impl EventSource for SyntheticSequence {
    fn frame_count(&self) -> u64 {
        self.params.frames as u64
    }

    fn next_event(&mut self) -> Result<Option<InputEvent>> {
        let step = self.step;
        self.step += 1;
        let event = match step {
            _ if self.params.frames == 0 => None,
            0 => Some(InputEvent::Frame(self.render(0))),
            1 => Some(InputEvent::Select(self.initial_region())),
            s if s - 1 < self.params.frames => Some(InputEvent::Frame(self.render(s - 1))),
            _ => None,
        };
        Ok(event)
    }
}
