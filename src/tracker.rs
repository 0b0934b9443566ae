use anyhow::{ensure, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{RecenterMode, TrackerConfig};
use crate::detector::Detector;
use crate::frame::PyramidFrame;
use crate::image::Image;
use crate::mask::Mask;
use crate::my_types::*;
use crate::optical_flow::OpticalFlow;
use crate::region::Region;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrackState {
    Lost,
    Locked,
}

/// Result of `init` / `update`. `region` and `points` are only present
/// while locked.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackOutput {
    pub state: TrackState,
    pub region: Option<Region>,
    pub points: Option<Vec<Vector2d>>,
}

impl TrackOutput {
    pub fn lost() -> Self {
        TrackOutput {
            state: TrackState::Lost,
            region: None,
            points: None,
        }
    }
}

/// Single region tracker driven frame by frame
pub trait RoiTracker {
    /// Start a new lock on `roi`, discarding any previous one
    fn init(&mut self, frame: &Image, roi: Region) -> Result<TrackOutput>;

    /// Follow the current lock into `frame`
    fn update(&mut self, frame: &Image) -> Result<TrackOutput>;

    /// Drop the lock
    fn reset(&mut self);

    fn state(&self) -> TrackState;
}

/// Everything that only exists while locked
#[derive(Debug)]
struct Lock {
    region: Region,
    /// unrounded region center
    center: Vector2d,
    points: Vec<Vector2d>,
    /// reference image for the next propagation step
    previous: PyramidFrame,
}

pub struct Tracker {
    config: TrackerConfig,
    detector: Detector,
    optical_flow: OpticalFlow,
    lock: Option<Lock>,
    unused_frame: Option<PyramidFrame>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Tracker {
            detector: Detector::new(config.features.clone()),
            optical_flow: OpticalFlow::new(&config.flow),
            config,
            lock: None,
            unused_frame: None,
        }
    }

    pub fn region(&self) -> Option<Region> {
        self.lock.as_ref().map(|lock| lock.region)
    }

    pub fn points(&self) -> Option<&[Vector2d]> {
        self.lock.as_ref().map(|lock| lock.points.as_slice())
    }

    fn output(&self) -> TrackOutput {
        match &self.lock {
            Some(lock) => TrackOutput {
                state: TrackState::Locked,
                region: Some(lock.region),
                points: Some(lock.points.clone()),
            },
            None => TrackOutput::lost(),
        }
    }

    /// Drop the lock, keeping its frame buffers for reuse
    fn release(&mut self) {
        if let Some(lock) = self.lock.take() {
            self.unused_frame = Some(lock.previous);
        }
    }

    fn pyramid_frame(&mut self, image: &Image) -> Result<PyramidFrame> {
        PyramidFrame::new(image, self.optical_flow.levels(), self.unused_frame.take())
    }

    /// Select corners in the padded region that are not already tracked and
    /// merge them into the point set
    fn replenish(&mut self) -> Result<()> {
        let padding = self.config.replenish_padding;
        let merge_distance = self.config.merge_distance;
        let lock = if let Some(lock) = self.lock.as_mut() {
            lock
        } else {
            return Ok(());
        };
        let image = &lock.previous.image;
        let region = lock.region.padded(padding).clamped(image.width, image.height);
        let mask = Mask::from_region(image.width, image.height, &region);
        let fresh = self.detector.detect(image, &mask, &lock.points)?;
        if fresh.is_empty() {
            return Ok(());
        }
        let before = lock.points.len();
        lock.points.extend(fresh.iter().map(|c| c.point));
        lock.points = merge_duplicates(&lock.points, merge_distance);
        debug!("replenished {} -> {} points", before, lock.points.len());
        Ok(())
    }
}

impl RoiTracker for Tracker {
    fn init(&mut self, frame: &Image, roi: Region) -> Result<TrackOutput> {
        ensure!(
            roi.width >= 0 && roi.height >= 0,
            "region {:?} has a negative size",
            roi
        );
        ensure!(frame.width > 0 && frame.height > 0, "frame is empty");
        self.release();

        let mask = Mask::from_region(frame.width, frame.height, &roi);
        let corners = self.detector.detect(frame, &mask, &[])?;
        if corners.is_empty() {
            info!("no corners inside {:?}, tracking lost", roi);
            return Ok(TrackOutput::lost());
        }

        let previous = self.pyramid_frame(frame)?;
        info!("locked on {:?} with {} points", roi, corners.len());
        self.lock = Some(Lock {
            region: roi,
            center: roi.center(),
            points: corners.into_iter().map(|c| c.point).collect(),
            previous,
        });
        Ok(self.output())
    }

    fn update(&mut self, frame: &Image) -> Result<TrackOutput> {
        match &self.lock {
            None => return Ok(TrackOutput::lost()),
            Some(lock) => ensure!(
                lock.previous.image.same_shape(frame),
                "frame is {} x {} but the tracked frames are {} x {}",
                frame.width,
                frame.height,
                lock.previous.image.width,
                lock.previous.image.height
            ),
        }

        let current = self.pyramid_frame(frame)?;
        let lock = if let Some(lock) = self.lock.as_mut() {
            lock
        } else {
            return Ok(TrackOutput::lost());
        };
        let (points, status) = self
            .optical_flow
            .process(&lock.previous, &current, &lock.points)?;

        let mut good = Vec::with_capacity(points.len());
        let mut shift = Vector2d::zeros();
        for ((old, new), ok) in lock.points.iter().zip(&points).zip(&status) {
            if *ok {
                shift += new - old;
                good.push(*new);
            }
        }
        if good.is_empty() {
            info!("all {} points lost, tracking lost", lock.points.len());
            self.release();
            return Ok(TrackOutput::lost());
        }
        debug!("{} of {} points tracked", good.len(), lock.points.len());

        let center = match self.config.recenter {
            RecenterMode::Centroid => mean(&good),
            RecenterMode::Shift => lock.center + shift / good.len() as f64,
        };
        lock.center = center;
        lock.region = lock.region.centered_at(center);
        let good_count = good.len();
        lock.points = good;
        self.unused_frame = Some(std::mem::replace(&mut lock.previous, current));

        if good_count < self.config.replenish_threshold {
            self.replenish()?;
        }
        Ok(self.output())
    }

    fn reset(&mut self) {
        if self.lock.is_some() {
            info!("tracker reset");
        }
        self.release();
    }

    fn state(&self) -> TrackState {
        if self.lock.is_some() {
            TrackState::Locked
        } else {
            TrackState::Lost
        }
    }
}

fn mean(points: &[Vector2d]) -> Vector2d {
    points.iter().sum::<Vector2d>() / points.len() as f64
}

/// Keep the first of any points closer than `distance`
fn merge_duplicates(points: &[Vector2d], distance: f64) -> Vec<Vector2d> {
    let distance2 = distance * distance;
    let mut kept: Vec<Vector2d> = Vec::with_capacity(points.len());
    for p in points {
        if kept.iter().all(|k| (k - p).norm_squared() >= distance2) {
            kept.push(*p);
        }
    }
    kept
}
