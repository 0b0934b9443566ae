use std::time::Instant;

use anyhow::Result;
use log::{debug, info, warn};
use serde::Serialize;

use crate::image::Image;
use crate::region::Region;
use crate::tracker::{RoiTracker, TrackOutput, TrackState};

/// Selections smaller than this on either side are ignored
pub const MIN_SELECTION: i32 = 5;

/// Everything a frame source or user can feed into the tracking loop
#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    Frame(Image),
    /// Lock onto a rectangle of the most recent frame
    Select(Region),
    Reset,
    Pause,
    Resume,
    Quit,
}

pub trait EventSource {
    /// Number of frames the source will produce, used for progress only
    fn frame_count(&self) -> u64;

    /// Returns `None` once the source is exhausted
    fn next_event(&mut self) -> Result<Option<InputEvent>>;
}

/// One output line per processed frame
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameRecord {
    pub frame: u64,
    pub state: TrackState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<[f64; 2]>>,
    pub fps: f64,
}

impl FrameRecord {
    fn new(frame: u64, output: TrackOutput, fps: f64) -> Self {
        FrameRecord {
            frame,
            state: output.state,
            region: output.region,
            points: output
                .points
                .map(|points| points.iter().map(|p| [p[0], p[1]]).collect()),
            fps,
        }
    }
}

/// Frame rate smoothed with an exponential moving average
pub struct FpsCounter {
    last: Option<Instant>,
    fps: f64,
    smoothing: f64,
}

impl FpsCounter {
    pub fn new(smoothing: f64) -> Self {
        FpsCounter {
            last: None,
            fps: 0.,
            smoothing,
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> f64 {
        if let Some(last) = self.last {
            let dt = now.saturating_duration_since(last).as_secs_f64();
            if dt > 0. {
                let current = 1. / dt;
                self.fps = if self.fps == 0. {
                    current
                } else {
                    self.smoothing * self.fps + (1. - self.smoothing) * current
                };
            }
        }
        self.last = Some(now);
        self.fps
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub frames: u64,
    pub locked_frames: u64,
    pub selections: u64,
    pub losses: u64,
    pub dropped_frames: u64,
}

/// Drives a tracker from a stream of input events
pub struct App<T: RoiTracker> {
    tracker: T,
    last_frame: Option<Image>,
    last_output: TrackOutput,
    paused: bool,
    finished: bool,
    fps: FpsCounter,
    summary: Summary,
}

impl<T: RoiTracker> App<T> {
    pub fn new(tracker: T) -> Self {
        App {
            tracker,
            last_frame: None,
            last_output: TrackOutput::lost(),
            paused: false,
            finished: false,
            fps: FpsCounter::new(0.9),
            summary: Summary::default(),
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    /// True once a quit event arrived
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Returns a record for every frame event. While paused the frame is
    /// dropped and the previous output is reported again.
    pub fn handle(&mut self, event: InputEvent) -> Result<Option<FrameRecord>> {
        if self.finished {
            return Ok(None);
        }
        match event {
            InputEvent::Frame(image) => {
                if self.paused {
                    self.summary.dropped_frames += 1;
                    return Ok(Some(self.record(self.last_output.clone())));
                }
                let was_locked = self.tracker.state() == TrackState::Locked;
                let output = self.tracker.update(&image)?;
                if was_locked && output.state == TrackState::Lost {
                    warn!("lost track at frame {}", self.summary.frames);
                    self.summary.losses += 1;
                }
                self.last_frame = Some(image);
                self.last_output = output.clone();
                Ok(Some(self.record(output)))
            }
            InputEvent::Select(region) => {
                if region.width < MIN_SELECTION || region.height < MIN_SELECTION {
                    warn!("ignoring selection {:?}, too small", region);
                    return Ok(None);
                }
                let frame = if let Some(frame) = &self.last_frame {
                    frame
                } else {
                    warn!("ignoring selection {:?}, no frame yet", region);
                    return Ok(None);
                };
                self.summary.selections += 1;
                let output = self.tracker.init(frame, region)?;
                if output.state == TrackState::Lost {
                    info!("nothing to track in {:?}", region);
                }
                self.last_output = output;
                Ok(None)
            }
            InputEvent::Reset => {
                self.tracker.reset();
                self.last_output = TrackOutput::lost();
                Ok(None)
            }
            InputEvent::Pause => {
                debug!("paused");
                self.paused = true;
                Ok(None)
            }
            InputEvent::Resume => {
                debug!("resumed");
                self.paused = false;
                Ok(None)
            }
            InputEvent::Quit => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    fn record(&mut self, output: TrackOutput) -> FrameRecord {
        let frame = self.summary.frames;
        self.summary.frames += 1;
        if output.state == TrackState::Locked {
            self.summary.locked_frames += 1;
        }
        FrameRecord::new(frame, output, self.fps.tick())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::synthetic::checkerboard;
    use crate::tracker::Tracker;
    use std::time::Duration;

    fn app() -> App<Tracker> {
        App::new(Tracker::new(TrackerConfig::default()))
    }

    fn board() -> Image {
        checkerboard(320, 240, 20)
    }

    #[test]
    fn test_select_then_track() {
        let mut app = app();
        let record = app.handle(InputEvent::Frame(board())).unwrap().unwrap();
        assert_eq!(record.frame, 0);
        assert_eq!(record.state, TrackState::Lost);
        assert!(record.region.is_none());

        let region = Region::new(90, 90, 60, 60);
        assert!(app.handle(InputEvent::Select(region)).unwrap().is_none());
        assert_eq!(app.tracker().state(), TrackState::Locked);

        let record = app.handle(InputEvent::Frame(board())).unwrap().unwrap();
        assert_eq!(record.frame, 1);
        assert_eq!(record.state, TrackState::Locked);
        assert_eq!(record.region, Some(region));
        assert!(!record.points.unwrap().is_empty());
        assert_eq!(app.summary().locked_frames, 1);
    }

    #[test]
    fn test_small_or_early_selection_is_ignored() {
        let mut app = app();
        app.handle(InputEvent::Select(Region::new(90, 90, 60, 60)))
            .unwrap();
        assert_eq!(app.tracker().state(), TrackState::Lost);

        app.handle(InputEvent::Frame(board())).unwrap();
        app.handle(InputEvent::Select(Region::new(90, 90, 4, 60)))
            .unwrap();
        assert_eq!(app.tracker().state(), TrackState::Lost);
        assert_eq!(app.summary().selections, 0);
    }

    #[test]
    fn test_pause_repeats_last_output() {
        let mut app = app();
        app.handle(InputEvent::Frame(board())).unwrap();
        let region = Region::new(90, 90, 60, 60);
        app.handle(InputEvent::Select(region)).unwrap();
        app.handle(InputEvent::Pause).unwrap();
        assert!(app.paused());

        // a blank frame would lose the lock if it reached the tracker
        let record = app
            .handle(InputEvent::Frame(Image::filled(320, 240, 0)))
            .unwrap()
            .unwrap();
        assert_eq!(record.state, TrackState::Locked);
        assert_eq!(record.region, Some(region));
        assert_eq!(app.tracker().state(), TrackState::Locked);

        app.handle(InputEvent::Resume).unwrap();
        let record = app.handle(InputEvent::Frame(board())).unwrap().unwrap();
        assert_eq!(record.frame, 2);
        assert_eq!(app.summary().dropped_frames, 1);
        assert_eq!(app.summary().frames, 3);
    }

    #[test]
    fn test_reset_and_loss_are_counted() {
        let mut app = app();
        app.handle(InputEvent::Frame(board())).unwrap();
        app.handle(InputEvent::Select(Region::new(90, 90, 60, 60)))
            .unwrap();
        app.handle(InputEvent::Reset).unwrap();
        assert_eq!(app.tracker().state(), TrackState::Lost);

        app.handle(InputEvent::Select(Region::new(90, 90, 60, 60)))
            .unwrap();
        let record = app
            .handle(InputEvent::Frame(Image::filled(320, 240, 0)))
            .unwrap()
            .unwrap();
        assert_eq!(record.state, TrackState::Lost);
        assert_eq!(app.summary().losses, 1);
        assert_eq!(app.summary().selections, 2);
    }

    #[test]
    fn test_quit_stops_processing() {
        let mut app = app();
        app.handle(InputEvent::Quit).unwrap();
        assert!(app.finished());
        assert!(app.handle(InputEvent::Frame(board())).unwrap().is_none());
        assert_eq!(app.summary().frames, 0);
    }

    #[test]
    fn test_record_json() {
        let record = FrameRecord {
            frame: 3,
            state: TrackState::Locked,
            region: Some(Region::new(1, 2, 3, 4)),
            points: Some(vec![[1.5, 2.]]),
            fps: 30.,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"frame":3,"state":"LOCKED","region":{"x":1,"y":2,"width":3,"height":4},"points":[[1.5,2.0]],"fps":30.0}"#
        );
        let lost = FrameRecord::new(4, TrackOutput::lost(), 0.);
        let json = serde_json::to_string(&lost).unwrap();
        assert_eq!(json, r#"{"frame":4,"state":"LOST","fps":0.0}"#);
    }

    #[test]
    fn test_fps_moving_average() {
        let mut counter = FpsCounter::new(0.5);
        let start = Instant::now();
        assert_eq!(counter.tick_at(start), 0.);
        assert!((counter.tick_at(start + Duration::from_millis(100)) - 10.).abs() < 1e-9);
        // halfway between 10 and 20
        assert!((counter.tick_at(start + Duration::from_millis(150)) - 15.).abs() < 1e-9);
    }
}
