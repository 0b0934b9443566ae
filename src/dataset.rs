use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use log::{debug, warn};

use crate::app::{EventSource, InputEvent};
use crate::image::Image;
use crate::region::Region;

/// Recorded session: `data.jsonl` next to the frame images. Each line holds
/// one of
///
/// ```text
/// {"frame": "000001.png"}
/// {"select": [x, y, width, height]}
/// {"command": "reset" | "pause" | "resume" | "quit"}
/// ```
pub struct Dataset {
    folder: PathBuf,
    reader: BufReader<File>,
    line: String,
    pub length: u64,
}

impl Dataset {
    pub fn new(path: &Path) -> Result<Dataset> {
        let data_path = path.join("data.jsonl");
        let length = count_frames(&data_path)?;
        let file = File::open(&data_path)
            .with_context(|| format!("Failed to open {}", data_path.display()))?;
        debug!("{} frames in {}", length, data_path.display());
        Ok(Dataset {
            folder: path.to_path_buf(),
            reader: BufReader::new(file),
            line: String::new(),
            length,
        })
    }

    fn load_frame(&self, name: &str) -> Result<Image> {
        let path = self.folder.join(name);
        let gray = ::image::open(&path)
            .with_context(|| format!("Failed to load frame {}", path.display()))?
            .to_luma8();
        let (width, height) = gray.dimensions();
        Image::new(gray.into_raw(), width as usize, height as usize)
    }
}

impl EventSource for Dataset {
    fn frame_count(&self) -> u64 {
        self.length
    }

    fn next_event(&mut self) -> Result<Option<InputEvent>> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return Ok(None),
                Err(err) => bail!("Failed to read line {}", err),
                _ => {}
            }
            if self.line.trim().is_empty() {
                continue;
            }

            let value: serde_json::Value = serde_json::from_str(&self.line)
                .context(format!("JSON deserialization failed for line: {}", self.line))?;
            let value = value.as_object().ok_or(anyhow!("JSON line is not a map"))?;

            if let Some(frame) = value.get("frame") {
                let name = frame.as_str().ok_or(anyhow!("Frame is not a file name"))?;
                return Ok(Some(InputEvent::Frame(self.load_frame(name)?)));
            } else if let Some(select) = value.get("select") {
                let v = select
                    .as_array()
                    .ok_or(anyhow!("Selection is not an array"))?
                    .iter()
                    .map(|x| x.as_i64().map(|x| x as i32))
                    .collect::<Option<Vec<i32>>>()
                    .ok_or(anyhow!("Selection values must be integers"))?;
                if v.len() != 4 {
                    bail!("Selection needs x, y, width and height, got {:?}", v);
                }
                return Ok(Some(InputEvent::Select(Region::new(v[0], v[1], v[2], v[3]))));
            } else if let Some(command) = value.get("command") {
                let command = command.as_str().ok_or(anyhow!("Command is not a string"))?;
                match command {
                    "reset" => return Ok(Some(InputEvent::Reset)),
                    "pause" => return Ok(Some(InputEvent::Pause)),
                    "resume" => return Ok(Some(InputEvent::Resume)),
                    "quit" => return Ok(Some(InputEvent::Quit)),
                    _ => {
                        warn!("Unknown command: {}", command);
                        continue;
                    }
                }
            } else {
                warn!("Unrecognised data format {}", self.line.trim());
                continue;
            }
        }
    }
}

fn count_frames(path: &Path) -> Result<u64> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        if line?.contains("\"frame\"") {
            count += 1;
        }
    }
    Ok(count)
}
