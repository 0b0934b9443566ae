use anyhow::Result;

use crate::image::Image;
use crate::pyramid::Pyramid;

#[derive(Debug, Clone)]
pub struct PyramidFrame {
    /// full resolution image
    pub image: Image,
    /// downsized images
    pub pyramid: Pyramid,
}

impl PyramidFrame {
    /// Copy `input` and build `levels` pyramid levels on top of it.
    pub fn new(input: &Image, levels: usize, unused_frame: Option<PyramidFrame>) -> Result<Self> {
        let mut frame = if let Some(mut unused_frame) = unused_frame {
            // Move data buffer from old unused frame to the new frame to avoid allocation
            unused_frame.image.clear();
            unused_frame
        } else {
            PyramidFrame {
                image: Image::empty(),
                pyramid: Pyramid::empty(),
            }
        };

        frame.image.data.extend(input.data.iter());
        frame.image.width = input.width;
        frame.image.height = input.height;
        frame.pyramid.compute(&frame.image, levels)?;

        Ok(frame)
    }

    /// Number of levels including the full resolution image
    pub fn level_count(&self) -> usize {
        self.pyramid.levels.len() + 1
    }

    pub fn get_image_at_level(&self, level: usize) -> &Image {
        if level == 0 {
            &self.image
        } else {
            &self.pyramid.levels[level - 1]
        }
    }
}
