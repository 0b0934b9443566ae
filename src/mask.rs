use crate::region::Region;

/// Binary mask with the same shape as the image it restricts
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    pub data: Vec<bool>,
    pub width: usize,
    pub height: usize,
}

impl Mask {
    /// Every pixel excluded
    pub fn empty(width: usize, height: usize) -> Mask {
        Mask {
            data: vec![false; width * height],
            width,
            height,
        }
    }

    /// Every pixel included
    pub fn full(width: usize, height: usize) -> Mask {
        Mask {
            data: vec![true; width * height],
            width,
            height,
        }
    }

    /// Include the part of `region` that overlaps the frame. A degenerate
    /// or fully outside region gives an all-excluded mask.
    pub fn from_region(width: usize, height: usize, region: &Region) -> Mask {
        let mut mask = Mask::empty(width, height);
        if let Some([x0, y0, x1, y1]) = overlap(width, height, region) {
            for y in y0..y1 {
                mask.data[y * width + x0..y * width + x1].fill(true);
            }
        }
        mask
    }

    #[inline(always)]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// Smallest [x0, y0, x1, y1) box holding every included pixel
    pub fn bounding_box(&self) -> Option<[usize; 4]> {
        let mut bbox: Option<[usize; 4]> = None;
        for y in 0..self.height {
            for x in 0..self.width {
                if !self.get(x, y) {
                    continue;
                }
                bbox = Some(match bbox {
                    None => [x, y, x + 1, y + 1],
                    Some([x0, y0, x1, y1]) => [x0.min(x), y0.min(y), x1.max(x + 1), y1.max(y + 1)],
                });
            }
        }
        bbox
    }
}

fn overlap(width: usize, height: usize, region: &Region) -> Option<[usize; 4]> {
    if region.is_empty() {
        return None;
    }
    let x0 = region.x.max(0) as i64;
    let y0 = region.y.max(0) as i64;
    let x1 = (region.x as i64 + region.width as i64).min(width as i64);
    let y1 = (region.y as i64 + region.height as i64).min(height as i64);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some([x0 as usize, y0 as usize, x1 as usize, y1 as usize])
}
