/// The number of landmarks a detection carries (eyes, ears, nose, mouth).
pub const LANDMARK_COUNT: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Axis-aligned face box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Clamp the box to `[0, width] × [0, height]`, shrinking it as needed.
    pub fn clamped(&self, frame_width: u32, frame_height: u32) -> BoundingBox {
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let x1 = self.x.clamp(0.0, fw);
        let y1 = self.y.clamp(0.0, fh);
        let x2 = (self.x + self.width).clamp(0.0, fw);
        let y2 = (self.y + self.height).clamp(0.0, fh);
        BoundingBox {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// A single face found in a frame.
///
/// At most one of these exists per sampled frame; `score` is the model's
/// confidence in [0, 1]. The descriptor is attached only when an embedding
/// model is available.
#[derive(Clone, Debug)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub landmarks: Vec<Point>,
    pub descriptor: Option<Vec<f32>>,
    pub score: f32,
}

impl Detection {
    /// Rescale geometry from the frame it was detected in to a surface of
    /// different dimensions (the preview the overlay is drawn on).
    pub fn scaled_to(&self, from: (u32, u32), to: (u32, u32)) -> Detection {
        let sx = to.0 as f32 / from.0.max(1) as f32;
        let sy = to.1 as f32 / from.1.max(1) as f32;
        Detection {
            bbox: BoundingBox {
                x: self.bbox.x * sx,
                y: self.bbox.y * sy,
                width: self.bbox.width * sx,
                height: self.bbox.height * sy,
            },
            landmarks: self
                .landmarks
                .iter()
                .map(|p| Point {
                    x: p.x * sx,
                    y: p.y * sy,
                })
                .collect(),
            descriptor: self.descriptor.clone(),
            score: self.score,
        }
    }
}
