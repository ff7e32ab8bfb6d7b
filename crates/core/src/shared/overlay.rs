//! Overlay drawing for the live preview: detection box and landmark dots.

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::shared::detection::Detection;

const BOX_COLOR: Rgba<u8> = Rgba([0, 118, 255, 255]);
const LANDMARK_COLOR: Rgba<u8> = Rgba([0, 255, 120, 255]);
const BOX_THICKNESS: i32 = 2;
const LANDMARK_RADIUS: i32 = 2;

/// Draw a detection onto a preview image. Geometry must already be scaled
/// to the image's dimensions (see [`Detection::scaled_to`]).
pub fn draw_detection(image: &mut RgbaImage, det: &Detection) {
    let (img_w, img_h) = image.dimensions();
    if img_w == 0 || img_h == 0 {
        return;
    }

    if let Some(rect) = rect_from_bbox(det, img_w, img_h) {
        // Nested hollow rects approximate a thick border.
        for inset in 0..BOX_THICKNESS {
            let w = rect.width() as i32 - 2 * inset;
            let h = rect.height() as i32 - 2 * inset;
            if w < 1 || h < 1 {
                break;
            }
            let inner = Rect::at(rect.left() + inset, rect.top() + inset)
                .of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, inner, BOX_COLOR);
        }
    }

    for lm in &det.landmarks {
        let cx = clamp_coord(lm.x, img_w);
        let cy = clamp_coord(lm.y, img_h);
        draw_filled_circle_mut(image, (cx, cy), LANDMARK_RADIUS, LANDMARK_COLOR);
    }
}

/// Convert the detection's float box into an integer rect clamped to the
/// image. Returns `None` when the clamped box has no visible area.
fn rect_from_bbox(det: &Detection, img_w: u32, img_h: u32) -> Option<Rect> {
    let clamped = det.bbox.clamped(img_w, img_h);
    let width = clamped.width.round() as u32;
    let height = clamped.height.round() as u32;
    if width == 0 || height == 0 {
        return None;
    }
    Some(Rect::at(clamped.x.round() as i32, clamped.y.round() as i32).of_size(width, height))
}

#[inline]
fn clamp_coord(value: f32, max_extent: u32) -> i32 {
    if max_extent == 0 {
        return 0;
    }
    value.clamp(0.0, (max_extent - 1) as f32).round() as i32
}
