use crate::interfaces::Detection;
use ab_glyph::FontVec;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{debug, info, warn};

/// Fonts tried by `load_system_font`, in order.
pub const SYSTEM_FONT_PATHS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

const CAPTION_SCALE: f32 = 14.0;
const CAPTION_TEXT: Rgb<u8> = Rgb([0, 0, 0]);

/// Normalize a box from 0..1 space into pixel coordinates, clamped to image bounds.
pub fn normalize_box(bbox_norm: [f32; 4], dims: (u32, u32)) -> Option<[u32; 4]> {
    let (w, h) = dims;
    if w == 0 || h == 0 {
        return None;
    }
    let x0 = clamp_px(bbox_norm[0] * w as f32, w);
    let y0 = clamp_px(bbox_norm[1] * h as f32, h);
    let x1 = clamp_px(bbox_norm[2] * w as f32, w);
    let y1 = clamp_px(bbox_norm[3] * h as f32, h);
    if x0 > x1 || y0 > y1 {
        return None;
    }
    Some([x0, y0, x1, y1])
}

/// Round a pixel-space box to integer corners inside the image.
pub fn pixel_box(bbox_px: [f32; 4], dims: (u32, u32)) -> Option<[u32; 4]> {
    let (w, h) = dims;
    if w == 0 || h == 0 {
        return None;
    }
    let out = [
        clamp_px(bbox_px[0], w),
        clamp_px(bbox_px[1], h),
        clamp_px(bbox_px[2], w),
        clamp_px(bbox_px[3], h),
    ];
    (out[0] <= out[2] && out[1] <= out[3]).then_some(out)
}

fn clamp_px(v: f32, max: u32) -> u32 {
    v.max(0.0).min((max - 1) as f32) as u32
}

/// Draw a rectangle border with given thickness, growing inwards from `bbox_px`.
pub fn draw_rect(img: &mut RgbImage, bbox_px: [u32; 4], color: Rgb<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    let [x0, y0, x1, y1] = bbox_px;
    for t in 0..thickness {
        let xx0 = x0.saturating_add(t);
        let yy0 = y0.saturating_add(t);
        let xx1 = x1.saturating_sub(t);
        let yy1 = y1.saturating_sub(t);
        if xx0 >= w || yy0 >= h || xx1 >= w || yy1 >= h || xx0 > xx1 || yy0 > yy1 {
            continue;
        }
        let rect = Rect::at(xx0 as i32, yy0 as i32).of_size(xx1 - xx0 + 1, yy1 - yy0 + 1);
        draw_hollow_rect_mut(img, rect, color);
    }
}

const PALETTE: [[u8; 3]; 8] = [
    [230, 25, 75],
    [60, 180, 75],
    [255, 225, 25],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
    [240, 50, 230],
];

/// Stable color for a class id.
pub fn label_color(label: usize) -> Rgb<u8> {
    Rgb(PALETTE[label % PALETTE.len()])
}

/// Read a TrueType/OpenType font, or `None` when the file is missing or unparsable.
pub fn load_font(path: &Path) -> Option<FontVec> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) => {
            debug!("font {} unreadable: {err}", path.display());
            return None;
        }
    };
    match FontVec::try_from_vec(data) {
        Ok(font) => Some(font),
        Err(_) => {
            warn!("failed to parse font file {}", path.display());
            None
        }
    }
}

/// First font found in `SYSTEM_FONT_PATHS`.
pub fn load_system_font() -> Option<FontVec> {
    for path in SYSTEM_FONT_PATHS {
        if let Some(font) = load_font(Path::new(path)) {
            info!("loaded system font {path}");
            return Some(font);
        }
    }
    debug!("no system font found; captions will be skipped");
    None
}

/// `"<breed> <score>"`, falling back to the class id when the name is unknown.
pub fn caption(det: &Detection) -> String {
    match &det.label_name {
        Some(name) => format!("{name} {:.2}", det.score),
        None => format!("class {} {:.2}", det.label, det.score),
    }
}

/// Caption on a filled label-colored strip above the box, or just inside its top edge
/// when there is no room above.
fn draw_caption(img: &mut RgbImage, bbox: [u32; 4], text: &str, color: Rgb<u8>, font: &FontVec) {
    let (tw, th) = text_size(CAPTION_SCALE, font, text);
    if tw == 0 || th == 0 {
        return;
    }
    let strip_h = th + 2;
    let left = bbox[0] as i32;
    let top = if bbox[1] >= strip_h {
        (bbox[1] - strip_h) as i32
    } else {
        bbox[1] as i32
    };
    draw_filled_rect_mut(img, Rect::at(left, top).of_size(tw + 4, strip_h), color);
    draw_text_mut(img, CAPTION_TEXT, left + 2, top + 1, CAPTION_SCALE, font, text);
}

/// Draw every detection onto `img`, colored by label. Returns how many were drawn.
pub fn draw_detections(img: &mut RgbImage, detections: &[Detection], thickness: u32) -> usize {
    draw_labeled_detections(img, detections, thickness, None)
}

/// Like `draw_detections`, adding a `caption` per box when a font is given.
pub fn draw_labeled_detections(
    img: &mut RgbImage,
    detections: &[Detection],
    thickness: u32,
    font: Option<&FontVec>,
) -> usize {
    let dims = img.dimensions();
    let mut drawn = 0;
    for det in detections {
        if let Some(b) = pixel_box(det.bbox_px, dims) {
            let color = label_color(det.label);
            draw_rect(img, b, color, thickness);
            if let Some(font) = font {
                draw_caption(img, b, &caption(det), color, font);
            }
            drawn += 1;
        }
    }
    drawn
}
