// src/preprocessing.rs

use crate::types::Patch;

/// Letterbox a raw RGB image into a square `target` x `target` model input:
/// aspect-preserving resize, gray padding, [0, 255] -> [0, 1], HWC -> CHW.
/// Returns the tensor data plus the scale and padding needed to map model
/// coordinates back to source coordinates.
pub fn letterbox(src: &[u8], src_w: usize, src_h: usize, target: usize) -> (Vec<f32>, f32, f32, f32) {
    let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
    let scaled_w = ((src_w as f32 * scale) as usize).min(target);
    let scaled_h = ((src_h as f32 * scale) as usize).min(target);

    let pad_x = (target - scaled_w) as f32 / 2.0;
    let pad_y = (target - scaled_h) as f32 / 2.0;

    let resized = resize_bilinear(src, src_w, src_h, scaled_w, scaled_h);

    // Gray canvas, resized image centered
    let mut canvas = vec![114u8; target * target * 3];
    for y in 0..scaled_h {
        for x in 0..scaled_w {
            let src_idx = (y * scaled_w + x) * 3;
            let dst_x = x + pad_x as usize;
            let dst_y = y + pad_y as usize;
            let dst_idx = (dst_y * target + dst_x) * 3;
            canvas[dst_idx..dst_idx + 3].copy_from_slice(&resized[src_idx..src_idx + 3]);
        }
    }

    let mut input = vec![0.0f32; 3 * target * target];
    for c in 0..3 {
        for h in 0..target {
            for w in 0..target {
                let hwc_idx = (h * target + w) * 3 + c;
                let chw_idx = c * target * target + h * target + w;
                input[chw_idx] = canvas[hwc_idx] as f32 / 255.0;
            }
        }
    }

    (input, scale, pad_x, pad_y)
}

/// Copy the `[x1, y1, x2, y2]` region out of a raw RGB buffer.
/// The bbox must already be clamped to the source dimensions.
pub fn crop_rgb(src: &[u8], src_width: usize, bbox: [usize; 4]) -> Patch {
    let [x1, y1, x2, y2] = bbox;
    let width = x2 - x1;
    let height = y2 - y1;

    let mut data = Vec::with_capacity(width * height * 3);
    for y in y1..y2 {
        let start = (y * src_width + x1) * 3;
        data.extend_from_slice(&src[start..start + width * 3]);
    }

    Patch { data, width, height }
}

/// RGB24 -> 8-bit luma, one byte per pixel.
pub fn rgb_to_gray(patch: &Patch) -> Vec<u8> {
    let mut gray = Vec::with_capacity(patch.width * patch.height);
    for px in patch.data.chunks_exact(3) {
        let luma = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
        gray.push(luma.round() as u8);
    }
    gray
}

/// Bilinear image resize
fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_h * dst_w * 3];

    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;

            let sx0 = sx.floor() as usize;
            let sy0 = sy.floor() as usize;
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);

            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                dst[(dy * dst_w + dx) * 3 + c] = val.round() as u8;
            }
        }
    }

    dst
}
