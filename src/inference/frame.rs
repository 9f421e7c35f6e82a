use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, Rgb, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::warn;

/// Bounding box frames are shrunk into before they are sent for analysis
pub const MAX_FRAME_WIDTH: u32 = 640;
pub const MAX_FRAME_HEIGHT: u32 = 480;

const JPEG_QUALITY: u8 = 85;

/// 3x3 sharpening kernel, row-major. Sums to 1 so flat regions are untouched.
const SHARPEN_KERNEL: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 9.0, -1.0, -1.0, -1.0, -1.0];

/// Equalize exposure and sharpen a decoded frame.
///
/// Best effort: if any step fails the untouched frame comes back.
pub fn preprocess_frame(frame: RgbImage) -> RgbImage {
    match equalize_luma(&frame) {
        Ok(equalized) => sharpen(&equalized),
        Err(e) => {
            warn!("Frame preprocessing failed, using raw frame: {:#}", e);
            frame
        }
    }
}

/// Histogram-equalize the luma channel (BT.601 YUV), leaving chroma alone.
pub fn equalize_luma(frame: &RgbImage) -> Result<RgbImage> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("Cannot equalize an empty frame");
    }

    let mut luma = Vec::with_capacity((width * height) as usize);
    let mut histogram = [0u64; 256];
    for pixel in frame.pixels() {
        let y = to_luma(pixel);
        let bin = y.round().clamp(0.0, 255.0) as usize;
        histogram[bin] += 1;
        luma.push(y);
    }

    let lut = equalization_lut(&histogram);

    let mut out = RgbImage::new(width, height);
    for ((src, dst), y) in frame.pixels().zip(out.pixels_mut()).zip(luma) {
        let [r, _, b] = src.0.map(f32::from);
        let u = (b - y) * 0.492;
        let v = (r - y) * 0.877;
        let new_y = f32::from(lut[y.round().clamp(0.0, 255.0) as usize]);

        let r = new_y + 1.140 * v;
        let g = new_y - 0.395 * u - 0.581 * v;
        let b = new_y + 2.032 * u;
        *dst = Rgb([clamp_u8(r), clamp_u8(g), clamp_u8(b)]);
    }

    Ok(out)
}

/// Lookup table mapping each luma level to its equalized value.
fn equalization_lut(histogram: &[u64; 256]) -> [u8; 256] {
    let total: u64 = histogram.iter().sum();
    let mut lut = [0u8; 256];

    let Some(first) = histogram.iter().position(|&count| count > 0) else {
        return lut;
    };

    // single-level image: nothing to stretch
    if histogram[first] == total {
        return [first as u8; 256];
    }

    let scale = 255.0 / (total - histogram[first]) as f64;
    let mut cumulative = 0u64;
    for level in (first + 1)..256 {
        cumulative += histogram[level];
        lut[level] = (cumulative as f64 * scale).round().clamp(0.0, 255.0) as u8;
    }

    lut
}

/// Apply the fixed sharpening kernel, replicating edge pixels at the border.
pub fn sharpen(frame: &RgbImage) -> RgbImage {
    let (width, height) = frame.dimensions();
    let mut out = RgbImage::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let mut acc = [0f32; 3];
            for (k, weight) in SHARPEN_KERNEL.iter().enumerate() {
                let dx = (k % 3) as i64 - 1;
                let dy = (k / 3) as i64 - 1;
                let sx = (x as i64 + dx).clamp(0, width as i64 - 1) as u32;
                let sy = (y as i64 + dy).clamp(0, height as i64 - 1) as u32;
                let p = frame.get_pixel(sx, sy);
                for c in 0..3 {
                    acc[c] += f32::from(p[c]) * weight;
                }
            }
            out.put_pixel(x, y, Rgb(acc.map(clamp_u8)));
        }
    }

    out
}

/// Shrink a frame to fit inside `max_width` x `max_height`, keeping the aspect ratio.
/// Frames that already fit are returned as-is; nothing is ever upscaled.
pub fn resize_to_fit(frame: RgbImage, max_width: u32, max_height: u32) -> RgbImage {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return frame;
    }

    let scale = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    if scale >= 1.0 {
        return frame;
    }

    let new_width = ((width as f64 * scale) as u32).max(1);
    let new_height = ((height as f64 * scale) as u32).max(1);

    image::imageops::resize(
        &frame,
        new_width,
        new_height,
        image::imageops::FilterType::Lanczos3,
    )
}

/// Save a frame as JPEG
pub fn save_frame<P: AsRef<Path>>(frame: &RgbImage, output_path: P) -> Result<()> {
    let file = File::create(output_path.as_ref()).with_context(|| {
        format!(
            "Failed to create screenshot file {}",
            output_path.as_ref().display()
        )
    })?;

    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
        .encode_image(frame)
        .context("Failed to encode frame as JPEG")?;

    Ok(())
}

/// Quality score (0-100) of an image on disk. Unreadable images score 0.
pub fn quality_score<P: AsRef<Path>>(image_path: P) -> f64 {
    match image::open(image_path.as_ref()) {
        Ok(img) => score_luma(&img.to_luma8()),
        Err(e) => {
            warn!(
                "Could not read {} for quality scoring: {}",
                image_path.as_ref().display(),
                e
            );
            0.0
        }
    }
}

/// Weighted mix of sharpness (laplacian variance), exposure (closeness of the
/// mean to mid-gray) and contrast (standard deviation).
pub fn score_luma(gray: &GrayImage) -> f64 {
    let (width, height) = gray.dimensions();
    let n = (width as u64 * height as u64) as f64;
    if n == 0.0 {
        return 0.0;
    }

    let mean = gray.pixels().map(|p| f64::from(p[0])).sum::<f64>() / n;
    let variance = gray
        .pixels()
        .map(|p| (f64::from(p[0]) - mean).powi(2))
        .sum::<f64>()
        / n;
    let contrast = variance.sqrt();
    let sharpness = laplacian_variance(gray);

    let sharpness_term = (sharpness / 100.0).clamp(0.0, 1.0);
    let exposure_term = 1.0 - ((mean - 128.0).abs() / 128.0).clamp(0.0, 1.0);
    let contrast_term = (contrast / 127.0).clamp(0.0, 1.0);

    let score = (sharpness_term * 0.4 + exposure_term * 0.3 + contrast_term * 0.3) * 100.0;
    score.clamp(0.0, 100.0)
}

/// Variance of the 4-neighbour laplacian response.
fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (width, height) = gray.dimensions();
    let at = |x: i64, y: i64| -> f64 {
        let x = x.clamp(0, width as i64 - 1) as u32;
        let y = y.clamp(0, height as i64 - 1) as u32;
        f64::from(gray.get_pixel(x, y)[0])
    };

    let mut responses = Vec::with_capacity((width * height) as usize);
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let value =
                at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            responses.push(value);
        }
    }

    let n = responses.len() as f64;
    let mean = responses.iter().sum::<f64>() / n;
    responses.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

fn to_luma(pixel: &Rgb<u8>) -> f32 {
    let [r, g, b] = pixel.0.map(f32::from);
    0.299 * r + 0.587 * g + 0.114 * b
}

fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
