//! 位图编码：PNG / JPEG / WebP。新旧两条生成路径共用。

use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ColorType, RgbaImage};
use tiny_skia::Pixmap;

use crate::error::AppError;

/// 1 英寸 = 0.0254 米
const METERS_PER_INCH: f64 = 0.0254;

/// tiny-skia 像素为预乘 alpha，这里还原为普通 RGBA
pub fn pixmap_to_rgba(pixmap: &Pixmap) -> Result<RgbaImage, AppError> {
    let mut buf = Vec::with_capacity(pixmap.data().len());
    for px in pixmap.pixels() {
        let c = px.demultiply();
        buf.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    RgbaImage::from_raw(pixmap.width(), pixmap.height(), buf)
        .ok_or_else(|| AppError::Generation("像素缓冲区尺寸不匹配".to_string()))
}

/// PNG 编码；提供 dpi 时写入 pHYs 块，便于打印时保持物理尺寸
pub fn encode_png(img: &RgbaImage, dpi: Option<u32>, fast: bool) -> Result<Vec<u8>, AppError> {
    let (w, h) = img.dimensions();
    let mut out = Vec::with_capacity((w as usize) * (h as usize) / 4 + 64);
    {
        let mut encoder = png::Encoder::new(&mut out, w, h);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        if fast {
            encoder.set_compression(png::Compression::Fast);
            encoder.set_filter(png::FilterType::NoFilter);
        } else {
            encoder.set_compression(png::Compression::Default);
            encoder.set_filter(png::FilterType::Paeth);
        }
        if let Some(dpi) = dpi {
            let ppm = (f64::from(dpi) / METERS_PER_INCH).round() as u32;
            encoder.set_pixel_dims(Some(png::PixelDimensions {
                xppu: ppm,
                yppu: ppm,
                unit: png::Unit::Meter,
            }));
        }
        let mut writer = encoder.write_header()?;
        writer.write_image_data(img.as_raw())?;
        writer.finish()?;
    }
    Ok(out)
}

/// 以 alpha 为遮罩，把 RGBA 扁平化到不透明白底
pub fn flatten_onto_white(img: &RgbaImage) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((img.width() as usize) * (img.height() as usize) * 3);
    for px in img.pixels() {
        let [r, g, b, a] = px.0;
        let a = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * a + 255 * (255 - a) + 127) / 255) as u8;
        rgb.extend_from_slice(&[blend(r), blend(g), blend(b)]);
    }
    rgb
}

/// JPEG 编码（无透明通道，先扁平化到白底）
pub fn encode_jpeg(img: &RgbaImage, quality: u8) -> Result<Vec<u8>, AppError> {
    let rgb = flatten_onto_white(img);
    let mut out = Vec::new();
    let mut enc = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    enc.encode(&rgb, img.width(), img.height(), ColorType::Rgb8.into())
        .map_err(|e| AppError::Generation(format!("JPEG encode error: {e}")))?;
    Ok(out)
}

/// WebP 编码：未指定质量时无损，否则按给定质量有损编码
pub fn encode_webp(img: &RgbaImage, quality: Option<u8>) -> Result<Vec<u8>, AppError> {
    match quality {
        None => {
            let mut out = Vec::new();
            WebPEncoder::new_lossless(&mut out)
                .encode(img.as_raw(), img.width(), img.height(), ColorType::Rgba8.into())
                .map_err(|e| AppError::Generation(format!("WebP encode error: {e}")))?;
            Ok(out)
        }
        Some(q) => {
            let encoder = webp::Encoder::from_rgba(img.as_raw(), img.width(), img.height());
            // `encode` 内部对编码错误直接 unwrap，这里必须走 encode_simple
            let mem = encoder
                .encode_simple(false, f32::from(q.clamp(1, 100)))
                .map_err(|e| AppError::Generation(format!("WebP encode error: {e:?}")))?;
            Ok(mem.to_vec())
        }
    }
}
