use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use lru::LruCache;
use tiny_skia::{Pixmap, Transform};
use resvg::usvg;

use super::encode::pixmap_to_rgba;
use crate::error::AppError;

/// Logo 边长占载体较短边的比例
pub const LOGO_RATIO: f64 = 0.25;

/// Logo 加载器：按路径缓存解码后的 RGBA 图像。
///
/// 加载失败（文件缺失/损坏）不会让整个请求失败，调用方拿到 None 后返回不带 Logo 的图片。
pub struct LogoLoader {
    default_path: Option<PathBuf>,
    cache: Mutex<LruCache<PathBuf, Arc<RgbaImage>>>,
}

impl LogoLoader {
    pub fn new(default_path: Option<PathBuf>, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            default_path,
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn default_path(&self) -> Option<&Path> {
        self.default_path.as_deref()
    }

    /// 加载默认 Logo
    pub fn load_default(&self) -> Option<Arc<RgbaImage>> {
        let path = self.default_path.as_deref()?;
        self.load(path)
    }

    pub fn load(&self, path: &Path) -> Option<Arc<RgbaImage>> {
        if let Ok(mut cache) = self.cache.lock()
            && let Some(img) = cache.get(path)
        {
            return Some(img.clone());
        }

        match decode_logo(path) {
            Ok(img) => {
                let img = Arc::new(img);
                if let Ok(mut cache) = self.cache.lock() {
                    cache.put(path.to_path_buf(), img.clone());
                }
                Some(img)
            }
            Err(e) => {
                tracing::warn!("Logo 加载失败，将输出不带 Logo 的图片: {:?}: {}", path, e);
                None
            }
        }
    }
}

/// 位图使用 image 解码；.svg 使用 resvg 栅格化
fn decode_logo(path: &Path) -> Result<RgbaImage, AppError> {
    let is_svg = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("svg"));
    if !is_svg {
        return Ok(image::open(path)?.to_rgba8());
    }

    let data = std::fs::read(path)?;
    let tree = usvg::Tree::from_data(&data, &usvg::Options::default())
        .map_err(|e| AppError::Generation(format!("Failed to parse SVG logo: {e}")))?;
    let size = tree.size().to_int_size();
    let mut pixmap = Pixmap::new(size.width(), size.height())
        .ok_or_else(|| AppError::Generation("Failed to create pixmap".to_string()))?;
    resvg::render(&tree, Transform::default(), &mut pixmap.as_mut());
    pixmap_to_rgba(&pixmap)
}

/// 将 Logo 等比缩放到载体较短边的 25%，居中合成（alpha 混合）
pub fn composite_logo(carrier: &mut RgbaImage, logo: &RgbaImage, filter: FilterType) {
    let (w, h) = carrier.dimensions();
    let target = ((f64::from(w.min(h)) * LOGO_RATIO).round() as u32).max(1);
    if logo.width() == 0 || logo.height() == 0 {
        return;
    }
    // resize 在 target×target 内保持宽高比
    let resized = DynamicImage::ImageRgba8(logo.clone())
        .resize(target, target, filter)
        .to_rgba8();
    let x = i64::from((w - resized.width()) / 2);
    let y = i64::from((h - resized.height()) / 2);
    imageops::overlay(carrier, &resized, x, y);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn logo_is_a_quarter_of_the_short_side_and_centered() {
        let mut carrier = RgbaImage::from_pixel(200, 100, Rgba([255, 255, 255, 255]));
        let logo = RgbaImage::from_pixel(40, 20, Rgba([255, 0, 0, 255]));
        composite_logo(&mut carrier, &logo, FilterType::Lanczos3);
        // 目标 25px，宽高比 2:1 → 25×13（或 25×12），居中
        let center = carrier.get_pixel(100, 50).0;
        assert!(center[0] > 250 && center[1] < 5, "expected red, got {center:?}");
        assert_eq!(carrier.get_pixel(85, 50).0, [255, 255, 255, 255]);
        assert_eq!(carrier.get_pixel(100, 40).0, [255, 255, 255, 255]);
    }

    #[test]
    fn missing_logo_degrades_to_none() {
        let loader = LogoLoader::new(Some(PathBuf::from("./definitely/missing/logo.png")), 4);
        assert!(loader.load_default().is_none());
        let none = LogoLoader::new(None, 4);
        assert!(none.load_default().is_none());
    }

    #[test]
    fn caches_decoded_logo() {
        let path = std::env::temp_dir().join(format!("qr_logo_cache_{}.png", std::process::id()));
        RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 255]))
            .save(&path)
            .unwrap();
        let loader = LogoLoader::new(Some(path.clone()), 2);
        let first = loader.load_default().unwrap();
        std::fs::remove_file(&path).unwrap();
        // 文件已删除，仍命中缓存
        let second = loader.load_default().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
