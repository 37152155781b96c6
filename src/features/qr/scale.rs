use super::types::{PhysicalDimensions, PhysicalUnit};
use crate::error::AppError;

/// 相对尺寸约定：每个 size 单位对应 25 像素
pub const PIXELS_PER_SIZE_UNIT: f64 = 25.0;

/// 位图单边像素上限，分配画布前检查
pub const MAX_RASTER_EDGE: u32 = 16_384;

/// 位图边长超限时返回生成错误（画布尚未分配）
pub fn ensure_raster_edge(edge_px: u64) -> Result<(), AppError> {
    if edge_px > u64::from(MAX_RASTER_EDGE) {
        return Err(AppError::Generation(format!(
            "位图边长 {edge_px}px 超过上限 {MAX_RASTER_EDGE}px，请降低物理尺寸或 dpi，或改用 SVG"
        )));
    }
    Ok(())
}

/// 缩放计算结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleResult {
    /// 每个模块的像素数（≥1.0）
    pub scale: f64,
    /// 目标像素边长
    pub target_px: f64,
    /// 含静区的模块数
    pub total_modules: u32,
}

impl ScaleResult {
    /// 栅格输出的实际像素边长
    pub fn pixel_size(&self) -> u32 {
        (f64::from(self.total_modules) * self.scale).round().max(1.0) as u32
    }
}

/// 目标像素边长：物理尺寸按单位换算（英寸 = size*dpi），否则 base_size*25
pub fn target_pixels(base_size: u32, physical: Option<&PhysicalDimensions>) -> f64 {
    let relative = f64::from(base_size) * PIXELS_PER_SIZE_UNIT;
    let Some(dims) = physical else {
        return relative;
    };
    let dpi = f64::from(dims.dpi);
    match dims.unit {
        PhysicalUnit::In => dims.size * dpi,
        PhysicalUnit::Cm => dims.size / 2.54 * dpi,
        PhysicalUnit::Mm => dims.size / 25.4 * dpi,
        PhysicalUnit::Unknown => relative,
    }
}

/// 计算每模块像素数。范围校验由调用方在此之前完成，这里只保证不出现亚像素模块。
pub fn compute_scale(
    module_count_no_border: u32,
    border: u32,
    base_size: u32,
    physical: Option<&PhysicalDimensions>,
) -> ScaleResult {
    let target_px = target_pixels(base_size, physical);
    let total_modules = module_count_no_border + 2 * border;
    let scale = if total_modules == 0 {
        1.0
    } else {
        (target_px / f64::from(total_modules)).max(1.0)
    };
    ScaleResult {
        scale,
        target_px,
        total_modules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(size: f64, unit: PhysicalUnit, dpi: u32) -> PhysicalDimensions {
        PhysicalDimensions { size, unit, dpi }
    }

    #[test]
    fn inches_centimeters_and_millimeters() {
        assert_eq!(target_pixels(10, Some(&dims(2.0, PhysicalUnit::In, 150))), 300.0);
        assert_eq!(
            target_pixels(10, Some(&dims(2.54, PhysicalUnit::Cm, 300))),
            2.54 / 2.54 * 300.0
        );
        assert_eq!(
            target_pixels(10, Some(&dims(25.4, PhysicalUnit::Mm, 600))),
            25.4 / 25.4 * 600.0
        );
    }

    #[test]
    fn relative_size_and_unknown_unit_fallback() {
        assert_eq!(target_pixels(10, None), 250.0);
        assert_eq!(
            target_pixels(4, Some(&dims(2.0, PhysicalUnit::Unknown, 300))),
            100.0
        );
    }

    #[test]
    fn scale_divides_by_total_modules_including_border() {
        let r = compute_scale(25, 4, 10, Some(&dims(2.0, PhysicalUnit::In, 150)));
        assert_eq!(r.total_modules, 33);
        assert!((r.scale - 300.0 / 33.0).abs() < 1e-9);
        assert_eq!(r.pixel_size(), 300);
    }

    #[test]
    fn scale_never_drops_below_one_pixel() {
        // size=1 → 25px，但 177 模块 + 40 静区
        let r = compute_scale(177, 20, 1, None);
        assert_eq!(r.scale, 1.0);
        assert_eq!(r.pixel_size(), 217);

        let degenerate = compute_scale(1, 0, 1, None);
        assert!(degenerate.scale >= 1.0);
        assert_eq!(degenerate.total_modules, 1);
    }

    #[test]
    fn raster_edge_limit() {
        assert!(ensure_raster_edge(u64::from(MAX_RASTER_EDGE)).is_ok());
        // 100in × 1200dpi
        let r = compute_scale(21, 4, 10, Some(&dims(100.0, PhysicalUnit::In, 1200)));
        assert_eq!(r.pixel_size(), 120_000);
        assert!(matches!(
            ensure_raster_edge(u64::from(r.pixel_size())),
            Err(AppError::Generation(_))
        ));
    }
}
