use base64::{Engine as _, engine::general_purpose::STANDARD as base64_engine};
use image::RgbaImage;
use image::imageops::FilterType;
use tiny_skia::{Color, Paint, Pixmap, Rect, Transform};
use std::sync::Arc;
use std::time::Instant;

use super::color::{ResolvedColors, RgbaColor};
use super::encode::{encode_jpeg, encode_png, encode_webp, pixmap_to_rgba};
use super::logo::{LogoLoader, composite_logo};
use super::scale::{ScaleResult, compute_scale, ensure_raster_edge};
use super::svg::{SvgDocument, svg_data_uri};
use super::symbol::ModuleMatrix;
use super::types::{GeneratedImage, GenerationRequest, OutputFormat};
use crate::error::AppError;

/// 渲染选项（来自配置）
#[derive(Debug, Clone)]
pub struct FormatterOptions {
    /// 速度优先：Logo 使用 Triangle 缩放、PNG 快速压缩
    pub optimize_speed: bool,
    /// 请求未指定质量时的 JPEG 质量
    pub jpeg_quality: u8,
}

impl Default for FormatterOptions {
    fn default() -> Self {
        Self {
            optimize_speed: false,
            jpeg_quality: 85,
        }
    }
}

/// 图像格式化器：矢量 / 位图两条分支只由请求格式决定，调用之间不共享可变状态（Logo 缓存除外）
pub struct ImageFormatter {
    logos: Arc<LogoLoader>,
    options: FormatterOptions,
}

impl ImageFormatter {
    pub fn new(logos: Arc<LogoLoader>, options: FormatterOptions) -> Self {
        Self { logos, options }
    }

    /// 按请求格式生成图片
    pub fn render(
        &self,
        matrix: &ModuleMatrix,
        req: &GenerationRequest,
    ) -> Result<GeneratedImage, AppError> {
        let bytes = match req.format {
            OutputFormat::Svg => self.render_svg(matrix, req, false)?.into_bytes(),
            raster => self.render_raster(matrix, req, raster)?,
        };
        Ok(GeneratedImage {
            bytes,
            format: req.format,
        })
    }

    /// 内联 SVG 字符串（与主路径一致，不含命名空间）
    pub fn svg_inline(&self, matrix: &ModuleMatrix, req: &GenerationRequest) -> Result<String, AppError> {
        self.render_svg(matrix, req, false)
    }

    /// SVG Data URI（百分号编码，含命名空间以便独立解析）
    pub fn svg_data_uri(&self, matrix: &ModuleMatrix, req: &GenerationRequest) -> Result<String, AppError> {
        Ok(svg_data_uri(&self.render_svg(matrix, req, true)?))
    }

    /// PNG Data URI（base64）
    pub fn png_data_uri(&self, matrix: &ModuleMatrix, req: &GenerationRequest) -> Result<String, AppError> {
        let bytes = self.render_raster(matrix, req, OutputFormat::Png)?;
        Ok(format!("data:image/png;base64,{}", base64_engine.encode(bytes)))
    }

    fn render_svg(
        &self,
        matrix: &ModuleMatrix,
        req: &GenerationRequest,
        with_namespace: bool,
    ) -> Result<String, AppError> {
        let physical = req.physical()?;
        let scale = compute_scale(matrix.module_count(), req.border, req.size, physical.as_ref());
        let colors = ResolvedColors::resolve(req, OutputFormat::Svg)?;
        let doc = SvgDocument {
            scale: scale.scale,
            border: req.border,
            colors,
            physical,
            title: req.svg_title.as_deref(),
            description: req.svg_description.as_deref(),
            with_namespace,
        };
        Ok(doc.render(matrix))
    }

    fn render_raster(
        &self,
        matrix: &ModuleMatrix,
        req: &GenerationRequest,
        format: OutputFormat,
    ) -> Result<Vec<u8>, AppError> {
        let t0 = Instant::now();
        let physical = req.physical()?;
        let scale = compute_scale(matrix.module_count(), req.border, req.size, physical.as_ref());
        let colors = ResolvedColors::resolve(req, format)?;
        ensure_raster_edge(u64::from(scale.pixel_size()))?;

        let mut img = paint_modules(matrix, req.border, &scale, &colors)?;
        let t_paint = t0.elapsed();

        if req.include_logo {
            match self.logos.load_default() {
                Some(logo) => composite_logo(&mut img, &logo, self.logo_filter()),
                None => tracing::warn!(
                    "请求包含 Logo，但默认 Logo 不可用（{:?}），返回无 Logo 图片",
                    self.logos.default_path()
                ),
            }
        }

        let out = match format {
            OutputFormat::Png => {
                encode_png(&img, physical.map(|d| d.dpi), self.options.optimize_speed)?
            }
            OutputFormat::Jpeg => {
                encode_jpeg(&img, req.quality.unwrap_or(self.options.jpeg_quality))?
            }
            OutputFormat::Webp => encode_webp(&img, req.quality)?,
            OutputFormat::Svg => {
                return Err(AppError::Internal("SVG 不走位图分支".to_string()));
            }
        };

        tracing::debug!(
            "QR 位图渲染: format={}, {}px, scale={:.3}, 绘制={:?}, 总计={:?}",
            format,
            img.width(),
            scale.scale,
            t_paint,
            t0.elapsed()
        );
        Ok(out)
    }

    fn logo_filter(&self) -> FilterType {
        if self.options.optimize_speed {
            FilterType::Triangle
        } else {
            FilterType::Lanczos3
        }
    }
}

/// 用 tiny-skia 绘制模块：关闭抗锯齿，模块边界对齐到整数像素，相邻模块之间无缝隙
fn paint_modules(
    matrix: &ModuleMatrix,
    border: u32,
    scale: &ScaleResult,
    colors: &ResolvedColors,
) -> Result<RgbaImage, AppError> {
    let size = scale.pixel_size();
    let mut pixmap = Pixmap::new(size, size)
        .ok_or_else(|| AppError::Generation(format!("无法创建 {size}x{size} 画布")))?;

    match colors.light {
        Some(light) => pixmap.fill(to_skia(light)),
        None => pixmap.fill(Color::TRANSPARENT),
    }

    if let Some(dark) = colors.dark {
        let mut paint = Paint::default();
        paint.set_color_rgba8(dark.r, dark.g, dark.b, dark.a);
        paint.anti_alias = false;

        let edge = |i: u32| -> f32 { (f64::from(i + border) * scale.scale).round() as f32 };
        for (y, row) in matrix.rows().enumerate() {
            let y = y as u32;
            let (top, bottom) = (edge(y), edge(y + 1));
            let mut x = 0usize;
            while x < row.len() {
                if !row[x] {
                    x += 1;
                    continue;
                }
                let start = x as u32;
                while x < row.len() && row[x] {
                    x += 1;
                }
                let (left, right) = (edge(start), edge(x as u32));
                if let Some(rect) = Rect::from_ltrb(left, top, right, bottom) {
                    pixmap.fill_rect(rect, &paint, Transform::identity(), None);
                }
            }
        }
    }

    pixmap_to_rgba(&pixmap)
}

fn to_skia(c: RgbaColor) -> Color {
    Color::from_rgba8(c.r, c.g, c.b, c.a)
}
