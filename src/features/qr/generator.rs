use image::Rgba;
use image::imageops::FilterType;
use qrcode::render::{Renderer, svg};
use std::sync::Arc;

use super::color::{ResolvedColors, effective_color, resolve_transparency};
use super::encode::{encode_jpeg, encode_png, encode_webp};
use super::formatter::ImageFormatter;
use super::logo::{LogoLoader, composite_logo};
use super::scale::{compute_scale, ensure_raster_edge};
use super::symbol::{ModuleMatrix, SymbolEncoder};
use super::types::{GeneratedImage, GenerationRequest, OutputFormat};
use crate::error::AppError;

/// 一种二维码生成实现（新/旧路径各一个）
pub trait QrGenerator: Send + Sync {
    /// 用于日志与指标的名称
    fn name(&self) -> &'static str;

    fn generate(&self, req: &GenerationRequest) -> Result<GeneratedImage, AppError>;
}

/// 新实现：按物理尺寸精确缩放、支持透明色/Logo/无障碍信息的渲染管线
pub struct PipelineGenerator {
    encoder: Arc<dyn SymbolEncoder>,
    formatter: ImageFormatter,
}

impl PipelineGenerator {
    pub fn new(encoder: Arc<dyn SymbolEncoder>, formatter: ImageFormatter) -> Self {
        Self { encoder, formatter }
    }

    pub fn formatter(&self) -> &ImageFormatter {
        &self.formatter
    }

    /// 校验并编码，供主输出与辅助输出共用
    pub fn encode(&self, req: &GenerationRequest) -> Result<ModuleMatrix, AppError> {
        req.validate()?;
        self.encoder.encode(&req.content, req.error_correction)
    }

    pub fn png_data_uri(&self, req: &GenerationRequest) -> Result<String, AppError> {
        let matrix = self.encode(req)?;
        self.formatter.png_data_uri(&matrix, req)
    }

    pub fn svg_data_uri(&self, req: &GenerationRequest) -> Result<String, AppError> {
        let matrix = self.encode(req)?;
        self.formatter.svg_data_uri(&matrix, req)
    }

    pub fn svg_inline(&self, req: &GenerationRequest) -> Result<String, AppError> {
        let matrix = self.encode(req)?;
        self.formatter.svg_inline(&matrix, req)
    }
}

impl QrGenerator for PipelineGenerator {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    fn generate(&self, req: &GenerationRequest) -> Result<GeneratedImage, AppError> {
        let matrix = self.encode(req)?;
        self.formatter.render(&matrix, req)
    }
}

/// 旧实现：直接使用 qrcode 自带的渲染器，模块尺寸取整数像素，不支持物理单位与无障碍信息
pub struct LegacyGenerator {
    encoder: Arc<dyn SymbolEncoder>,
    logos: Arc<LogoLoader>,
    jpeg_quality: u8,
}

impl LegacyGenerator {
    pub fn new(encoder: Arc<dyn SymbolEncoder>, logos: Arc<LogoLoader>, jpeg_quality: u8) -> Self {
        Self {
            encoder,
            logos,
            jpeg_quality,
        }
    }

    /// 每模块整数像素（四舍五入，至少 1）
    fn module_pixels(matrix: &ModuleMatrix, req: &GenerationRequest) -> Result<u32, AppError> {
        let physical = req.physical()?;
        let scale = compute_scale(matrix.module_count(), req.border, req.size, physical.as_ref());
        Ok((scale.scale.round() as u32).max(1))
    }

    fn render_svg(&self, matrix: &ModuleMatrix, req: &GenerationRequest) -> Result<String, AppError> {
        let px = Self::module_pixels(matrix, req)?;
        let dark = resolve_transparency(
            effective_color(&req.fill_color, req.dark_color.as_deref()),
            OutputFormat::Svg,
        )
        .unwrap_or_else(|| "none".to_string());
        let light = resolve_transparency(
            effective_color(&req.back_color, req.light_color.as_deref()),
            OutputFormat::Svg,
        )
        .unwrap_or_else(|| "none".to_string());

        let colors = to_qr_colors(matrix);
        let svg = Renderer::<svg::Color>::new(&colors, matrix.module_count() as usize, req.border)
            .quiet_zone(req.border > 0)
            .module_dimensions(px, px)
            .dark_color(svg::Color(&dark))
            .light_color(svg::Color(&light))
            .build();
        Ok(svg)
    }

    fn render_raster(
        &self,
        matrix: &ModuleMatrix,
        req: &GenerationRequest,
    ) -> Result<Vec<u8>, AppError> {
        let px = Self::module_pixels(matrix, req)?;
        let edge = u64::from(matrix.module_count() + 2 * req.border) * u64::from(px);
        ensure_raster_edge(edge)?;
        let resolved = ResolvedColors::resolve(req, req.format)?;
        let to_px = |c: Option<super::color::RgbaColor>| match c {
            Some(c) => Rgba([c.r, c.g, c.b, c.a]),
            None => Rgba([0, 0, 0, 0]),
        };

        let colors = to_qr_colors(matrix);
        let mut img = Renderer::<Rgba<u8>>::new(&colors, matrix.module_count() as usize, req.border)
            .quiet_zone(req.border > 0)
            .module_dimensions(px, px)
            .dark_color(to_px(resolved.dark))
            .light_color(to_px(resolved.light))
            .build();

        if req.include_logo
            && let Some(logo) = self.logos.load_default()
        {
            composite_logo(&mut img, &logo, FilterType::Lanczos3);
        }

        match req.format {
            OutputFormat::Png => encode_png(&img, req.dpi, false),
            OutputFormat::Jpeg => encode_jpeg(&img, req.quality.unwrap_or(self.jpeg_quality)),
            OutputFormat::Webp => encode_webp(&img, req.quality),
            OutputFormat::Svg => Err(AppError::Internal("SVG 不走位图分支".to_string())),
        }
    }
}

impl QrGenerator for LegacyGenerator {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn generate(&self, req: &GenerationRequest) -> Result<GeneratedImage, AppError> {
        req.validate()?;
        let matrix = self.encoder.encode(&req.content, req.error_correction)?;
        let bytes = match req.format {
            OutputFormat::Svg => self.render_svg(&matrix, req)?.into_bytes(),
            _ => self.render_raster(&matrix, req)?,
        };
        Ok(GeneratedImage {
            bytes,
            format: req.format,
        })
    }
}

fn to_qr_colors(matrix: &ModuleMatrix) -> Vec<qrcode::Color> {
    matrix
        .modules()
        .iter()
        .map(|dark| {
            if *dark {
                qrcode::Color::Dark
            } else {
                qrcode::Color::Light
            }
        })
        .collect()
}
