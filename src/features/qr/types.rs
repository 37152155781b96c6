use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::color::RgbaColor;
use crate::error::AppError;

/// 内容最大长度（字符数）
pub const MAX_CONTENT_CHARS: usize = 2048;

/// 纠错等级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ErrorCorrection {
    #[serde(alias = "l")]
    L,
    #[serde(alias = "m")]
    #[default]
    M,
    #[serde(alias = "q")]
    Q,
    #[serde(alias = "h")]
    H,
}

impl FromStr for ErrorCorrection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "L" => Ok(Self::L),
            "M" => Ok(Self::M),
            "Q" => Ok(Self::Q),
            "H" => Ok(Self::H),
            other => Err(AppError::Validation(format!(
                "不支持的纠错等级: {other}（可选 L/M/Q/H）"
            ))),
        }
    }
}

/// 输出图片格式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG（默认，支持透明通道）
    #[default]
    Png,
    /// JPEG（无透明通道，透明区域扁平化到白底）
    #[serde(alias = "jpg")]
    Jpeg,
    /// WebP（未指定质量时使用无损编码）
    Webp,
    /// SVG（矢量，最小化输出）
    Svg,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Svg => "image/svg+xml",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Webp => "webp",
            OutputFormat::Svg => "svg",
        }
    }

    /// 是否支持透明通道（矢量与 PNG 保留透明，JPEG/WebP 回退到白色）
    pub fn honors_transparency(self) -> bool {
        matches!(self, OutputFormat::Png | OutputFormat::Svg)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = AppError;

    /// 大小写不敏感；"jpg" 视为 "jpeg"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            "svg" => Ok(Self::Svg),
            other => Err(AppError::Validation(format!("不支持的输出格式: {other}"))),
        }
    }
}

/// 物理尺寸单位
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhysicalUnit {
    In,
    Cm,
    Mm,
    /// 无法识别的单位：校验阶段拒绝，缩放计算时回退到相对尺寸
    #[serde(other)]
    Unknown,
}

impl PhysicalUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            PhysicalUnit::In => "in",
            PhysicalUnit::Cm => "cm",
            PhysicalUnit::Mm => "mm",
            PhysicalUnit::Unknown => "",
        }
    }
}

impl FromStr for PhysicalUnit {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" => Ok(Self::In),
            "cm" => Ok(Self::Cm),
            "mm" => Ok(Self::Mm),
            other => Err(AppError::Validation(format!(
                "不支持的物理单位: {other}（可选 in/cm/mm）"
            ))),
        }
    }
}

/// 物理尺寸三元组（size, unit, dpi），三者必须同时出现
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalDimensions {
    pub size: f64,
    pub unit: PhysicalUnit,
    pub dpi: u32,
}

/// 二维码生成请求（上游表单层已完成大部分范围校验，这里再做一次防御性校验）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// 编码内容
    pub content: String,
    /// 纠错等级（默认 M）
    #[serde(default)]
    pub error_correction: ErrorCorrection,
    /// 输出格式（默认 png）
    #[serde(default)]
    pub format: OutputFormat,
    /// 静区宽度（模块数）
    #[serde(default = "default_border")]
    pub border: u32,
    /// 相对尺寸（1-500，每单位 25 像素）
    #[serde(default = "default_size")]
    pub size: u32,
    /// 深色模块颜色
    #[serde(default = "default_fill_color")]
    pub fill_color: String,
    /// 背景颜色（可为 transparent/none）
    #[serde(default = "default_back_color")]
    pub back_color: String,
    /// 深色模块覆盖色（优先于 fill_color）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dark_color: Option<String>,
    /// 浅色模块覆盖色（优先于 back_color）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_color: Option<String>,
    /// 是否在中心合成 Logo（仅位图格式）
    #[serde(default)]
    pub include_logo: bool,
    /// SVG 无障碍标题
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svg_title: Option<String>,
    /// SVG 无障碍描述
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svg_description: Option<String>,
    /// 物理尺寸数值（0.1-100）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_size: Option<f64>,
    /// 物理尺寸单位
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_unit: Option<PhysicalUnit>,
    /// 打印分辨率（72-1200）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpi: Option<u32>,
    /// JPEG/WebP 质量（1-100）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

fn default_border() -> u32 {
    4
}

fn default_size() -> u32 {
    10
}

fn default_fill_color() -> String {
    "#000000".to_string()
}

fn default_back_color() -> String {
    "#FFFFFF".to_string()
}

impl GenerationRequest {
    /// 以默认参数构造请求
    pub fn new(content: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            content: content.into(),
            error_correction: ErrorCorrection::default(),
            format,
            border: default_border(),
            size: default_size(),
            fill_color: default_fill_color(),
            back_color: default_back_color(),
            dark_color: None,
            light_color: None,
            include_logo: false,
            svg_title: None,
            svg_description: None,
            physical_size: None,
            physical_unit: None,
            dpi: None,
            quality: None,
        }
    }

    /// 物理尺寸三元组：全部提供时返回 Some，全部缺省时返回 None，部分提供视为校验错误
    pub fn physical(&self) -> Result<Option<PhysicalDimensions>, AppError> {
        match (self.physical_size, self.physical_unit, self.dpi) {
            (Some(size), Some(unit), Some(dpi)) => Ok(Some(PhysicalDimensions { size, unit, dpi })),
            (None, None, None) => Ok(None),
            _ => Err(AppError::Validation(
                "physical_size、physical_unit 与 dpi 必须同时提供".to_string(),
            )),
        }
    }

    /// 校验请求参数。必须在任何编码工作开始前调用。
    pub fn validate(&self) -> Result<(), AppError> {
        let chars = self.content.chars().count();
        if chars == 0 {
            return Err(AppError::Validation("content 不能为空".to_string()));
        }
        if chars > MAX_CONTENT_CHARS {
            return Err(AppError::Validation(format!(
                "content 长度超过上限 {MAX_CONTENT_CHARS}（当前 {chars}）"
            )));
        }
        if !(1..=500).contains(&self.size) {
            return Err(AppError::Validation(format!(
                "size 必须在 1-500 之间，当前为 {}",
                self.size
            )));
        }
        if self.border > 20 {
            return Err(AppError::Validation(format!(
                "border 必须在 0-20 之间，当前为 {}",
                self.border
            )));
        }
        if let Some(q) = self.quality
            && !(1..=100).contains(&q)
        {
            return Err(AppError::Validation(format!(
                "quality 必须在 1-100 之间，当前为 {q}"
            )));
        }

        for (field, value) in [
            ("fill_color", Some(self.fill_color.as_str())),
            ("back_color", Some(self.back_color.as_str())),
            ("dark_color", self.dark_color.as_deref()),
            ("light_color", self.light_color.as_deref()),
        ] {
            if let Some(v) = value {
                RgbaColor::validate_spec(v)
                    .map_err(|e| AppError::Validation(format!("{field}: {e}")))?;
            }
        }

        if let Some(dims) = self.physical()? {
            if dims.unit == PhysicalUnit::Unknown {
                return Err(AppError::Validation(
                    "不支持的物理单位（可选 in/cm/mm）".to_string(),
                ));
            }
            if !(0.1..=100.0).contains(&dims.size) {
                return Err(AppError::Validation(format!(
                    "physical_size 必须在 0.1-100 之间，当前为 {}",
                    dims.size
                )));
            }
            if !(72..=1200).contains(&dims.dpi) {
                return Err(AppError::Validation(format!(
                    "dpi 必须在 72-1200 之间，当前为 {}",
                    dims.dpi
                )));
            }
        }
        Ok(())
    }
}

/// 生成结果：图片字节与对应的 Content-Type
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
}

impl GeneratedImage {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}
