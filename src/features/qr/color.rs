//! 模块颜色解析：覆盖色优先、按输出格式处理透明色。

use std::fmt::Write;

use super::types::{GenerationRequest, OutputFormat};
use crate::error::AppError;

/// 不支持透明通道的格式使用的回退颜色
pub const OPAQUE_FALLBACK: &str = "#FFFFFF";

/// 8 位 RGBA 颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbaColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl RgbaColor {
    pub const WHITE: RgbaColor = RgbaColor::rgb(0xFF, 0xFF, 0xFF);
    pub const BLACK: RgbaColor = RgbaColor::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xFF }
    }

    /// 解析 `#RRGGBB` 或 `#RRGGBBAA`
    pub fn parse(input: &str) -> Result<Self, String> {
        let hex = input
            .strip_prefix('#')
            .ok_or_else(|| format!("颜色必须以 # 开头: {input}"))?;
        if !(hex.len() == 6 || hex.len() == 8) || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("非法的十六进制颜色: {input}"));
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
        let parsed = (|| -> Result<Self, std::num::ParseIntError> {
            Ok(Self {
                r: channel(0)?,
                g: channel(2)?,
                b: channel(4)?,
                a: if hex.len() == 8 { channel(6)? } else { 0xFF },
            })
        })();
        parsed.map_err(|e| format!("非法的十六进制颜色 {input}: {e}"))
    }

    /// 校验颜色字符串：十六进制颜色或 transparent/none
    pub fn validate_spec(input: &str) -> Result<(), String> {
        if is_transparent(input) {
            return Ok(());
        }
        Self::parse(input).map(|_| ())
    }

    pub fn is_opaque(&self) -> bool {
        self.a == 0xFF
    }

    /// `#rrggbb`（不含透明度）
    pub fn to_hex_rgb(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// 写出 SVG 属性，例如 `fill="#000000"`；带透明度时附加 `fill-opacity`
    pub fn write_svg_paint(&self, out: &mut String, attr: &str) {
        let _ = write!(out, "{attr}=\"{}\"", self.to_hex_rgb());
        if !self.is_opaque() {
            let opacity = f64::from(self.a) / 255.0;
            let _ = write!(out, " {attr}-opacity=\"{}\"", trim_float(opacity, 3));
        }
    }
}

/// 是否为透明色关键字
pub fn is_transparent(color: &str) -> bool {
    let c = color.trim();
    c.eq_ignore_ascii_case("transparent") || c.eq_ignore_ascii_case("none")
}

/// 覆盖色存在时优先使用覆盖色，否则使用基础色
pub fn effective_color<'a>(base: &'a str, override_color: Option<&'a str>) -> &'a str {
    override_color.unwrap_or(base)
}

/// 按格式处理透明色：
/// - png/svg：透明 → None（不绘制）
/// - jpeg/webp：透明 → 白色
/// - 其他颜色原样返回
pub fn resolve_transparency(color: &str, format: OutputFormat) -> Option<String> {
    if !is_transparent(color) {
        return Some(color.to_string());
    }
    if format.honors_transparency() {
        None
    } else {
        Some(OPAQUE_FALLBACK.to_string())
    }
}

/// 一次请求最终使用的深/浅色（None 表示透明，不绘制）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedColors {
    pub dark: Option<RgbaColor>,
    pub light: Option<RgbaColor>,
}

impl ResolvedColors {
    /// 覆盖色 → 透明处理 → 解析，深浅色分别独立处理
    pub fn resolve(req: &GenerationRequest, format: OutputFormat) -> Result<Self, AppError> {
        let resolve_one = |base: &str, over: Option<&str>| -> Result<Option<RgbaColor>, AppError> {
            let color = effective_color(base, over);
            resolve_transparency(color, format)
                .map(|c| RgbaColor::parse(&c).map_err(AppError::Validation))
                .transpose()
        };
        Ok(Self {
            dark: resolve_one(&req.fill_color, req.dark_color.as_deref())?,
            light: resolve_one(&req.back_color, req.light_color.as_deref())?,
        })
    }
}

/// 去掉浮点数末尾多余的 0，用于压缩 SVG 输出
pub(crate) fn trim_float(value: f64, precision: usize) -> String {
    let s = format!("{value:.precision$}");
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}
