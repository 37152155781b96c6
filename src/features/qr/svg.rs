//! 最小化 SVG 输出：无 XML 声明、无 CSS class、无换行。
//!
//! 尺寸属性始终保留（width/height），浏览器兼容性优先于体积；
//! 物理尺寸请求直接在 width/height 上携带单位（如 `2in`），由 viewBox 负责模块坐标映射。

use std::fmt::Write;

use super::color::{RgbaColor, ResolvedColors, trim_float};
use super::symbol::ModuleMatrix;
use super::types::PhysicalDimensions;

const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";

/// SVG 文档参数
#[derive(Debug, Clone)]
pub struct SvgDocument<'a> {
    /// 每模块的像素数（相对尺寸模式）
    pub scale: f64,
    pub border: u32,
    pub colors: ResolvedColors,
    /// 物理尺寸（存在时 width/height 使用物理单位）
    pub physical: Option<PhysicalDimensions>,
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    /// 是否写出命名空间（Data URI 需要独立可解析的文档）
    pub with_namespace: bool,
}

impl SvgDocument<'_> {
    pub fn render(&self, matrix: &ModuleMatrix) -> String {
        let n = matrix.module_count() + 2 * self.border;
        let mut out = String::with_capacity(256 + matrix.modules().len() / 2);

        out.push_str("<svg");
        if self.with_namespace {
            let _ = write!(out, " xmlns=\"{SVG_NAMESPACE}\"");
        }
        let (width, height) = match &self.physical {
            Some(dims) => {
                let v = format!("{}{}", trim_float(dims.size, 4), dims.unit.as_str());
                (v.clone(), v)
            }
            None => {
                let v = trim_float(f64::from(n) * self.scale, 2);
                (v.clone(), v)
            }
        };
        let _ = write!(
            out,
            " width=\"{width}\" height=\"{height}\" viewBox=\"0 0 {n} {n}\" shape-rendering=\"crispEdges\">"
        );

        if let Some(title) = self.title.filter(|t| !t.is_empty()) {
            let _ = write!(out, "<title>{}</title>", escape_xml(title));
        }
        if let Some(desc) = self.description.filter(|d| !d.is_empty()) {
            let _ = write!(out, "<desc>{}</desc>", escape_xml(desc));
        }

        if let Some(light) = self.colors.light {
            out.push_str("<path ");
            light.write_svg_paint(&mut out, "fill");
            let _ = write!(out, " d=\"M0 0h{n}v{n}h-{n}z\"/>");
        }
        if let Some(dark) = self.colors.dark {
            write_dark_path(&mut out, matrix, self.border, dark);
        }
        out.push_str("</svg>");
        out
    }
}

/// 深色模块按行合并为水平矩形段，写成单个 path
fn write_dark_path(out: &mut String, matrix: &ModuleMatrix, border: u32, dark: RgbaColor) {
    let mut d = String::new();
    for (y, row) in matrix.rows().enumerate() {
        let y = y as u32 + border;
        let mut x = 0usize;
        while x < row.len() {
            if !row[x] {
                x += 1;
                continue;
            }
            let start = x;
            while x < row.len() && row[x] {
                x += 1;
            }
            let len = x - start;
            let _ = write!(d, "M{} {y}h{len}v1h-{len}z", start as u32 + border);
        }
    }
    if d.is_empty() {
        return;
    }
    out.push_str("<path ");
    dark.write_svg_paint(out, "fill");
    let _ = write!(out, " d=\"{d}\"/>");
}

/// SVG Data URI：双引号替换为单引号后做百分号编码（非 base64），附带 charset
pub fn svg_data_uri(svg: &str) -> String {
    let swapped = svg.replace('"', "'");
    format!("data:image/svg+xml;charset=utf-8,{}", percent_encode(&swapped))
}

/// 除 RFC 3986 非保留字符外全部编码（UTF-8 字节逐个编码）
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3 / 2);
    for b in input.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::qr::types::PhysicalUnit;

    fn tiny_matrix() -> ModuleMatrix {
        // 1 0 1
        // 1 1 0
        // 0 0 0
        ModuleMatrix::new(
            3,
            vec![true, false, true, true, true, false, false, false, false],
        )
        .unwrap()
    }

    fn doc<'a>() -> SvgDocument<'a> {
        SvgDocument {
            scale: 10.0,
            border: 1,
            colors: ResolvedColors {
                dark: Some(RgbaColor::BLACK),
                light: Some(RgbaColor::WHITE),
            },
            physical: None,
            title: None,
            description: None,
            with_namespace: false,
        }
    }

    #[test]
    fn minimal_document_keeps_size_attributes() {
        let svg = doc().render(&tiny_matrix());
        assert_eq!(
            svg,
            "<svg width=\"50\" height=\"50\" viewBox=\"0 0 5 5\" shape-rendering=\"crispEdges\">\
<path fill=\"#ffffff\" d=\"M0 0h5v5h-5z\"/>\
<path fill=\"#000000\" d=\"M1 1h1v1h-1zM3 1h1v1h-1zM1 2h2v1h-2z\"/></svg>"
        );
        assert!(!svg.contains("<?xml"));
        assert!(!svg.contains("xmlns"));
        assert!(!svg.contains("class="));
        assert!(!svg.contains('\n'));
    }

    #[test]
    fn physical_size_uses_units_on_width_and_height() {
        let mut d = doc();
        d.physical = Some(PhysicalDimensions {
            size: 2.0,
            unit: PhysicalUnit::In,
            dpi: 150,
        });
        let svg = d.render(&tiny_matrix());
        assert!(svg.starts_with("<svg width=\"2in\" height=\"2in\" viewBox=\"0 0 5 5\""));
    }

    #[test]
    fn accessibility_elements_are_escaped() {
        let mut d = doc();
        d.title = Some("Menu & Prices");
        d.description = Some("<b>scan</b>");
        let svg = d.render(&tiny_matrix());
        assert!(svg.contains("<title>Menu &amp; Prices</title>"));
        assert!(svg.contains("<desc>&lt;b&gt;scan&lt;/b&gt;</desc>"));
    }

    #[test]
    fn transparent_background_has_no_background_path() {
        let mut d = doc();
        d.colors.light = None;
        let svg = d.render(&tiny_matrix());
        assert!(!svg.contains("M0 0h5v5h-5z"));
    }

    #[test]
    fn data_uri_is_percent_encoded_utf8() {
        let uri = svg_data_uri("<svg width=\"1\">é</svg>");
        assert_eq!(
            uri,
            "data:image/svg+xml;charset=utf-8,%3Csvg%20width%3D%271%27%3E%C3%A9%3C%2Fsvg%3E"
        );
    }
}
