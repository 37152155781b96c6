//! 二维码图像渲染：尺寸换算、颜色解析、矢量/位图输出与 Logo 合成。

pub mod color;
pub mod encode;
pub mod formatter;
pub mod generator;
pub mod logo;
pub mod scale;
pub mod svg;
pub mod symbol;
pub mod types;

pub use color::{ResolvedColors, RgbaColor, effective_color, resolve_transparency};
pub use formatter::{FormatterOptions, ImageFormatter};
pub use generator::{LegacyGenerator, PipelineGenerator, QrGenerator};
pub use logo::LogoLoader;
pub use scale::{ScaleResult, compute_scale, target_pixels};
pub use symbol::{ModuleMatrix, QrcodeSymbolEncoder, SymbolEncoder};
pub use types::{
    ErrorCorrection, GeneratedImage, GenerationRequest, OutputFormat, PhysicalDimensions,
    PhysicalUnit,
};
