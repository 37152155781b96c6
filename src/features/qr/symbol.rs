use qrcode::types::QrError;
use qrcode::{EcLevel, QrCode};

use super::types::ErrorCorrection;
use crate::error::AppError;

/// 二维码模块矩阵（不含静区），按行存储，true 表示深色模块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMatrix {
    width: u32,
    modules: Vec<bool>,
}

impl ModuleMatrix {
    /// `modules.len()` 必须等于 `width * width`
    pub fn new(width: u32, modules: Vec<bool>) -> Result<Self, AppError> {
        if modules.len() != (width as usize) * (width as usize) {
            return Err(AppError::Internal(format!(
                "模块矩阵尺寸不匹配: width={width}, modules={}",
                modules.len()
            )));
        }
        Ok(Self { width, modules })
    }

    /// 每边模块数（不含静区）
    pub fn module_count(&self) -> u32 {
        self.width
    }

    pub fn is_dark(&self, x: u32, y: u32) -> bool {
        self.modules[(y * self.width + x) as usize]
    }

    /// 按行迭代
    pub fn rows(&self) -> impl Iterator<Item = &[bool]> {
        self.modules.chunks(self.width.max(1) as usize)
    }

    pub fn modules(&self) -> &[bool] {
        &self.modules
    }
}

/// 符号编码能力（外部协作者）：内容 + 纠错等级 → 模块矩阵
pub trait SymbolEncoder: Send + Sync {
    fn encode(&self, content: &str, level: ErrorCorrection) -> Result<ModuleMatrix, AppError>;
}

/// 基于 `qrcode` crate 的编码实现
#[derive(Debug, Default, Clone, Copy)]
pub struct QrcodeSymbolEncoder;

impl From<ErrorCorrection> for EcLevel {
    fn from(level: ErrorCorrection) -> Self {
        match level {
            ErrorCorrection::L => EcLevel::L,
            ErrorCorrection::M => EcLevel::M,
            ErrorCorrection::Q => EcLevel::Q,
            ErrorCorrection::H => EcLevel::H,
        }
    }
}

impl SymbolEncoder for QrcodeSymbolEncoder {
    fn encode(&self, content: &str, level: ErrorCorrection) -> Result<ModuleMatrix, AppError> {
        let code = QrCode::with_error_correction_level(content.as_bytes(), level.into())
            .map_err(|e| match e {
                // 内容超出该纠错等级的容量属于请求问题，换一条路径也一样失败
                QrError::DataTooLong => AppError::Validation(format!(
                    "内容超出纠错等级 {level:?} 的容量（{} 字节）",
                    content.len()
                )),
                other => AppError::Generation(format!("QR 编码失败: {other}")),
            })?;
        let width = code.width() as u32;
        let modules = code
            .to_colors()
            .into_iter()
            .map(|c| c == qrcode::Color::Dark)
            .collect();
        ModuleMatrix::new(width, modules)
    }
}
