/// 二维码图像渲染
pub mod qr;

/// 新旧生成路径路由
pub mod routing;
