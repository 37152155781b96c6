use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::features::routing::{CircuitBreakerConfig, RoutingConfig};

/// 全局配置单例
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 未设置时生效）
    pub level: String,
    /// 日志格式：full / compact / pretty
    pub format: String,
}

impl LoggingConfig {
    /// RUST_LOG 缺省时使用的过滤指令
    pub fn filter_directive(&self) -> String {
        format!("qr_backend={}", self.level.trim().to_ascii_lowercase())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "full".to_string(),
        }
    }
}

/// 路由（新旧实现切换）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSection {
    /// 全局开关：是否启用新的生成服务
    #[serde(default, alias = "use-new-service", alias = "useNewService")]
    pub use_new_service: bool,
    /// 是否启用金丝雀测试
    #[serde(default)]
    pub canary_enabled: bool,
    /// 金丝雀流量百分比（0-100）
    #[serde(default = "RoutingSection::default_canary_percentage")]
    pub canary_percentage: u8,
}

impl RoutingSection {
    fn default_canary_percentage() -> u8 {
        0
    }
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            use_new_service: false,
            canary_enabled: false,
            canary_percentage: Self::default_canary_percentage(),
        }
    }
}

/// 熔断器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSection {
    /// 连续失败多少次后打开熔断器
    #[serde(default = "BreakerSection::default_fail_max")]
    pub fail_max: u32,
    /// 打开状态持续多久后允许试探（秒）
    #[serde(default = "BreakerSection::default_reset_timeout")]
    pub reset_timeout_secs: u64,
}

impl BreakerSection {
    fn default_fail_max() -> u32 {
        5
    }
    fn default_reset_timeout() -> u64 {
        60
    }

    /// 获取熔断恢复超时时间
    pub fn reset_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            fail_max: Self::default_fail_max(),
            reset_timeout_secs: Self::default_reset_timeout(),
        }
    }
}

/// 图片渲染配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRenderConfig {
    /// 默认 Logo 资源路径（png/jpeg/webp/svg）
    #[serde(default)]
    pub default_logo_path: Option<String>,
    /// 是否优先速度（Logo 缩放使用 Triangle 而非 Lanczos3，PNG 快速压缩）
    #[serde(default)]
    pub optimize_speed: bool,
    /// 并发渲染许可数（0=自动，取 CPU 核心数）
    #[serde(default)]
    pub max_parallel: u32,
    /// JPEG 默认质量（请求未指定时使用）
    #[serde(default = "ImageRenderConfig::default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// 已解码 Logo 的缓存条目数
    #[serde(default = "ImageRenderConfig::default_logo_cache_capacity")]
    pub logo_cache_capacity: usize,
}

impl ImageRenderConfig {
    fn default_jpeg_quality() -> u8 {
        85
    }
    fn default_logo_cache_capacity() -> usize {
        16
    }

    /// 实际并发许可数
    pub fn parallelism(&self) -> usize {
        match self.max_parallel as usize {
            0 => num_cpus::get(),
            m => m,
        }
    }
}

impl Default for ImageRenderConfig {
    fn default() -> Self {
        Self {
            default_logo_path: None,
            optimize_speed: false,
            max_parallel: 0,
            jpeg_quality: Self::default_jpeg_quality(),
            logo_cache_capacity: Self::default_logo_cache_capacity(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 新旧实现路由配置
    #[serde(default)]
    pub routing: RoutingSection,
    /// 熔断器配置
    #[serde(default)]
    pub breaker: BreakerSection,
    /// 图片渲染配置
    #[serde(default)]
    pub image: ImageRenderConfig,
}

impl AppConfig {
    /// 从配置文件加载配置，支持环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::get_config_path())
    }

    /// 从指定路径加载配置（文件可缺省），例如 APP_ROUTING_CANARY_PERCENTAGE=10
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        tracing::info!("正在从 {:?} 加载配置文件", path);

        let builder = ConfigBuilder::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = builder.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            "配置加载完成: use_new_service={}, canary_enabled={}, canary_percentage={}",
            config.routing.use_new_service,
            config.routing.canary_enabled,
            config.routing.canary_percentage
        );

        Ok(config)
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.logging.level.trim().to_ascii_lowercase();
        if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error" | "off") {
            return Err(ConfigError::Message(format!(
                "logging.level 不支持: {}",
                self.logging.level
            )));
        }
        if !matches!(self.logging.format.as_str(), "full" | "compact" | "pretty") {
            return Err(ConfigError::Message(format!(
                "logging.format 不支持: {}（可选 full/compact/pretty）",
                self.logging.format
            )));
        }
        if self.routing.canary_percentage > 100 {
            return Err(ConfigError::Message(format!(
                "routing.canary_percentage 必须在 0-100 之间，当前为 {}",
                self.routing.canary_percentage
            )));
        }
        if self.breaker.fail_max == 0 {
            return Err(ConfigError::Message(
                "breaker.fail_max 必须大于 0".to_string(),
            ));
        }
        if !(1..=100).contains(&self.image.jpeg_quality) {
            return Err(ConfigError::Message(format!(
                "image.jpeg_quality 必须在 1-100 之间，当前为 {}",
                self.image.jpeg_quality
            )));
        }
        Ok(())
    }

    /// 获取全局配置单例
    pub fn global() -> &'static AppConfig {
        CONFIG.get().expect("配置未初始化，请先调用 init_global()")
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<(), ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(())
    }

    /// 获取配置文件路径
    fn get_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    /// 路由器使用的显式配置（不在路由逻辑内部读取全局状态）
    pub fn routing_config(&self) -> RoutingConfig {
        RoutingConfig {
            use_new_service: self.routing.use_new_service,
            canary_enabled: self.routing.canary_enabled,
            canary_percentage: self.routing.canary_percentage.min(100),
        }
    }

    /// 熔断器的显式配置
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            fail_max: self.breaker.fail_max.max(1),
            reset_timeout: self.breaker.reset_timeout_duration(),
        }
    }

    /// 默认 Logo 路径
    pub fn default_logo_path(&self) -> Option<PathBuf> {
        self.image
            .default_logo_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}
