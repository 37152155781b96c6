use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::features::qr::{
    FormatterOptions, GeneratedImage, GenerationRequest, ImageFormatter, LegacyGenerator,
    LogoLoader, PipelineGenerator, QrcodeSymbolEncoder, SymbolEncoder,
};
use crate::features::routing::{
    CircuitBreaker, GenerationRouter, MetricsFacadeRecorder, MetricsRecorder,
};

/// 熔断器保护的操作名
pub const NEW_PATH_OPERATION: &str = "new-path QR generation";

/// 聚合的应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<GenerationRouter>,
    /// 控制并发渲染的信号量（限制 CPU 密集型任务数量）
    pub render_semaphore: Arc<Semaphore>,
}

impl AppState {
    /// 按配置装配两条生成路径、熔断器与路由器（进程内各一份）
    pub fn from_config(config: &AppConfig) -> Self {
        let metrics: Arc<dyn MetricsRecorder> = Arc::new(MetricsFacadeRecorder);
        let encoder: Arc<dyn SymbolEncoder> = Arc::new(QrcodeSymbolEncoder);
        let logos = Arc::new(LogoLoader::new(
            config.default_logo_path(),
            config.image.logo_cache_capacity,
        ));

        let formatter = ImageFormatter::new(
            logos.clone(),
            FormatterOptions {
                optimize_speed: config.image.optimize_speed,
                jpeg_quality: config.image.jpeg_quality,
            },
        );
        let pipeline = Arc::new(PipelineGenerator::new(encoder.clone(), formatter));
        let legacy = Arc::new(LegacyGenerator::new(
            encoder,
            logos,
            config.image.jpeg_quality,
        ));
        let breaker = Arc::new(
            CircuitBreaker::new(NEW_PATH_OPERATION, config.breaker_config())
                .with_observer(metrics.clone()),
        );

        let router = GenerationRouter::new(
            config.routing_config(),
            breaker,
            pipeline.clone(),
            legacy,
            pipeline,
        )
        .with_metrics(metrics);

        let permits = config.image.parallelism();
        tracing::info!(
            "QR 生成状态就绪: use_new_service={}, canary={}({}%), 并发许可={}",
            config.routing.use_new_service,
            config.routing.canary_enabled,
            config.routing.canary_percentage,
            permits
        );

        Self {
            router: Arc::new(router),
            render_semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    /// 异步生成：先获取渲染许可，再把编码移出 tokio worker
    pub async fn generate_async(
        &self,
        req: GenerationRequest,
        identifier: Option<String>,
    ) -> Result<GeneratedImage, AppError> {
        let _permit = self
            .render_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| AppError::Internal(format!("获取渲染信号量失败: {e}")))?;

        let router = self.router.clone();
        tokio::task::spawn_blocking(move || router.generate(&req, identifier.as_deref()))
            .await
            .map_err(|e| AppError::Internal(format!("阻塞 QR 生成任务执行失败: {e}")))?
    }
}
