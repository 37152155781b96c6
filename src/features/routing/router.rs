use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use super::canary::{RoutingConfig, RoutingDecision, decide};
use super::circuit_breaker::CircuitBreaker;
use super::metrics::{GenerationPath, MetricsRecorder, NoopMetrics};
use crate::error::AppError;
use crate::features::qr::{GeneratedImage, GenerationRequest, PipelineGenerator, QrGenerator};

/// 新/旧两条生成路径之间的路由器。
///
/// - 全局开关关闭：只走旧路径，不经过熔断器
/// - 选中新路径：经熔断器调用；熔断打开或任何失败都回退到旧路径
/// - 直接选中旧路径：其错误原样返回
pub struct GenerationRouter {
    config: RoutingConfig,
    breaker: Arc<CircuitBreaker>,
    new_path: Arc<dyn QrGenerator>,
    legacy_path: Arc<dyn QrGenerator>,
    auxiliary: Arc<PipelineGenerator>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl GenerationRouter {
    pub fn new(
        config: RoutingConfig,
        breaker: Arc<CircuitBreaker>,
        new_path: Arc<dyn QrGenerator>,
        legacy_path: Arc<dyn QrGenerator>,
        auxiliary: Arc<PipelineGenerator>,
    ) -> Self {
        Self {
            config,
            breaker,
            new_path,
            legacy_path,
            auxiliary,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn decide(&self, identifier: Option<&str>) -> RoutingDecision {
        decide(&self.config, identifier)
    }

    /// 生成图片字节。校验失败在任何路由之前返回，不计入熔断器。
    pub fn generate(
        &self,
        req: &GenerationRequest,
        identifier: Option<&str>,
    ) -> Result<GeneratedImage, AppError> {
        req.validate()?;

        let decision = self.decide(identifier);
        debug!(
            "QR 路由决策: new_path={}, reason={:?}, format={}",
            decision.use_new_path, decision.reason, req.format
        );
        if !decision.use_new_path {
            return self.run_legacy(req);
        }

        self.metrics.record_path(GenerationPath::New);
        let t0 = Instant::now();
        let result = self.breaker.call(|| self.invoke_new_path(req));
        match result {
            Ok(image) => {
                self.metrics.record_latency(GenerationPath::New, t0.elapsed());
                self.metrics.record_outcome(GenerationPath::New, true);
                Ok(image)
            }
            Err(err) => {
                let reason = match err {
                    AppError::BreakerOpen(_) => "breaker_open",
                    _ => {
                        self.metrics.record_latency(GenerationPath::New, t0.elapsed());
                        "new_path_error"
                    }
                };
                warn!(
                    "新生成路径 {} 失败（{}），回退到 {}: {}",
                    self.new_path.name(),
                    reason,
                    self.legacy_path.name(),
                    err
                );
                self.metrics.record_outcome(GenerationPath::New, false);
                self.metrics.record_fallback(reason);
                self.run_legacy(req)
            }
        }
    }

    /// 预校验调用点使用：错误只记录日志
    pub fn try_generate(
        &self,
        req: &GenerationRequest,
        identifier: Option<&str>,
    ) -> Option<GeneratedImage> {
        match self.generate(req, identifier) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!("QR 预生成失败（已忽略）: {e}");
                None
            }
        }
    }

    /// PNG Data URI；直接调用新实现，错误不回退
    pub fn png_data_uri(&self, req: &GenerationRequest) -> Result<String, AppError> {
        self.auxiliary.png_data_uri(req)
    }

    pub fn svg_data_uri(&self, req: &GenerationRequest) -> Result<String, AppError> {
        self.auxiliary.svg_data_uri(req)
    }

    pub fn svg_inline(&self, req: &GenerationRequest) -> Result<String, AppError> {
        self.auxiliary.svg_inline(req)
    }

    fn invoke_new_path(&self, req: &GenerationRequest) -> Result<GeneratedImage, AppError> {
        catch_unwind(AssertUnwindSafe(|| self.new_path.generate(req))).unwrap_or_else(|payload| {
            Err(AppError::Generation(format!(
                "{} panic: {}",
                self.new_path.name(),
                panic_message(payload.as_ref())
            )))
        })
    }

    fn run_legacy(&self, req: &GenerationRequest) -> Result<GeneratedImage, AppError> {
        self.metrics.record_path(GenerationPath::Legacy);
        let t0 = Instant::now();
        let result = self.legacy_path.generate(req);
        self.metrics
            .record_latency(GenerationPath::Legacy, t0.elapsed());
        self.metrics
            .record_outcome(GenerationPath::Legacy, result.is_ok());
        if let Err(e) = &result {
            error!("旧生成路径 {} 失败: {e}", self.legacy_path.name());
        }
        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::qr::{
        FormatterOptions, ImageFormatter, LogoLoader, OutputFormat, QrcodeSymbolEncoder,
    };
    use crate::features::routing::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::features::routing::metrics::tests::RecordingMetrics;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    enum Behavior {
        Succeed,
        Fail,
        Panic,
    }

    struct StubGenerator {
        name: &'static str,
        behavior: Behavior,
        calls: AtomicU32,
    }

    impl StubGenerator {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl QrGenerator for StubGenerator {
        fn name(&self) -> &'static str {
            self.name
        }

        fn generate(&self, req: &GenerationRequest) -> Result<GeneratedImage, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(GeneratedImage {
                    bytes: self.name.as_bytes().to_vec(),
                    format: req.format,
                }),
                Behavior::Fail => Err(AppError::Generation(format!("{} 失败", self.name))),
                Behavior::Panic => panic!("{} exploded", self.name),
            }
        }
    }

    fn pipeline() -> Arc<PipelineGenerator> {
        Arc::new(PipelineGenerator::new(
            Arc::new(QrcodeSymbolEncoder),
            ImageFormatter::new(Arc::new(LogoLoader::new(None, 2)), FormatterOptions::default()),
        ))
    }

    fn flag_on() -> RoutingConfig {
        RoutingConfig {
            use_new_service: true,
            canary_enabled: false,
            canary_percentage: 0,
        }
    }

    fn router(
        config: RoutingConfig,
        fail_max: u32,
        new_path: Arc<StubGenerator>,
        legacy: Arc<StubGenerator>,
    ) -> GenerationRouter {
        let breaker = CircuitBreaker::new(
            "router-test",
            CircuitBreakerConfig {
                fail_max,
                reset_timeout: Duration::from_secs(60),
            },
        );
        GenerationRouter::new(config, Arc::new(breaker), new_path, legacy, pipeline())
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("hello", OutputFormat::Png)
    }

    #[test]
    fn flag_off_uses_legacy_without_breaker() {
        let new_path = StubGenerator::new("new", Behavior::Succeed);
        let legacy = StubGenerator::new("legacy", Behavior::Succeed);
        let r = router(RoutingConfig::default(), 1, new_path.clone(), legacy.clone());

        let out = r.generate(&request(), Some("id")).unwrap();
        assert_eq!(out.bytes, b"legacy");
        assert_eq!(new_path.calls(), 0);
        assert_eq!(r.breaker().stats().total_successes, 0);
    }

    #[test]
    fn new_path_success_skips_legacy() {
        let new_path = StubGenerator::new("new", Behavior::Succeed);
        let legacy = StubGenerator::new("legacy", Behavior::Succeed);
        let metrics = Arc::new(RecordingMetrics::default());
        let r = router(flag_on(), 3, new_path.clone(), legacy.clone()).with_metrics(metrics.clone());

        let out = r.generate(&request(), None).unwrap();
        assert_eq!(out.bytes, b"new");
        assert_eq!(legacy.calls(), 0);
        assert_eq!(
            metrics.outcomes.lock().unwrap().as_slice(),
            &[(GenerationPath::New, true)]
        );
    }

    #[test]
    fn new_path_failure_falls_back_and_is_recorded() {
        let new_path = StubGenerator::new("new", Behavior::Fail);
        let legacy = StubGenerator::new("legacy", Behavior::Succeed);
        let metrics = Arc::new(RecordingMetrics::default());
        let r = router(flag_on(), 3, new_path, legacy.clone()).with_metrics(metrics.clone());

        let out = r.generate(&request(), None).unwrap();
        assert_eq!(out.bytes, b"legacy");
        assert_eq!(r.breaker().consecutive_failures(), 1);
        assert_eq!(metrics.fallbacks.lock().unwrap().as_slice(), &["new_path_error"]);
        assert_eq!(
            metrics.outcomes.lock().unwrap().as_slice(),
            &[(GenerationPath::New, false), (GenerationPath::Legacy, true)]
        );
    }

    #[test]
    fn open_breaker_skips_new_path_entirely() {
        let new_path = StubGenerator::new("new", Behavior::Fail);
        let legacy = StubGenerator::new("legacy", Behavior::Succeed);
        let metrics = Arc::new(RecordingMetrics::default());
        let r = router(flag_on(), 2, new_path.clone(), legacy.clone()).with_metrics(metrics.clone());

        for _ in 0..5 {
            assert_eq!(r.generate(&request(), None).unwrap().bytes, b"legacy");
        }
        assert_eq!(new_path.calls(), 2);
        assert_eq!(legacy.calls(), 5);
        assert_eq!(r.breaker().state(), CircuitState::Open);
        let fallbacks = metrics.fallbacks.lock().unwrap().clone();
        assert_eq!(fallbacks.iter().filter(|r| *r == "breaker_open").count(), 3);
    }

    #[test]
    fn panic_in_new_path_counts_as_failure() {
        let new_path = StubGenerator::new("new", Behavior::Panic);
        let legacy = StubGenerator::new("legacy", Behavior::Succeed);
        let r = router(flag_on(), 5, new_path, legacy);

        let out = r.generate(&request(), None).unwrap();
        assert_eq!(out.bytes, b"legacy");
        assert_eq!(r.breaker().consecutive_failures(), 1);
    }

    #[test]
    fn legacy_failure_propagates_when_chosen_directly() {
        let new_path = StubGenerator::new("new", Behavior::Succeed);
        let legacy = StubGenerator::new("legacy", Behavior::Fail);
        let r = router(RoutingConfig::default(), 1, new_path, legacy);

        assert!(matches!(
            r.generate(&request(), None),
            Err(AppError::Generation(_))
        ));
        assert!(r.try_generate(&request(), None).is_none());
    }

    #[test]
    fn validation_errors_never_reach_either_path() {
        let new_path = StubGenerator::new("new", Behavior::Succeed);
        let legacy = StubGenerator::new("legacy", Behavior::Succeed);
        let r = router(flag_on(), 1, new_path.clone(), legacy.clone());

        let mut req = request();
        req.fill_color = "black".to_string();
        assert!(matches!(r.generate(&req, None), Err(AppError::Validation(_))));
        assert_eq!(new_path.calls() + legacy.calls(), 0);
        assert_eq!(r.breaker().state(), CircuitState::Closed);
    }

    #[test]
    fn auxiliary_outputs_surface_errors() {
        let r = router(
            flag_on(),
            1,
            StubGenerator::new("new", Behavior::Fail),
            StubGenerator::new("legacy", Behavior::Succeed),
        );
        let mut req = request();
        assert!(r.svg_inline(&req).unwrap().starts_with("<svg"));
        req.physical_size = Some(1.0);
        assert!(matches!(r.png_data_uri(&req), Err(AppError::Validation(_))));
    }
}
