//! 新旧生成路径的路由：功能开关、金丝雀分流、熔断与指标。

pub mod canary;
pub mod circuit_breaker;
pub mod metrics;
pub mod router;

pub use canary::{DecisionReason, RoutingConfig, RoutingDecision, canary_bucket};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use metrics::{GenerationPath, MetricsFacadeRecorder, MetricsRecorder, NoopMetrics};
pub use router::GenerationRouter;
