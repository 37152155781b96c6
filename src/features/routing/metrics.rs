//! 生成路径指标（协作者接口）。
//!
//! - `qr_generation_requests_total` (counter): 按路径统计请求数
//! - `qr_generation_duration_seconds` (histogram): 按路径统计耗时
//! - `qr_generation_outcomes_total` (counter): 按路径与结果统计
//! - `qr_generation_fallbacks_total` (counter): 新路径回退到旧路径的次数（按原因）
//! - `qr_breaker_transitions_total` (counter) / `qr_breaker_state` (gauge)

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use super::circuit_breaker::CircuitState;

/// 实际执行的生成路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPath {
    New,
    Legacy,
}

impl GenerationPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationPath::New => "new",
            GenerationPath::Legacy => "legacy",
        }
    }
}

pub trait MetricsRecorder: Send + Sync {
    fn record_path(&self, path: GenerationPath);
    fn record_latency(&self, path: GenerationPath, elapsed: Duration);
    fn record_outcome(&self, path: GenerationPath, success: bool);
    fn record_fallback(&self, reason: &str);
    fn record_breaker_transition(&self, name: &str, from: CircuitState, to: CircuitState);
}

/// 不记录任何指标
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn record_path(&self, _path: GenerationPath) {}
    fn record_latency(&self, _path: GenerationPath, _elapsed: Duration) {}
    fn record_outcome(&self, _path: GenerationPath, _success: bool) {}
    fn record_fallback(&self, _reason: &str) {}
    fn record_breaker_transition(&self, _name: &str, _from: CircuitState, _to: CircuitState) {}
}

/// 基于 `metrics` 门面的实现；导出器由宿主进程安装
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsFacadeRecorder;

impl MetricsFacadeRecorder {
    /// 注册指标描述（进程启动时调用一次）
    pub fn describe() {
        describe_counter!(
            "qr_generation_requests_total",
            "Total QR generation requests by executed path"
        );
        describe_histogram!(
            "qr_generation_duration_seconds",
            "QR generation duration in seconds by path"
        );
        describe_counter!(
            "qr_generation_outcomes_total",
            "QR generation outcomes by path and result"
        );
        describe_counter!(
            "qr_generation_fallbacks_total",
            "New-path failures that fell back to the legacy path, by reason"
        );
        describe_counter!(
            "qr_breaker_transitions_total",
            "Circuit breaker state transitions"
        );
        describe_gauge!(
            "qr_breaker_state",
            "Circuit breaker state (0=closed, 1=open, 2=half_open)"
        );
    }
}

impl MetricsRecorder for MetricsFacadeRecorder {
    fn record_path(&self, path: GenerationPath) {
        counter!("qr_generation_requests_total",
            "path" => path.as_str()
        )
        .increment(1);
    }

    fn record_latency(&self, path: GenerationPath, elapsed: Duration) {
        histogram!("qr_generation_duration_seconds",
            "path" => path.as_str()
        )
        .record(elapsed.as_secs_f64());
    }

    fn record_outcome(&self, path: GenerationPath, success: bool) {
        counter!("qr_generation_outcomes_total",
            "path" => path.as_str(),
            "result" => if success { "success" } else { "failure" }
        )
        .increment(1);
    }

    fn record_fallback(&self, reason: &str) {
        counter!("qr_generation_fallbacks_total",
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    fn record_breaker_transition(&self, name: &str, from: CircuitState, to: CircuitState) {
        counter!("qr_breaker_transitions_total",
            "breaker" => name.to_string(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        let value = match to {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        };
        gauge!("qr_breaker_state",
            "breaker" => name.to_string()
        )
        .set(value);
    }
}
