//! 熔断器：保护单个具名操作（新路径二维码生成），进程内全局共享。
//!
//! ```text
//! Closed → Open:      连续失败次数达到 fail_max
//! Open → HalfOpen:    进入 Open 后经过 reset_timeout，下一次调用触发
//! HalfOpen → Closed:  唯一的试探调用成功（失败计数清零）
//! HalfOpen → Open:    试探调用失败（重新计时）
//! ```
//!
//! 状态由互斥锁保护，锁只在计数/状态更新时持有，绝不跨越被保护的调用本身。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::metrics::MetricsRecorder;
use crate::error::AppError;

/// 熔断器配置
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后打开
    pub fail_max: u32,
    /// Open 状态持续多久后允许一次试探
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            fail_max: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// 正常放行
    Closed,
    /// 快速失败
    Open,
    /// 允许一次试探
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 熔断器统计快照
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejected: u64,
    pub time_since_last_transition: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_transition: Instant,
    /// HalfOpen 下是否已有试探调用在执行
    trial_in_flight: bool,
    total_failures: u64,
    total_successes: u64,
    total_rejected: u64,
}

type Transition = (CircuitState, CircuitState);

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    observer: Option<Arc<dyn MetricsRecorder>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_transition: Instant::now(),
                trial_in_flight: false,
                total_failures: 0,
                total_successes: 0,
                total_rejected: 0,
            }),
            observer: None,
        }
    }

    /// 状态迁移时通知指标钩子
    pub fn with_observer(mut self, observer: Arc<dyn MetricsRecorder>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// 通过熔断器执行操作。Open（或试探名额已被占用）时不调用 `op`，直接返回 `BreakerOpen`。
    ///
    /// `AppError::Validation` 是请求本身的问题，不计入成功也不计入失败。
    pub fn call<T, F>(&self, op: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Result<T, AppError>,
    {
        self.acquire()?;
        let result = op();
        match &result {
            Ok(_) => self.record_success(),
            Err(AppError::Validation(_)) => self.release_trial(),
            Err(_) => self.record_failure(),
        }
        result
    }

    /// 归还 HalfOpen 试探名额，不改变状态与计数
    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn acquire(&self) -> Result<(), AppError> {
        let mut transition = None;
        let outcome = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => Ok(()),
                CircuitState::Open => {
                    if inner.last_transition.elapsed() >= self.config.reset_timeout {
                        transition = Self::transition(&mut inner, CircuitState::HalfOpen);
                        inner.trial_in_flight = true;
                        Ok(())
                    } else {
                        inner.total_rejected += 1;
                        Err(self.open_error(&inner))
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight {
                        inner.total_rejected += 1;
                        Err(self.open_error(&inner))
                    } else {
                        inner.trial_in_flight = true;
                        Ok(())
                    }
                }
            }
        };
        self.notify(transition);
        outcome
    }

    /// 记录一次成功
    pub fn record_success(&self) {
        let transition = {
            let mut inner = self.lock();
            inner.total_successes += 1;
            inner.consecutive_failures = 0;
            match inner.state {
                CircuitState::HalfOpen => {
                    inner.trial_in_flight = false;
                    Self::transition(&mut inner, CircuitState::Closed)
                }
                CircuitState::Closed => None,
                CircuitState::Open => {
                    warn!("熔断器 {} 在 Open 状态下收到成功记录（过期调用）", self.name);
                    None
                }
            }
        };
        self.notify(transition);
    }

    /// 记录一次失败
    pub fn record_failure(&self) {
        let transition = {
            let mut inner = self.lock();
            inner.total_failures += 1;
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            match inner.state {
                CircuitState::Closed if inner.consecutive_failures >= self.config.fail_max => {
                    Self::transition(&mut inner, CircuitState::Open)
                }
                CircuitState::HalfOpen => {
                    inner.trial_in_flight = false;
                    Self::transition(&mut inner, CircuitState::Open)
                }
                _ => None,
            }
        };
        self.notify(transition);
    }

    /// 手动打开熔断器（运维干预）
    pub fn trip(&self) {
        let transition = {
            let mut inner = self.lock();
            inner.trial_in_flight = false;
            Self::transition(&mut inner, CircuitState::Open)
        };
        self.notify(transition);
    }

    /// 重置为 Closed 并清零失败计数
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.lock();
            inner.consecutive_failures = 0;
            inner.trial_in_flight = false;
            Self::transition(&mut inner, CircuitState::Closed)
        };
        self.notify(transition);
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_rejected: inner.total_rejected,
            time_since_last_transition: inner.last_transition.elapsed(),
        }
    }

    fn transition(inner: &mut BreakerInner, to: CircuitState) -> Option<Transition> {
        let from = inner.state;
        // Open → Open（手动 trip）也要重新计时
        inner.last_transition = Instant::now();
        if from == to {
            return None;
        }
        inner.state = to;
        if to == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
        Some((from, to))
    }

    fn notify(&self, transition: Option<Transition>) {
        let Some((from, to)) = transition else {
            return;
        };
        info!("熔断器 {} 状态迁移: {} -> {}", self.name, from, to);
        if let Some(observer) = &self.observer {
            observer.record_breaker_transition(&self.name, from, to);
        }
    }

    fn open_error(&self, inner: &BreakerInner) -> AppError {
        let remaining = self
            .config
            .reset_timeout
            .saturating_sub(inner.last_transition.elapsed());
        AppError::BreakerOpen(format!("{}（约 {:?} 后允许试探）", self.name, remaining))
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // 持锁期间不会 panic，出现中毒时沿用内部状态
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::routing::metrics::tests::RecordingMetrics;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(fail_max: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                fail_max,
                reset_timeout: Duration::from_millis(reset_ms),
            },
        )
    }

    fn fail() -> Result<(), AppError> {
        Err(AppError::Generation("boom".to_string()))
    }

    #[test]
    fn opens_after_exactly_fail_max_consecutive_failures() {
        let cb = breaker(3, 60_000);
        for _ in 0..2 {
            assert!(cb.call(fail).is_err());
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        assert!(cb.call(fail).is_err());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.consecutive_failures(), 3);
    }

    #[test]
    fn success_resets_consecutive_counter_while_closed() {
        let cb = breaker(3, 60_000);
        let _ = cb.call(fail);
        let _ = cb.call(fail);
        cb.call(|| Ok(())).unwrap();
        let _ = cb.call(fail);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 1);
    }

    #[test]
    fn open_breaker_fails_fast_without_calling_op() {
        let cb = breaker(1, 60_000);
        let _ = cb.call(fail);
        let calls = AtomicU32::new(0);
        let res = cb.call(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(matches!(res, Err(AppError::BreakerOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cb.stats().total_rejected, 1);
    }

    #[test]
    fn half_open_trial_success_closes_and_resets() {
        let cb = breaker(2, 20);
        let _ = cb.call(fail);
        let _ = cb.call(fail);
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(40));
        let seen = cb.call(|| Ok(cb.state())).unwrap();
        assert_eq!(seen, CircuitState::HalfOpen);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn half_open_trial_failure_reopens_and_restarts_timer() {
        let cb = breaker(1, 30);
        let _ = cb.call(fail);
        std::thread::sleep(Duration::from_millis(50));
        assert!(matches!(cb.call(fail), Err(AppError::Generation(_))));
        assert_eq!(cb.state(), CircuitState::Open);
        // 计时重新开始，立即调用仍快速失败
        assert!(matches!(cb.call(|| Ok(())), Err(AppError::BreakerOpen(_))));
    }

    #[test]
    fn only_one_trial_is_admitted_while_half_open() {
        let cb = breaker(1, 10);
        let _ = cb.call(fail);
        std::thread::sleep(Duration::from_millis(30));
        let nested = cb.call(|| {
            // 试探进行中，其他调用必须被拒绝
            Ok(cb.call(|| Ok(())))
        });
        assert!(matches!(nested, Ok(Err(AppError::BreakerOpen(_)))));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn validation_errors_are_neutral() {
        let cb = breaker(2, 20);
        let invalid = || -> Result<(), AppError> { Err(AppError::Validation("too long".to_string())) };
        for _ in 0..5 {
            assert!(matches!(cb.call(invalid), Err(AppError::Validation(_))));
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);

        let _ = cb.call(fail);
        let _ = cb.call(fail);
        std::thread::sleep(Duration::from_millis(40));
        // 试探调用遇到校验错误：名额归还，仍为 HalfOpen
        assert!(matches!(cb.call(invalid), Err(AppError::Validation(_))));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.call(|| Ok(())).unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn transitions_are_reported_to_observer() {
        let metrics = Arc::new(RecordingMetrics::default());
        let cb = breaker(1, 10).with_observer(metrics.clone());
        let _ = cb.call(fail);
        std::thread::sleep(Duration::from_millis(30));
        cb.call(|| Ok(())).unwrap();
        assert_eq!(
            metrics.transitions(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn concurrent_failures_are_not_lost() {
        let cb = Arc::new(breaker(1000, 60_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = cb.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let _ = cb.call(fail);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cb.consecutive_failures(), 400);
        assert_eq!(cb.stats().total_failures, 400);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn trip_and_reset_are_manual_overrides() {
        let cb = breaker(5, 60_000);
        cb.trip();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }
}
