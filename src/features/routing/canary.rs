use rand::Rng;
use sha2::{Digest, Sha256};

/// 路由器的显式配置（由调用方构造并传入，路由逻辑不读取全局状态）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingConfig {
    /// 全局开关：关闭时始终走旧路径
    pub use_new_service: bool,
    /// 是否启用金丝雀
    pub canary_enabled: bool,
    /// 金丝雀百分比（0-100）
    pub canary_percentage: u8,
}

/// 路由决策的依据，仅用于日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    /// 全局开关关闭
    FlagOff,
    /// 按标识符哈希分桶
    Bucket(u8),
    /// 无标识符，随机抽样
    Sampled,
    /// 金丝雀未启用，由开关单独决定
    FlagOnly,
}

/// 单次请求的路由决策，不持久化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingDecision {
    pub use_new_path: bool,
    pub reason: DecisionReason,
}

/// 稳定分桶：SHA-256 前 8 字节（大端）对 100 取模
pub fn canary_bucket(identifier: &str) -> u8 {
    let digest = Sha256::digest(identifier.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % 100) as u8
}

/// 计算路由决策；没有标识符时使用传入的随机源抽样
pub fn decide_with_rng<R: Rng + ?Sized>(
    config: &RoutingConfig,
    identifier: Option<&str>,
    rng: &mut R,
) -> RoutingDecision {
    if !config.use_new_service {
        return RoutingDecision {
            use_new_path: false,
            reason: DecisionReason::FlagOff,
        };
    }
    if !config.canary_enabled {
        return RoutingDecision {
            use_new_path: config.use_new_service,
            reason: DecisionReason::FlagOnly,
        };
    }

    let percentage = config.canary_percentage.min(100);
    match identifier.filter(|id| !id.is_empty()) {
        Some(id) => {
            let bucket = canary_bucket(id);
            RoutingDecision {
                use_new_path: bucket < percentage,
                reason: DecisionReason::Bucket(bucket),
            }
        }
        None => RoutingDecision {
            use_new_path: rng.gen_range(0..100u8) < percentage,
            reason: DecisionReason::Sampled,
        },
    }
}

pub fn decide(config: &RoutingConfig, identifier: Option<&str>) -> RoutingDecision {
    decide_with_rng(config, identifier, &mut rand::thread_rng())
}
