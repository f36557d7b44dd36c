//! 服务发现模块
//!
//! - [`instance`]：服务名、实例 ID、端点等数据模型
//! - [`resolver`]：每次调用都查询注册中心的一次性解析
//! - [`watch`]：缓存并通过阻塞查询持续刷新的监听式解析
//!
//! 两种解析策略没有隐式默认，调用方需通过 [`ResolveStrategy`] 显式选择

pub mod instance;
pub mod resolver;
pub mod watch;

pub use instance::{CatalogEntry, Endpoint, InstanceDescriptor, InstanceId, ServiceName, instance_id};
pub use resolver::{OneShotResolver, Resolve, ResolvedEndpointSet};
pub use watch::WatchingResolver;

use crate::config::ResolverConfig;
use crate::error::{DiscoveryError, Result};
use crate::registry::RegistryBackend;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// 解析策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStrategy {
    /// 每次解析都查询注册中心
    OneShot,
    /// 缓存并监听变化
    Watch,
}

impl FromStr for ResolveStrategy {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "one_shot" | "oneshot" => Ok(ResolveStrategy::OneShot),
            "watch" => Ok(ResolveStrategy::Watch),
            _ => Err(DiscoveryError::config(format!(
                "unknown resolve strategy `{}`",
                s
            ))),
        }
    }
}

impl fmt::Display for ResolveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveStrategy::OneShot => write!(f, "one_shot"),
            ResolveStrategy::Watch => write!(f, "watch"),
        }
    }
}

/// 按策略创建解析器
pub fn create_resolver(
    strategy: ResolveStrategy,
    registry: Arc<dyn RegistryBackend>,
    config: &ResolverConfig,
) -> Arc<dyn Resolve> {
    match strategy {
        ResolveStrategy::OneShot => Arc::new(OneShotResolver::new(registry)),
        ResolveStrategy::Watch => Arc::new(WatchingResolver::from_config(registry, config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strategies() {
        assert_eq!("watch".parse::<ResolveStrategy>().unwrap(), ResolveStrategy::Watch);
        assert_eq!("one-shot".parse::<ResolveStrategy>().unwrap(), ResolveStrategy::OneShot);
        assert_eq!("ONE_SHOT".parse::<ResolveStrategy>().unwrap(), ResolveStrategy::OneShot);
        assert!("poll".parse::<ResolveStrategy>().is_err());
    }
}
