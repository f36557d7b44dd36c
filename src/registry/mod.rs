//! 服务注册模块
//!
//! 支持 Consul 和进程内两种注册中心后端

pub mod client;
pub mod consul;
pub mod memory;
pub mod trait_def;

use crate::config::RegistryConfig;
use crate::error::{DiscoveryError, Result};
pub use client::RegistryClient;
pub use consul::ConsulRegistry;
pub use memory::InMemoryRegistry;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
pub use trait_def::{QueryResult, RegistryBackend};

/// 注册中心类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryType {
    Consul,
    Memory,
}

impl FromStr for RegistryType {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "consul" => Ok(RegistryType::Consul),
            "memory" => Ok(RegistryType::Memory),
            _ => Err(DiscoveryError::config(format!(
                "unknown registry backend `{}`",
                s
            ))),
        }
    }
}

/// 根据配置创建注册中心后端
pub fn create_registry(config: &RegistryConfig) -> Result<Arc<dyn RegistryBackend>> {
    match config.backend.parse::<RegistryType>()? {
        RegistryType::Consul => Ok(Arc::new(ConsulRegistry::new(
            &config.address,
            config.token.clone(),
            config.datacenter.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?)),
        RegistryType::Memory => Ok(Arc::new(InMemoryRegistry::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_backend_from_config() {
        let mut config = RegistryConfig::default();
        assert_eq!(create_registry(&config).unwrap().name(), "consul");

        config.backend = "memory".to_string();
        assert_eq!(create_registry(&config).unwrap().name(), "memory");

        config.backend = "etcd".to_string();
        assert!(create_registry(&config).is_err());
    }
}
