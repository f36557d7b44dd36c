//! 配置加载
//!
//! TOML 文件中的每个段落都可以省略，缺省值与各组件的默认配置一致。
//! 部分字段可通过环境变量覆盖

use crate::client::ClientConfig;
use crate::discovery::ResolveStrategy;
use crate::error::{DiscoveryError, Result};
use crate::health::{HealthAnnouncer, HealthCheckKind};
use crate::load_balancer::LoadBalanceStrategy;
use crate::runtime::{ReadyCheck, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_CONSUL_ADDR: &str = "CONSUL_HTTP_ADDR";
pub const ENV_CONSUL_TOKEN: &str = "CONSUL_HTTP_TOKEN";
pub const ENV_STRATEGY: &str = "FLARE_DISCOVERY_STRATEGY";
pub const ENV_POLICY: &str = "FLARE_DISCOVERY_POLICY";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub health: HealthConfig,
    pub resolver: ResolverConfig,
    pub invoker: InvokerConfig,
    pub runtime: LifecycleConfig,
    pub logging: LoggingConfig,
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: String, // consul, memory
    pub address: String,
    pub token: Option<String>,
    pub datacenter: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: "consul".to_string(),
            address: "http://127.0.0.1:8500".to_string(),
            token: None,
            datacenter: None,
            request_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    pub kind: HealthCheckKind,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub deregister_after_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            kind: HealthCheckKind::Grpc,
            interval_secs: 10,
            timeout_secs: 5,
            deregister_after_secs: 60,
        }
    }
}

impl HealthConfig {
    pub fn announcer(&self) -> HealthAnnouncer {
        HealthAnnouncer {
            kind: self.kind,
            interval: Duration::from_secs(self.interval_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            deregister_after: Duration::from_secs(self.deregister_after_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub strategy: String, // one_shot, watch
    pub watch_wait_secs: u64,
    pub retry_backoff_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            strategy: "watch".to_string(),
            watch_wait_secs: 30,
            retry_backoff_ms: 1000,
        }
    }
}

impl ResolverConfig {
    pub fn strategy(&self) -> Result<ResolveStrategy> {
        self.strategy.parse()
    }

    pub fn watch_wait(&self) -> Duration {
        Duration::from_secs(self.watch_wait_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InvokerConfig {
    pub policy: String, // round_robin, random, least_recently_used
    pub attempt_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub idle_timeout_secs: u64,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            policy: "round_robin".to_string(),
            attempt_timeout_ms: 3000,
            connect_timeout_ms: 1000,
            idle_timeout_secs: 300,
        }
    }
}

impl InvokerConfig {
    pub fn policy(&self) -> Result<LoadBalanceStrategy> {
        self.policy.parse()
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default().with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub shutdown_timeout_secs: u64,
    /// 为 0 时不做就绪探测
    pub ready_check_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 5,
            ready_check_timeout_secs: 30,
        }
    }
}

impl LifecycleConfig {
    pub fn runtime_config(&self) -> RuntimeConfig {
        let ready_check = match self.ready_check_timeout_secs {
            0 => ReadyCheck::Skip,
            secs => ReadyCheck::Within(Duration::from_secs(secs)),
        };
        RuntimeConfig {
            ready_check,
            shutdown_grace: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // text, json
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    pub service_name: String,
    pub address: String,
    pub port: u16,
    /// 监听地址，缺省时与 `address` 相同
    #[serde(default)]
    pub bind_address: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DiscoveryError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| DiscoveryError::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 用进程环境变量覆盖配置
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// 用 `lookup` 提供的变量覆盖配置，空值忽略
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(address) = get(ENV_CONSUL_ADDR) {
            self.registry.address = if address.contains("://") {
                address
            } else {
                format!("http://{}", address)
            };
        }
        if let Some(token) = get(ENV_CONSUL_TOKEN) {
            self.registry.token = Some(token);
        }
        if let Some(strategy) = get(ENV_STRATEGY) {
            self.resolver.strategy = strategy;
        }
        if let Some(policy) = get(ENV_POLICY) {
            self.invoker.policy = policy;
        }
        self.validate()
    }

    /// 校验可枚举字段
    pub fn validate(&self) -> Result<()> {
        self.registry.backend.parse::<crate::registry::RegistryType>()?;
        self.resolver.strategy()?;
        self.invoker.policy()?;
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(DiscoveryError::config(format!(
                    "unknown log format `{}`",
                    other
                )));
            }
        }
        if self.health.timeout_secs >= self.health.interval_secs {
            return Err(DiscoveryError::config(
                "health.timeout_secs must be shorter than health.interval_secs",
            ));
        }
        Ok(())
    }
}
