//! 健康检查描述
//!
//! 注册时附带给注册中心的健康检查配置。探测目标必须是实例自己的服务端口和协议，
//! 否则监听器停止接受 RPC 后注册中心仍可能报告健康

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::discovery::instance::{Endpoint, ServiceName};

/// 注销宽限期下限
pub const MIN_DEREGISTER_AFTER: Duration = Duration::from_secs(60);

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DEREGISTER_AFTER: Duration = MIN_DEREGISTER_AFTER;

/// 健康检查方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckKind {
    /// `grpc.health.v1.Health/Check`
    #[default]
    Grpc,
    /// 仅检查端口可连接
    Tcp,
}

impl std::str::FromStr for HealthCheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "grpc" => Ok(HealthCheckKind::Grpc),
            "tcp" => Ok(HealthCheckKind::Tcp),
            _ => Err(format!("Unknown health check kind: {}", s)),
        }
    }
}

/// 注册中心探测实例的目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthTarget {
    Grpc {
        endpoint: Endpoint,
        /// 为空时检查整个 gRPC server
        service: Option<String>,
    },
    Tcp {
        endpoint: Endpoint,
    },
}

impl HealthTarget {
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            HealthTarget::Grpc { endpoint, .. } | HealthTarget::Tcp { endpoint } => endpoint,
        }
    }

    pub fn kind(&self) -> HealthCheckKind {
        match self {
            HealthTarget::Grpc { .. } => HealthCheckKind::Grpc,
            HealthTarget::Tcp { .. } => HealthCheckKind::Tcp,
        }
    }
}

impl fmt::Display for HealthTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthTarget::Grpc {
                endpoint,
                service: Some(service),
            } => write!(f, "{}/{}", endpoint, service),
            HealthTarget::Grpc { endpoint, .. } | HealthTarget::Tcp { endpoint } => {
                write!(f, "{}", endpoint)
            }
        }
    }
}

/// 健康检查配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckSpec {
    pub target: HealthTarget,
    pub interval: Duration,
    pub timeout: Duration,
    /// 持续失败超过该时长后注册中心自动剔除实例
    pub deregister_after: Duration,
}

impl HealthCheckSpec {
    /// gRPC 健康检查，使用默认间隔
    pub fn grpc(endpoint: Endpoint) -> Self {
        Self::with_target(HealthTarget::Grpc {
            endpoint,
            service: None,
        })
    }

    /// TCP 健康检查，使用默认间隔
    pub fn tcp(endpoint: Endpoint) -> Self {
        Self::with_target(HealthTarget::Tcp { endpoint })
    }

    fn with_target(target: HealthTarget) -> Self {
        Self {
            target,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            deregister_after: DEFAULT_DEREGISTER_AFTER,
        }
    }

    /// 指定 gRPC 健康检查的服务名，TCP 检查忽略
    pub fn with_service(mut self, name: impl Into<String>) -> Self {
        if let HealthTarget::Grpc { service, .. } = &mut self.target {
            *service = Some(name.into());
        }
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_deregister_after(mut self, deregister_after: Duration) -> Self {
        self.deregister_after = deregister_after;
        self
    }

    /// 校验时间参数
    pub fn validate(&self) -> Result<(), String> {
        if self.interval.is_zero() {
            return Err("health check interval must be positive".to_string());
        }
        if self.timeout.is_zero() {
            return Err("health check timeout must be positive".to_string());
        }
        if self.timeout >= self.interval {
            return Err(format!(
                "health check timeout {:?} must be shorter than interval {:?}",
                self.timeout, self.interval
            ));
        }
        if self.deregister_after < MIN_DEREGISTER_AFTER {
            return Err(format!(
                "deregister_after {:?} is below the {:?} floor",
                self.deregister_after, MIN_DEREGISTER_AFTER
            ));
        }
        if self.deregister_after <= self.interval {
            return Err(format!(
                "deregister_after {:?} must exceed interval {:?}",
                self.deregister_after, self.interval
            ));
        }
        Ok(())
    }
}

/// 根据统一的检查策略为每个实例生成健康检查描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthAnnouncer {
    pub kind: HealthCheckKind,
    pub interval: Duration,
    pub timeout: Duration,
    pub deregister_after: Duration,
}

impl Default for HealthAnnouncer {
    fn default() -> Self {
        Self {
            kind: HealthCheckKind::Grpc,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            deregister_after: DEFAULT_DEREGISTER_AFTER,
        }
    }
}

impl HealthAnnouncer {
    /// 生成指向实例自身服务端口的检查；gRPC 检查按服务名探测
    pub fn announce(&self, endpoint: &Endpoint, service: &ServiceName) -> HealthCheckSpec {
        let spec = match self.kind {
            HealthCheckKind::Grpc => {
                HealthCheckSpec::grpc(endpoint.clone()).with_service(service.as_str())
            }
            HealthCheckKind::Tcp => HealthCheckSpec::tcp(endpoint.clone()),
        };
        spec.with_interval(self.interval)
            .with_timeout(self.timeout)
            .with_deregister_after(self.deregister_after)
    }
}

/// 格式化为注册中心接受的 Go duration 字符串
pub fn format_go_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 60_000 == 0 && millis > 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}
