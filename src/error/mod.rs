//! Flare Discovery 错误处理模块
//!
//! 区分输入错误、注册中心不可达、无健康实例、全部端点失败与应用错误，
//! 调用方可以据此采用不同的退避策略

pub mod code;
pub mod grpc;

pub use code::{ErrorCategory, ErrorCode};

use crate::discovery::instance::Endpoint;
use std::fmt;
use thiserror::Error;

/// 统一结果类型
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// 服务注册发现与调用错误
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// 注册参数不合法（空服务名、端口越界、健康检查配置错误等）
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// 查询参数不合法，不会访问注册中心
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// 注册中心无法访问
    #[error("registry unreachable: {0}")]
    RegistryUnreachable(String),

    /// 注册中心可达但拒绝了请求
    #[error("registry rejected request (HTTP {status}): {message}")]
    RegistryRejected { status: u16, message: String },

    /// 注册中心响应无法解析
    #[error("malformed registry response: {0}")]
    MalformedResponse(String),

    /// 查询成功但没有健康实例
    #[error("no healthy instances of service `{0}`")]
    NoHealthyInstances(String),

    /// 一次调用中所有候选端点都发生传输层失败
    #[error("all {attempts} endpoint(s) of `{service}` failed, last error: {source}")]
    AllEndpointsFailed {
        service: String,
        attempts: usize,
        #[source]
        source: TransportError,
    },

    /// 可达端点明确返回的应用错误，原样透传
    #[error("application error from {endpoint}: {status}")]
    Application {
        endpoint: Endpoint,
        status: tonic::Status,
    },

    /// 调用被取消
    #[error("call to `{0}` cancelled")]
    Cancelled(String),

    /// 调用截止时间已过
    #[error("deadline exceeded calling `{0}`")]
    DeadlineExceeded(String),

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    pub fn invalid_descriptor(reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor(reason.into())
    }

    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery(reason.into())
    }

    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self::RegistryUnreachable(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidDescriptor(_) => ErrorCode::InvalidDescriptor,
            Self::InvalidQuery(_) => ErrorCode::InvalidQuery,
            Self::RegistryUnreachable(_) => ErrorCode::RegistryUnreachable,
            Self::RegistryRejected { .. } => ErrorCode::RegistryRejected,
            Self::MalformedResponse(_) => ErrorCode::MalformedResponse,
            Self::NoHealthyInstances(_) => ErrorCode::NoHealthyInstances,
            Self::AllEndpointsFailed { .. } => ErrorCode::AllEndpointsFailed,
            Self::Application { .. } => ErrorCode::ApplicationError,
            Self::Cancelled(_) => ErrorCode::CallCancelled,
            Self::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            Self::Config(_) => ErrorCode::ConfigurationError,
            Self::Io(_) => ErrorCode::IoError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// 传输层失败类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// 建立连接失败（拒绝连接、地址无效）
    Connect,
    /// 单次尝试超时
    Timeout,
    /// 连接已建立但传输中断
    Unavailable,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Connect => write!(f, "connect"),
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// 与某个端点通信时的传输层错误
#[derive(Error, Debug, Clone)]
#[error("{kind} failure talking to {endpoint}: {message}")]
pub struct TransportError {
    pub endpoint: Endpoint,
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(endpoint: Endpoint, kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            endpoint,
            kind,
            message: message.into(),
        }
    }

    pub fn connect(endpoint: Endpoint, message: impl Into<String>) -> Self {
        Self::new(endpoint, TransportErrorKind::Connect, message)
    }

    pub fn timeout(endpoint: Endpoint, message: impl Into<String>) -> Self {
        Self::new(endpoint, TransportErrorKind::Timeout, message)
    }

    pub fn unavailable(endpoint: Endpoint, message: impl Into<String>) -> Self {
        Self::new(endpoint, TransportErrorKind::Unavailable, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_and_empty_are_distinct() {
        let down = DiscoveryError::unreachable("connection refused");
        let empty = DiscoveryError::NoHealthyInstances("hello".into());

        assert_eq!(down.code(), ErrorCode::RegistryUnreachable);
        assert_eq!(empty.code(), ErrorCode::NoHealthyInstances);
        assert_ne!(down.code(), empty.code());
        assert_eq!(down.code().category(), ErrorCategory::Registry);
        assert_eq!(empty.code().category(), ErrorCategory::Discovery);
    }

    #[test]
    fn input_errors_are_not_retryable() {
        assert!(!DiscoveryError::invalid_descriptor("port 0").is_retryable());
        assert!(!DiscoveryError::invalid_query("empty").is_retryable());
        assert!(DiscoveryError::unreachable("down").is_retryable());
    }

    #[test]
    fn all_endpoints_failed_keeps_last_error() {
        let last = TransportError::connect(Endpoint::new("127.0.0.1", 50052), "refused");
        let err = DiscoveryError::AllEndpointsFailed {
            service: "hello".into(),
            attempts: 2,
            source: last,
        };

        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("connect failure talking to 127.0.0.1:50052: refused")
        );
    }
}
