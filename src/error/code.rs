//! 错误代码和错误类别定义
//!
//! 错误代码按类别分组，每个类别占用1000个代码范围：
//! - 1000-1999: 注册中心相关错误
//! - 2000-2999: 服务发现相关错误
//! - 3000-3999: 调用相关错误
//! - 9000-9999: 通用错误

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 注册中心相关错误 (1000-1999)
    // ============================================================
    InvalidDescriptor = 1000,
    RegistryUnreachable = 1001,
    RegistryRejected = 1002,
    MalformedResponse = 1003,

    // ============================================================
    // 服务发现相关错误 (2000-2999)
    // ============================================================
    InvalidQuery = 2000,
    NoHealthyInstances = 2001,

    // ============================================================
    // 调用相关错误 (3000-3999)
    // ============================================================
    AllEndpointsFailed = 3000,
    ApplicationError = 3001,
    CallCancelled = 3002,
    DeadlineExceeded = 3003,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    ConfigurationError = 9000,
    IoError = 9001,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidDescriptor => "INVALID_DESCRIPTOR",
            ErrorCode::RegistryUnreachable => "REGISTRY_UNREACHABLE",
            ErrorCode::RegistryRejected => "REGISTRY_REJECTED",
            ErrorCode::MalformedResponse => "MALFORMED_RESPONSE",
            ErrorCode::InvalidQuery => "INVALID_QUERY",
            ErrorCode::NoHealthyInstances => "NO_HEALTHY_INSTANCES",
            ErrorCode::AllEndpointsFailed => "ALL_ENDPOINTS_FAILED",
            ErrorCode::ApplicationError => "APPLICATION_ERROR",
            ErrorCode::CallCancelled => "CALL_CANCELLED",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::IoError => "IO_ERROR",
        }
    }

    /// 获取错误代码的类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Registry,
            2000..=2999 => ErrorCategory::Discovery,
            3000..=3999 => ErrorCategory::Invocation,
            _ => ErrorCategory::General,
        }
    }

    /// 判断调用方是否值得稍后重试
    ///
    /// 输入类错误和应用错误不可重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RegistryUnreachable
                | ErrorCode::NoHealthyInstances
                | ErrorCode::AllEndpointsFailed
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Registry,
    Discovery,
    Invocation,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Registry => write!(f, "REGISTRY"),
            ErrorCategory::Discovery => write!(f, "DISCOVERY"),
            ErrorCategory::Invocation => write!(f, "INVOCATION"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}
