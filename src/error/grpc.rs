//! gRPC 错误处理
//!
//! 提供 DiscoveryError 到 tonic::Status 的转换，便于在 gRPC 服务中直接返回

use super::{DiscoveryError, ErrorCode};
use tonic::{Code, Status};

impl From<DiscoveryError> for Status {
    fn from(err: DiscoveryError) -> Self {
        // 应用错误原样透传
        let err = match err {
            DiscoveryError::Application { status, .. } => return status,
            other => other,
        };

        let code = err.code();
        let mut status = Status::new(map_error_code_to_grpc(code), err.to_string());

        // 添加错误代码到 metadata
        if let Ok(value) = code.as_u32().to_string().parse() {
            status.metadata_mut().insert("error-code", value);
        }

        status
    }
}

/// 将错误代码映射到 gRPC 状态码
fn map_error_code_to_grpc(code: ErrorCode) -> Code {
    match code {
        ErrorCode::InvalidDescriptor | ErrorCode::InvalidQuery => Code::InvalidArgument,

        ErrorCode::RegistryUnreachable
        | ErrorCode::NoHealthyInstances
        | ErrorCode::AllEndpointsFailed => Code::Unavailable,

        ErrorCode::RegistryRejected => Code::FailedPrecondition,
        ErrorCode::CallCancelled => Code::Cancelled,
        ErrorCode::DeadlineExceeded => Code::DeadlineExceeded,

        ErrorCode::MalformedResponse
        | ErrorCode::ConfigurationError
        | ErrorCode::IoError
        | ErrorCode::ApplicationError => Code::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::instance::Endpoint;

    #[test]
    fn application_status_passes_through() {
        let err = DiscoveryError::Application {
            endpoint: Endpoint::new("127.0.0.1", 50051),
            status: Status::not_found("no such user"),
        };

        let status: Status = err.into();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "no such user");
        assert!(status.metadata().get("error-code").is_none());
    }

    #[test]
    fn discovery_errors_carry_error_code() {
        let status: Status = DiscoveryError::NoHealthyInstances("hello".into()).into();

        assert_eq!(status.code(), Code::Unavailable);
        let code = status
            .metadata()
            .get("error-code")
            .and_then(|v| v.to_str().ok());
        assert_eq!(code, Some("2001"));
    }
}
