//! 健康检查模块
//!
//! - [`check`]：注册时提交给注册中心的检查描述
//! - [`HealthService`]：服务端 `grpc.health.v1` 状态，供注册中心的 gRPC 检查探测

pub mod check;

pub use check::{
    HealthAnnouncer, HealthCheckKind, HealthCheckSpec, HealthTarget, MIN_DEREGISTER_AFTER,
};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tonic_health::ServingStatus;
use tonic_health::pb::health_server::{Health, HealthServer};
use tonic_health::server::HealthReporter;

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Serving,
    NotServing,
}

impl From<HealthStatus> for ServingStatus {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Unknown => ServingStatus::Unknown,
            HealthStatus::Serving => ServingStatus::Serving,
            HealthStatus::NotServing => ServingStatus::NotServing,
        }
    }
}

/// 健康检查服务
///
/// 维护每个服务名的状态，并同步到 tonic-health 的 reporter
#[derive(Clone)]
pub struct HealthService {
    reporter: HealthReporter,
    statuses: Arc<RwLock<HashMap<String, HealthStatus>>>,
}

impl HealthService {
    /// 创建健康检查服务，返回状态句柄和需要挂载到 gRPC server 的服务
    pub fn new() -> (Self, HealthServer<impl Health>) {
        let (reporter, server) = tonic_health::server::health_reporter();
        (
            Self {
                reporter,
                statuses: Arc::new(RwLock::new(HashMap::new())),
            },
            server,
        )
    }

    pub async fn set_status(&self, service: impl Into<String>, status: HealthStatus) {
        let service = service.into();
        self.reporter
            .set_service_status(service.as_str(), status.into())
            .await;
        let mut statuses = self.statuses.write().await;
        statuses.insert(service, status);
    }

    pub async fn get_status(&self, service: &str) -> HealthStatus {
        let statuses = self.statuses.read().await;
        statuses
            .get(service)
            .copied()
            .unwrap_or(HealthStatus::Unknown)
    }

    pub async fn set_serving(&self) {
        self.set_all(HealthStatus::Serving).await;
    }

    pub async fn set_not_serving(&self) {
        self.set_all(HealthStatus::NotServing).await;
    }

    async fn set_all(&self, status: HealthStatus) {
        let mut statuses = self.statuses.write().await;
        for (service, current) in statuses.iter_mut() {
            self.reporter
                .set_service_status(service.as_str(), status.into())
                .await;
            *current = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_status_per_service() {
        let (health, _server) = HealthService::new();

        assert_eq!(health.get_status("hello").await, HealthStatus::Unknown);

        health.set_status("hello", HealthStatus::Serving).await;
        health.set_status("", HealthStatus::Serving).await;
        assert_eq!(health.get_status("hello").await, HealthStatus::Serving);

        health.set_not_serving().await;
        assert_eq!(health.get_status("hello").await, HealthStatus::NotServing);
        assert_eq!(health.get_status("").await, HealthStatus::NotServing);
    }
}
