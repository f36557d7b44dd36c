//! 注册客户端
//!
//! 注册前完成校验和实例 ID 推导，再交给具体后端

use super::trait_def::RegistryBackend;
use crate::discovery::instance::{InstanceDescriptor, InstanceId, ServiceName};
use crate::error::{DiscoveryError, Result};
use crate::health::HealthCheckSpec;
use std::sync::Arc;
use tracing::{debug, info};

/// 注册客户端，可廉价克隆并在多个任务间共享
#[derive(Clone)]
pub struct RegistryClient {
    backend: Arc<dyn RegistryBackend>,
}

impl RegistryClient {
    pub fn new(backend: Arc<dyn RegistryBackend>) -> Self {
        Self { backend }
    }

    /// 注册实例，返回推导出的实例 ID
    ///
    /// 相同 `(address, port, service)` 重复注册会覆盖原记录
    pub async fn register(
        &self,
        address: &str,
        port: u16,
        service: &ServiceName,
        health: HealthCheckSpec,
    ) -> Result<InstanceId> {
        self.register_descriptor(InstanceDescriptor::new(
            address,
            port,
            service.clone(),
            health,
        ))
        .await
    }

    /// 注册完整描述（可带标签）
    pub async fn register_descriptor(&self, descriptor: InstanceDescriptor) -> Result<InstanceId> {
        descriptor
            .validate()
            .map_err(DiscoveryError::InvalidDescriptor)?;

        debug!(
            service = %descriptor.service,
            instance_id = %descriptor.id,
            backend = self.backend.name(),
            "Registering instance"
        );
        self.backend.register(&descriptor).await?;

        info!(
            service = %descriptor.service,
            instance_id = %descriptor.id,
            health = %descriptor.health.target,
            "✅ Instance registered"
        );
        Ok(descriptor.id)
    }

    /// 注销实例，重复注销或未知 ID 均视为成功
    pub async fn deregister(&self, id: &InstanceId) -> Result<()> {
        self.backend.deregister(id).await?;
        info!(instance_id = %id, "✅ Instance deregistered");
        Ok(())
    }

    pub fn backend(&self) -> &Arc<dyn RegistryBackend> {
        &self.backend
    }
}
