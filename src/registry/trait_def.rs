//! 注册中心后端 Trait 定义

use crate::discovery::instance::{CatalogEntry, InstanceDescriptor, InstanceId, ServiceName};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// 一次查询的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    /// 注册中心的变更索引
    pub index: u64,
    pub entries: Vec<CatalogEntry>,
}

/// 注册中心后端
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// 注册或覆盖实例（按实例 ID upsert）
    async fn register(&self, descriptor: &InstanceDescriptor) -> Result<()>;

    /// 注销实例，未知 ID 视为成功
    async fn deregister(&self, id: &InstanceId) -> Result<()>;

    /// 查询服务实例
    async fn query(&self, service: &ServiceName, healthy_only: bool) -> Result<QueryResult>;

    /// 阻塞查询：索引超过 `last_index` 或等待 `wait` 后返回健康实例
    async fn watch(
        &self,
        service: &ServiceName,
        last_index: u64,
        wait: Duration,
    ) -> Result<QueryResult>;

    /// 后端名称，用于日志
    fn name(&self) -> &'static str;
}
