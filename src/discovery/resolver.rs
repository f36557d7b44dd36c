//! 服务解析
//!
//! 把服务名解析为当前健康的端点集合

use super::instance::{CatalogEntry, Endpoint, ServiceName};
use crate::error::{DiscoveryError, Result};
use crate::registry::RegistryBackend;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// 某一时刻某个服务的健康端点集合
///
/// 以 `Arc` 整体替换，从不原地修改；端点去重并按 `(address, port)` 排序，
/// 因此同一代的轮询顺序固定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpointSet {
    pub service: ServiceName,
    /// 构建时注册中心的变更索引
    pub generation: u64,
    endpoints: Vec<Endpoint>,
}

impl ResolvedEndpointSet {
    pub fn new(service: ServiceName, generation: u64, mut endpoints: Vec<Endpoint>) -> Self {
        endpoints.sort();
        endpoints.dedup();
        Self {
            service,
            generation,
            endpoints,
        }
    }

    /// 从查询结果构建，只保留健康实例
    pub fn from_entries(service: ServiceName, generation: u64, entries: Vec<CatalogEntry>) -> Self {
        let endpoints = entries
            .into_iter()
            .filter(|e| e.passing)
            .map(|e| e.endpoint)
            .collect();
        Self::new(service, generation, endpoints)
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// 服务解析器
#[async_trait]
pub trait Resolve: Send + Sync {
    /// 解析服务名；没有健康实例时返回 `NoHealthyInstances`
    async fn resolve(&self, service: &ServiceName) -> Result<Arc<ResolvedEndpointSet>>;
}

pub(crate) fn validate_query(service: &ServiceName) -> Result<()> {
    service.validate().map_err(DiscoveryError::InvalidQuery)
}

pub(crate) fn non_empty(set: Arc<ResolvedEndpointSet>) -> Result<Arc<ResolvedEndpointSet>> {
    if set.is_empty() {
        Err(DiscoveryError::NoHealthyInstances(set.service.to_string()))
    } else {
        Ok(set)
    }
}

/// 每次调用都查询注册中心
#[derive(Clone)]
pub struct OneShotResolver {
    registry: Arc<dyn RegistryBackend>,
}

impl OneShotResolver {
    pub fn new(registry: Arc<dyn RegistryBackend>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Resolve for OneShotResolver {
    async fn resolve(&self, service: &ServiceName) -> Result<Arc<ResolvedEndpointSet>> {
        validate_query(service)?;

        let result = self.registry.query(service, true).await?;
        let set = ResolvedEndpointSet::from_entries(service.clone(), result.index, result.entries);
        debug!(
            service = %service,
            generation = set.generation,
            endpoints = set.len(),
            "Service resolved"
        );
        non_empty(Arc::new(set))
    }
}
