//! 监听式解析器
//!
//! 每个服务名首次解析时同步查询一次，然后启动一个后台任务对注册中心做阻塞查询，
//! 端点集合变化时整体替换缓存。后续解析直接读取缓存

use super::instance::ServiceName;
use super::resolver::{Resolve, ResolvedEndpointSet, non_empty, validate_query};
use crate::config::ResolverConfig;
use crate::error::{DiscoveryError, Result};
use crate::registry::RegistryBackend;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct WatchEntry {
    rx: watch::Receiver<Arc<ResolvedEndpointSet>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// 监听式解析器
pub struct WatchingResolver {
    registry: Arc<dyn RegistryBackend>,
    wait: Duration,
    retry_backoff: Duration,
    entries: RwLock<HashMap<ServiceName, WatchEntry>>,
    shutdown: CancellationToken,
}

impl WatchingResolver {
    /// `wait` 为单次阻塞查询的最长等待，`retry_backoff` 为刷新失败后的重试间隔
    pub fn new(registry: Arc<dyn RegistryBackend>, wait: Duration, retry_backoff: Duration) -> Self {
        Self {
            registry,
            wait,
            retry_backoff,
            entries: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(registry: Arc<dyn RegistryBackend>, config: &ResolverConfig) -> Self {
        Self::new(registry, config.watch_wait(), config.retry_backoff())
    }

    /// 订阅服务的端点集合，每次变化都会推送新的集合
    pub async fn subscribe(
        &self,
        service: &ServiceName,
    ) -> Result<watch::Receiver<Arc<ResolvedEndpointSet>>> {
        validate_query(service)?;

        if let Some(entry) = self.entries.read().await.get(service) {
            return Ok(entry.rx.clone());
        }

        // 首次查询不持有锁，失败直接返回且不缓存
        let result = self.registry.query(service, true).await?;
        let initial = Arc::new(ResolvedEndpointSet::from_entries(
            service.clone(),
            result.index,
            result.entries,
        ));

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(service) {
            return Ok(entry.rx.clone());
        }
        if self.shutdown.is_cancelled() {
            return Err(DiscoveryError::Cancelled(service.to_string()));
        }

        let (tx, rx) = watch::channel(initial);
        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(refresh_loop(
            self.registry.clone(),
            service.clone(),
            tx,
            result.index,
            self.wait,
            self.retry_backoff,
            cancel.clone(),
        ));
        entries.insert(
            service.clone(),
            WatchEntry {
                rx: rx.clone(),
                cancel,
                handle,
            },
        );

        info!(service = %service, backend = self.registry.name(), "👀 Watching service");
        Ok(rx)
    }

    /// 停止监听某个服务，返回之前是否在监听
    pub async fn unsubscribe(&self, service: &ServiceName) -> bool {
        match self.entries.write().await.remove(service) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_watching(&self, service: &ServiceName) -> bool {
        self.entries.read().await.contains_key(service)
    }

    /// 停止所有后台刷新任务并等待其退出
    pub async fn close(&self) {
        self.shutdown.cancel();
        let entries: Vec<WatchEntry> = self.entries.write().await.drain().map(|(_, e)| e).collect();
        for entry in entries {
            let _ = entry.handle.await;
        }
    }
}

impl Drop for WatchingResolver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Resolve for WatchingResolver {
    async fn resolve(&self, service: &ServiceName) -> Result<Arc<ResolvedEndpointSet>> {
        let rx = self.subscribe(service).await?;
        let set = rx.borrow().clone();
        non_empty(set)
    }
}

async fn refresh_loop(
    registry: Arc<dyn RegistryBackend>,
    service: ServiceName,
    tx: watch::Sender<Arc<ResolvedEndpointSet>>,
    mut index: u64,
    wait: Duration,
    retry_backoff: Duration,
    cancel: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = registry.watch(&service, index, wait) => result,
        };

        match result {
            Ok(result) => {
                // 索引回退说明注册中心状态被重置，从头开始
                let next = if result.index < index {
                    0
                } else {
                    result.index.max(1)
                };
                if result.index != index {
                    let set =
                        ResolvedEndpointSet::from_entries(service.clone(), result.index, result.entries);
                    if set.endpoints() != tx.borrow().endpoints() {
                        debug!(
                            service = %service,
                            generation = set.generation,
                            endpoints = set.len(),
                            "Endpoint set replaced"
                        );
                        tx.send_replace(Arc::new(set));
                    }
                }
                index = next;
            }
            Err(e) => {
                warn!(service = %service, error = %e, "⚠️ Failed to refresh service, keeping last known endpoints");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry_backoff) => {}
                }
            }
        }
    }
    debug!(service = %service, "Watch stopped");
}
