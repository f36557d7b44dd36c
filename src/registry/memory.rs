//! 进程内注册中心
//!
//! 用于测试和本地开发。健康状态不做真实探测，由 [`InMemoryRegistry::set_passing`] 设置

use super::trait_def::{QueryResult, RegistryBackend};
use crate::discovery::instance::{CatalogEntry, InstanceDescriptor, InstanceId, ServiceName};
use crate::error::{DiscoveryError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tracing::debug;

struct Record {
    descriptor: InstanceDescriptor,
    passing: bool,
}

struct State {
    index: u64,
    records: BTreeMap<InstanceId, Record>,
}

/// 进程内注册中心
pub struct InMemoryRegistry {
    state: RwLock<State>,
    changes: watch::Sender<u64>,
    reachable: AtomicBool,
    initial_passing: bool,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(1);
        Self {
            state: RwLock::new(State {
                index: 1,
                records: BTreeMap::new(),
            }),
            changes,
            reachable: AtomicBool::new(true),
            initial_passing: true,
        }
    }

    /// 新注册实例的初始健康状态，默认通过
    pub fn with_initial_passing(mut self, passing: bool) -> Self {
        self.initial_passing = passing;
        self
    }

    /// 模拟注册中心宕机
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// 设置实例健康状态，返回实例是否存在
    pub async fn set_passing(&self, id: &InstanceId, passing: bool) -> bool {
        let mut state = self.state.write().await;
        let Some(record) = state.records.get_mut(id) else {
            return false;
        };
        if record.passing != passing {
            record.passing = passing;
            Self::bump(&mut state, &self.changes);
        }
        true
    }

    /// 当前变更索引
    pub async fn index(&self) -> u64 {
        self.state.read().await.index
    }

    pub async fn contains(&self, id: &InstanceId) -> bool {
        self.state.read().await.records.contains_key(id)
    }

    pub async fn get(&self, id: &InstanceId) -> Option<InstanceDescriptor> {
        let state = self.state.read().await;
        state.records.get(id).map(|r| r.descriptor.clone())
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn bump(state: &mut State, changes: &watch::Sender<u64>) {
        state.index += 1;
        changes.send_replace(state.index);
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DiscoveryError::unreachable("in-memory registry is offline"))
        }
    }

    async fn snapshot(&self, service: &ServiceName, healthy_only: bool) -> QueryResult {
        let state = self.state.read().await;
        let entries = state
            .records
            .values()
            .filter(|r| &r.descriptor.service == service)
            .filter(|r| !healthy_only || r.passing)
            .map(|r| CatalogEntry {
                id: r.descriptor.id.clone(),
                service: r.descriptor.service.clone(),
                endpoint: r.descriptor.endpoint(),
                tags: r.descriptor.tags.clone(),
                passing: r.passing,
            })
            .collect();
        QueryResult {
            index: state.index,
            entries,
        }
    }
}

#[async_trait]
impl RegistryBackend for InMemoryRegistry {
    async fn register(&self, descriptor: &InstanceDescriptor) -> Result<()> {
        self.ensure_reachable()?;
        let mut state = self.state.write().await;
        state.records.insert(
            descriptor.id.clone(),
            Record {
                descriptor: descriptor.clone(),
                passing: self.initial_passing,
            },
        );
        Self::bump(&mut state, &self.changes);
        debug!(instance_id = %descriptor.id, index = state.index, "Instance stored");
        Ok(())
    }

    async fn deregister(&self, id: &InstanceId) -> Result<()> {
        self.ensure_reachable()?;
        let mut state = self.state.write().await;
        if state.records.remove(id).is_some() {
            Self::bump(&mut state, &self.changes);
            debug!(instance_id = %id, index = state.index, "Instance removed");
        }
        Ok(())
    }

    async fn query(&self, service: &ServiceName, healthy_only: bool) -> Result<QueryResult> {
        self.ensure_reachable()?;
        Ok(self.snapshot(service, healthy_only).await)
    }

    async fn watch(
        &self,
        service: &ServiceName,
        last_index: u64,
        wait: Duration,
    ) -> Result<QueryResult> {
        self.ensure_reachable()?;

        let mut changes = self.changes.subscribe();
        let timeout = tokio::time::sleep(wait);
        tokio::pin!(timeout);

        loop {
            let current = *changes.borrow_and_update();
            if current != last_index {
                break;
            }
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = &mut timeout => break,
            }
        }

        self.query(service, true).await
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
