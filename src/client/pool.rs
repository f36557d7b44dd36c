//! 连接池
//!
//! 每个端点缓存一个惰性连接的 Channel。释放只丢弃池中的句柄，
//! 正在进行的调用持有自己的克隆，不受影响

use super::ClientConfig;
use crate::discovery::instance::Endpoint;
use crate::error::TransportError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint as TonicEndpoint};
use tracing::debug;

struct PooledChannel {
    channel: Channel,
    last_used: Instant,
}

/// 按端点缓存的 Channel 池
pub struct ChannelPool {
    config: ClientConfig,
    channels: Mutex<HashMap<Endpoint, PooledChannel>>,
}

impl Default for ChannelPool {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl ChannelPool {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// 获取端点的 Channel，不存在时创建（不会立即建立连接）
    pub fn channel(&self, endpoint: &Endpoint) -> Result<Channel, TransportError> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pooled) = channels.get_mut(endpoint) {
            pooled.last_used = Instant::now();
            return Ok(pooled.channel.clone());
        }

        let channel = TonicEndpoint::from_shared(endpoint.uri())
            .map_err(|e| TransportError::connect(endpoint.clone(), format!("invalid uri: {}", e)))?
            .connect_timeout(self.config.connect_timeout)
            .tcp_nodelay(self.config.tcp_nodelay)
            .tcp_keepalive(self.config.tcp_keepalive)
            .connect_lazy();

        debug!(endpoint = %endpoint, "Channel created");
        channels.insert(
            endpoint.clone(),
            PooledChannel {
                channel: channel.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(channel)
    }

    /// 释放空闲超过 `max_idle` 的 Channel，返回释放数量
    pub fn release_idle(&self, max_idle: Duration) -> usize {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let before = channels.len();
        channels.retain(|_, pooled| pooled.last_used.elapsed() < max_idle);
        before - channels.len()
    }

    /// 丢弃某个端点的 Channel
    pub fn evict(&self, endpoint: &Endpoint) -> bool {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(endpoint)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 启动后台任务，定期释放空闲 Channel
    pub fn spawn_idle_reaper(
        self: Arc<Self>,
        interval: Duration,
        max_idle: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let released = self.release_idle(max_idle);
                        if released > 0 {
                            debug!(released, "Released idle channels");
                        }
                    }
                }
            }
        })
    }
}
