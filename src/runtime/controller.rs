//! 生命周期控制
//!
//! 启动顺序：绑定全部监听器，启动服务循环，等待可连接，并发注册。
//! 关闭顺序：并发注销本控制器注册的实例，停止服务循环，超时后强制中止

use super::signal::wait_for_termination;
use super::task::{ServeFn, TaskResult};
use crate::discovery::instance::{Endpoint, InstanceDescriptor, InstanceId, ServiceName, validate_address};
use crate::error::{DiscoveryError, Result};
use crate::health::HealthAnnouncer;
use crate::registry::RegistryClient;
use crate::utils::wait_for_server_ready;
use futures::future::join_all;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 注册前的就绪探测
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyCheck {
    /// 服务循环启动后立即注册
    Skip,
    /// 期限内监听器可连接才注册，超时的实例计入失败
    Within(Duration),
}

/// 控制器的时间参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub ready_check: ReadyCheck,
    /// 取消服务循环后等待其退出的时长，超过则中止
    pub shutdown_grace: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ready_check: ReadyCheck::Within(Duration::from_secs(30)),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl RuntimeConfig {
    pub fn with_ready_check(mut self, ready_check: ReadyCheck) -> Self {
        self.ready_check = ready_check;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// 一个待启动实例的注册信息
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub service_name: ServiceName,
    /// 注册中心中公布的地址
    pub address: String,
    /// 为 0 时绑定临时端口并公布实际端口
    pub port: u16,
    /// 监听地址，缺省时与 `address` 相同
    pub bind_address: Option<String>,
    pub tags: Vec<String>,
    pub health: HealthAnnouncer,
}

impl InstanceSpec {
    pub fn new(service_name: impl Into<ServiceName>, address: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            address: address.into(),
            port,
            bind_address: None,
            tags: Vec::new(),
            health: HealthAnnouncer::default(),
        }
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = Some(bind_address.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_health(mut self, health: HealthAnnouncer) -> Self {
        self.health = health;
        self
    }

    fn bind_host(&self) -> &str {
        self.bind_address.as_deref().unwrap_or(&self.address)
    }
}

/// 实例及其服务循环
pub struct ServedInstance {
    pub spec: InstanceSpec,
    pub serve: ServeFn,
}

impl ServedInstance {
    pub fn new(spec: InstanceSpec, serve: ServeFn) -> Self {
        Self { spec, serve }
    }
}

/// 启动结果
#[derive(Debug, Default)]
pub struct StartReport {
    /// 已注册的实例
    pub registered: Vec<InstanceId>,
    /// 未能注册的实例（监听器仍在运行）
    pub failed: Vec<(InstanceId, DiscoveryError)>,
    /// 所有监听端点（使用实际端口）
    pub listening: Vec<Endpoint>,
}

/// 关闭结果
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub deregistered: Vec<InstanceId>,
    pub failed: Vec<(InstanceId, DiscoveryError)>,
    /// 服务循环未在超时内退出而被中止
    pub aborted: bool,
}

/// 生命周期控制器
///
/// 只注销自己注册的实例；多个控制器可以在同一进程中共存
pub struct LifecycleController {
    registry: RegistryClient,
    config: RuntimeConfig,
    owned: Vec<InstanceId>,
    listeners: JoinSet<TaskResult>,
    shutdown: CancellationToken,
}

impl LifecycleController {
    pub fn new(registry: RegistryClient, config: RuntimeConfig) -> Self {
        Self {
            registry,
            config,
            owned: Vec::new(),
            listeners: JoinSet::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// 当前已注册且尚未注销的实例
    pub fn owned(&self) -> &[InstanceId] {
        &self.owned
    }

    /// 仍在运行的服务循环数量
    pub fn running_listeners(&self) -> usize {
        self.listeners.len()
    }

    /// 启动所有实例并注册
    ///
    /// 任一监听器绑定失败时返回错误，此时不会启动任何服务循环
    pub async fn start(&mut self, instances: Vec<ServedInstance>) -> Result<StartReport> {
        info!(instances = instances.len(), "🚀 Starting service instances");

        let mut bound = Vec::with_capacity(instances.len());
        for instance in instances {
            instance
                .spec
                .service_name
                .validate()
                .and_then(|_| validate_address(&instance.spec.address))
                .map_err(DiscoveryError::InvalidDescriptor)?;

            let host = instance.spec.bind_host().to_string();
            let listener = TcpListener::bind((host.as_str(), instance.spec.port))
                .await
                .map_err(|e| {
                    error!(
                        service = %instance.spec.service_name,
                        address = %host,
                        port = instance.spec.port,
                        error = %e,
                        "❌ Failed to bind listener"
                    );
                    DiscoveryError::Io(e)
                })?;
            let local = listener.local_addr()?;
            bound.push((instance, listener, local));
        }

        let mut report = StartReport::default();
        let mut pending: Vec<(InstanceDescriptor, SocketAddr)> = Vec::with_capacity(bound.len());

        for (instance, listener, local) in bound {
            let spec = instance.spec;
            let endpoint = Endpoint::new(spec.address.clone(), local.port());
            let health = spec.health.announce(&endpoint, &spec.service_name);
            let descriptor = InstanceDescriptor::new(
                spec.address.clone(),
                local.port(),
                spec.service_name.clone(),
                health,
            )
            .with_tags(spec.tags.clone());

            let service = spec.service_name.clone();
            let listening = endpoint.clone();
            let serve = (instance.serve)(listener, self.shutdown.child_token());
            self.listeners.spawn(async move {
                let result = serve.await;
                match &result {
                    Ok(_) => info!(service = %service, endpoint = %listening, "✅ Listener stopped"),
                    Err(e) => {
                        error!(service = %service, endpoint = %listening, error = %e, "❌ Listener failed")
                    }
                }
                result
            });

            info!(service = %spec.service_name, endpoint = %endpoint, bind = %local, "Listener started");
            report.listening.push(endpoint);
            pending.push((descriptor, local));
        }

        let ready: Vec<InstanceDescriptor> = if let ReadyCheck::Within(limit) = self.config.ready_check {
            let checks = join_all(
                pending
                    .iter()
                    .map(|(_, local)| wait_for_server_ready(*local, limit)),
            )
            .await;

            let mut ready = Vec::with_capacity(pending.len());
            for ((descriptor, _), check) in pending.into_iter().zip(checks) {
                match check {
                    Ok(()) => ready.push(descriptor),
                    Err(e) => {
                        error!(
                            service = %descriptor.service,
                            instance_id = %descriptor.id,
                            error = %e,
                            "❌ Listener not ready, skipping registration"
                        );
                        report.failed.push((descriptor.id, e));
                    }
                }
            }
            ready
        } else {
            pending.into_iter().map(|(descriptor, _)| descriptor).collect()
        };

        let results = join_all(
            ready
                .iter()
                .map(|descriptor| self.registry.register_descriptor(descriptor.clone())),
        )
        .await;

        for (descriptor, result) in ready.into_iter().zip(results) {
            match result {
                Ok(id) => {
                    self.owned.push(id.clone());
                    report.registered.push(id);
                }
                Err(e) => {
                    error!(
                        service = %descriptor.service,
                        instance_id = %descriptor.id,
                        error = %e,
                        "❌ Failed to register instance"
                    );
                    report.failed.push((descriptor.id, e));
                }
            }
        }

        info!(
            registered = report.registered.len(),
            failed = report.failed.len(),
            "✅ Service instances started"
        );
        Ok(report)
    }

    /// 等待 SIGINT / SIGTERM（非 unix 平台为 Ctrl+C）
    pub async fn await_termination(&self) -> Result<()> {
        let signal = wait_for_termination().await?;
        info!(signal, "Shutdown signal received");
        Ok(())
    }

    /// 等待自定义的终止触发
    pub async fn await_termination_on<F>(&self, trigger: F)
    where
        F: Future<Output = ()>,
    {
        trigger.await;
        info!("Shutdown trigger fired");
    }

    /// 注销实例并停止服务循环
    ///
    /// 注销失败只记录告警，不影响后续步骤；重复调用不做任何事
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let owned = std::mem::take(&mut self.owned);
        let mut report = ShutdownReport::default();
        if owned.is_empty() && self.listeners.is_empty() {
            return report;
        }

        info!(instances = owned.len(), "🛑 Shutting down, deregistering instances");
        let results = join_all(owned.iter().map(|id| self.registry.deregister(id))).await;
        for (id, result) in owned.into_iter().zip(results) {
            match result {
                Ok(()) => report.deregistered.push(id),
                Err(e) => {
                    warn!(instance_id = %id, error = %e, "⚠️ Failed to deregister instance");
                    report.failed.push((id, e));
                }
            }
        }

        self.shutdown.cancel();
        report.aborted = !self.wait_for_listeners().await;
        self.shutdown = CancellationToken::new();

        info!(
            deregistered = report.deregistered.len(),
            failed = report.failed.len(),
            "Service instances stopped"
        );
        report
    }

    /// 启动、等待终止信号、关闭
    pub async fn run(mut self, instances: Vec<ServedInstance>) -> anyhow::Result<ShutdownReport> {
        self.start(instances).await?;
        self.await_termination().await?;
        Ok(self.shutdown().await)
    }

    /// 等待服务循环退出，超时返回 false 并中止剩余任务
    async fn wait_for_listeners(&mut self) -> bool {
        let listeners = &mut self.listeners;
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(result) = listeners.join_next().await {
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        warn!("Listener join error: {}", e);
                    }
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                info!("All listeners stopped");
                true
            }
            Err(_) => {
                warn!("Listeners shutdown timeout, aborting");
                self.listeners.abort_all();
                while self.listeners.join_next().await.is_some() {}
                false
            }
        }
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        if !self.owned.is_empty() {
            warn!(
                instances = self.owned.len(),
                "⚠️ Controller dropped without shutdown, instances remain registered until their health checks fail"
            );
        }
        self.shutdown.cancel();
    }
}
