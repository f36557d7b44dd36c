//! 演示程序
//!
//! 启动两个 `hello` 实例并注册，然后分别用一次性解析和监听式解析经负载均衡调用，
//! 收到 SIGINT / SIGTERM 后注销并退出。
//!
//! 配置文件路径取第一个参数或 `FLARE_DISCOVERY_CONFIG`，缺省时使用内置配置

use anyhow::Context;
use flare_discovery::client::{BalancedInvoker, CallContext, ChannelPool, GrpcTransport};
use flare_discovery::config::{Config, InstanceConfig};
use flare_discovery::discovery::{ResolveStrategy, ServiceName, create_resolver};
use flare_discovery::error::DiscoveryError;
use flare_discovery::registry::{RegistryClient, create_registry};
use flare_discovery::runtime::{InstanceSpec, LifecycleController, ServedInstance};
use flare_discovery::server::GrpcServer;
use flare_discovery::telemetry::init_tracing;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::{HealthCheckRequest, HealthCheckResponse};
use tracing::{info, warn};

const CONFIG_ENV: &str = "FLARE_DISCOVERY_CONFIG";
const RESOLVE_ATTEMPTS: usize = 10;

fn load_config() -> anyhow::Result<Config> {
    let path = std::env::args().nth(1).or_else(|| std::env::var(CONFIG_ENV).ok());
    let mut config = match path {
        Some(path) => Config::load_from_file(&path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => Config::default(),
    };
    if config.instances.is_empty() {
        config.instances = [50051, 50052]
            .into_iter()
            .map(|port| InstanceConfig {
                service_name: "hello".to_string(),
                address: "127.0.0.1".to_string(),
                port,
                bind_address: None,
                tags: vec!["tagFoo".to_string(), "tagBar".to_string()],
            })
            .collect();
    }
    config.apply_process_env()?;
    Ok(config)
}

async fn health_check(
    channel: Channel,
    request: HealthCheckRequest,
) -> Result<HealthCheckResponse, tonic::Status> {
    let response = HealthClient::new(channel).check(request).await?;
    Ok(response.into_inner())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config.logging);

    let backend = create_registry(&config.registry)?;
    let registry = RegistryClient::new(backend.clone());
    let mut controller = LifecycleController::new(registry, config.runtime.runtime_config());

    let announcer = config.health.announcer();
    let instances = config
        .instances
        .iter()
        .map(|instance| {
            let mut spec = InstanceSpec::new(
                instance.service_name.as_str(),
                instance.address.clone(),
                instance.port,
            )
            .with_tags(instance.tags.clone())
            .with_health(announcer);
            if let Some(bind) = &instance.bind_address {
                spec = spec.with_bind_address(bind.clone());
            }
            let serve = GrpcServer::default().serve_fn(instance.service_name.as_str());
            ServedInstance::new(spec, serve)
        })
        .collect();

    let report = controller.start(instances).await?;
    for (id, error) in &report.failed {
        warn!(instance_id = %id, error = %error, "Instance is serving but not registered");
    }

    let pool = Arc::new(ChannelPool::new(config.invoker.client_config()));
    let reaper_cancel = CancellationToken::new();
    let reaper = pool.clone().spawn_idle_reaper(
        config.invoker.idle_timeout(),
        config.invoker.idle_timeout(),
        reaper_cancel.clone(),
    );

    let service = config
        .instances
        .first()
        .map(|i| ServiceName::new(i.service_name.clone()))
        .unwrap_or_else(|| ServiceName::from("hello"));

    let configured = config.resolver.strategy()?;
    let mut strategies = vec![configured];
    strategies.extend(
        [ResolveStrategy::OneShot, ResolveStrategy::Watch]
            .into_iter()
            .filter(|s| *s != configured),
    );

    for strategy in strategies {
        let resolver = create_resolver(strategy, backend.clone(), &config.resolver);
        let transport = GrpcTransport::new(pool.clone(), |channel, request| {
            health_check(channel, request).boxed()
        });
        let invoker = BalancedInvoker::new(resolver, config.invoker.policy()?.build(), transport)
            .with_attempt_timeout(config.invoker.attempt_timeout());

        for call in 1..=2 {
            let request = HealthCheckRequest {
                service: service.to_string(),
            };
            match call_when_healthy(&invoker, &service, request).await {
                Ok((endpoint, status)) => info!(
                    strategy = %strategy,
                    call,
                    endpoint = %endpoint,
                    status,
                    "📨 Call routed"
                ),
                Err(e) => warn!(strategy = %strategy, call, error = %e, "Call failed"),
            }
        }
    }

    info!("Press Ctrl+C to stop");
    controller.await_termination().await?;
    let shutdown = controller.shutdown().await;
    info!(
        deregistered = shutdown.deregistered.len(),
        failed = shutdown.failed.len(),
        "Demo finished"
    );

    reaper_cancel.cancel();
    let _ = reaper.await;
    Ok(())
}

type HealthInvoker<F> = BalancedInvoker<GrpcTransport<HealthCheckRequest, HealthCheckResponse, F>>;

/// 新注册的实例要等注册中心的第一次健康检查通过后才可见
async fn call_when_healthy<F>(
    invoker: &HealthInvoker<F>,
    service: &ServiceName,
    request: HealthCheckRequest,
) -> flare_discovery::Result<(String, i32)>
where
    F: Fn(Channel, HealthCheckRequest) -> BoxFuture<'static, Result<HealthCheckResponse, tonic::Status>>
        + Send
        + Sync,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let ctx = CallContext::new().with_timeout(Duration::from_secs(10));
        match invoker.call_routed(service, request.clone(), &ctx).await {
            Ok(routed) => return Ok((routed.endpoint.to_string(), routed.response.status)),
            Err(DiscoveryError::NoHealthyInstances(_)) if attempt < RESOLVE_ATTEMPTS => {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
