//! gRPC 服务端模块
//!
//! 在预先绑定的监听器上运行 tonic 服务，并附带 `grpc.health.v1` 健康检查服务，
//! 注册中心的 gRPC 检查探测的就是这个端口

use crate::discovery::instance::ServiceName;
use crate::health::{HealthService, HealthStatus};
use crate::runtime::task::{ServeFn, TaskResult, serve_fn};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tonic::transport::Server;
use tracing::info;

/// 服务端配置
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub concurrency_limit_per_connection: Option<usize>,
    pub timeout: Option<Duration>,
    pub http2_keepalive_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit_per_connection: Some(1000),
            timeout: None,
            http2_keepalive_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// gRPC 服务器
#[derive(Default)]
pub struct GrpcServer {
    config: ServerConfig,
    routes: Routes,
}

impl GrpcServer {
    /// 使用业务服务路由创建
    pub fn new(routes: Routes) -> Self {
        Self {
            config: ServerConfig::default(),
            routes,
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// 生成服务循环
    ///
    /// 启动时把整个 server 和 `service` 标记为 SERVING，收到关闭信号时标记为 NOT_SERVING
    pub fn serve_fn(self, service: impl Into<ServiceName>) -> ServeFn {
        let service = service.into();
        serve_fn(move |listener, shutdown| self.serve(service, listener, shutdown))
    }

    async fn serve(
        self,
        service: ServiceName,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> TaskResult {
        let (health, health_server) = HealthService::new();
        health.set_status("", HealthStatus::Serving).await;
        health
            .set_status(service.as_str(), HealthStatus::Serving)
            .await;

        let mut builder = Server::builder().http2_keepalive_interval(self.config.http2_keepalive_interval);
        if let Some(limit) = self.config.concurrency_limit_per_connection {
            builder = builder.concurrency_limit_per_connection(limit);
        }
        if let Some(timeout) = self.config.timeout {
            builder = builder.timeout(timeout);
        }

        let local = listener.local_addr()?;
        info!(service = %service, address = %local, "gRPC server listening");

        let signal = {
            let health = health.clone();
            async move {
                shutdown.cancelled().await;
                health.set_not_serving().await;
            }
        };

        builder
            .add_routes(self.routes)
            .add_service(health_server)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await?;
        Ok(())
    }
}
