//! Flare Discovery
//!
//! gRPC 服务的注册、健康检查、服务发现与客户端负载均衡：
//!
//! - [`registry`]：把实例连同健康检查注册到 Consul（或进程内注册中心）
//! - [`discovery`]：把服务名解析为健康端点集合，一次性查询或持续监听
//! - [`client`]：按负载均衡策略调用健康实例，端点不可达时自动转移
//! - [`runtime`]：监听器就绪后注册，收到终止信号后注销

pub mod config;
pub mod error;
pub mod telemetry;

pub mod client;
pub mod discovery;
pub mod health;
pub mod load_balancer;
pub mod registry;
pub mod server;
pub mod utils;

// 生命周期管理
pub mod runtime;

// Re-exports
pub use config::Config;
pub use error::{DiscoveryError, ErrorCategory, ErrorCode, Result, TransportError};

pub use client::{BalancedInvoker, CallContext, ChannelPool, GrpcTransport, Transport};
pub use discovery::{
    Endpoint, InstanceDescriptor, InstanceId, OneShotResolver, Resolve, ResolveStrategy,
    ResolvedEndpointSet, ServiceName, WatchingResolver, create_resolver, instance_id,
};
pub use health::{HealthAnnouncer, HealthCheckSpec, HealthService, HealthTarget};
pub use load_balancer::{LoadBalancePolicy, LoadBalanceStrategy};
pub use registry::{
    ConsulRegistry, InMemoryRegistry, RegistryBackend, RegistryClient, create_registry,
};
pub use runtime::{InstanceSpec, LifecycleController, ReadyCheck, RuntimeConfig, ServedInstance};
pub use server::GrpcServer;
