//! 服务生命周期管理
//!
//! 绑定监听器、就绪后注册、收到终止信号后注销并停止监听
//!
//! # 使用示例
//!
//! ```rust,no_run
//! use flare_discovery::registry::{InMemoryRegistry, RegistryClient};
//! use flare_discovery::runtime::{InstanceSpec, LifecycleController, RuntimeConfig, ServedInstance};
//! use flare_discovery::server::GrpcServer;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = RegistryClient::new(Arc::new(InMemoryRegistry::new()));
//! let controller = LifecycleController::new(registry, RuntimeConfig::default());
//!
//! let instance = ServedInstance::new(
//!     InstanceSpec::new("hello", "127.0.0.1", 50051),
//!     GrpcServer::default().serve_fn("hello"),
//! );
//! controller.run(vec![instance]).await?;
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod signal;
pub mod task;

pub use controller::{
    InstanceSpec, LifecycleController, ReadyCheck, RuntimeConfig, ServedInstance, ShutdownReport,
    StartReport,
};
pub use signal::wait_for_termination;
pub use task::{ServeFn, TaskResult, serve_fn};
