//! gRPC 客户端模块
//!
//! - [`pool`]：按端点缓存的 tonic Channel
//! - [`transport`]：单个端点上的一次调用，以及传输错误和应用错误的区分
//! - [`invoker`]：解析、负载均衡与失败转移

pub mod invoker;
pub mod pool;
pub mod transport;

pub use invoker::{BalancedInvoker, CallContext, Invocation, InvokerService, Routed};
pub use pool::ChannelPool;
pub use transport::{CallError, GrpcTransport, Transport};

use std::time::Duration;

/// 客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub tcp_nodelay: bool,
    pub tcp_keepalive: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            tcp_nodelay: true,
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }
}

impl ClientConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    pub fn with_tcp_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.tcp_keepalive = keepalive;
        self
    }
}
