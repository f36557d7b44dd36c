//! 调用传输层
//!
//! 区分两类失败：端点不可达（可以换下一个端点重试）和端点返回的应用错误（原样返回）

use super::pool::ChannelPool;
use crate::discovery::instance::Endpoint;
use crate::error::{TransportError, TransportErrorKind};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::marker::PhantomData;
use std::sync::Arc;
use tonic::transport::Channel;
use tonic::Status;

/// 单次调用失败
#[derive(Debug)]
pub enum CallError {
    /// 端点不可达，可以尝试下一个端点
    Transport(TransportError),
    /// 端点明确返回的错误
    Application(Status),
}

/// 在指定端点上发起一次调用
#[async_trait]
pub trait Transport: Send + Sync {
    type Request: Clone + Send + Sync + 'static;
    type Response: Send + 'static;

    async fn call(
        &self,
        endpoint: &Endpoint,
        request: Self::Request,
    ) -> Result<Self::Response, CallError>;
}

/// 基于 tonic 的传输
///
/// `call` 接收池中的 Channel，通常在其中构造生成的客户端并调用一个方法：
///
/// ```rust,no_run
/// use flare_discovery::client::{ChannelPool, GrpcTransport};
/// use std::sync::Arc;
/// use tonic_health::pb::{HealthCheckRequest, health_client::HealthClient};
///
/// let transport = GrpcTransport::new(
///     Arc::new(ChannelPool::default()),
///     |channel, request: HealthCheckRequest| {
///         Box::pin(async move {
///             let response = HealthClient::new(channel).check(request).await?;
///             Ok::<_, tonic::Status>(response.into_inner())
///         })
///     },
/// );
/// ```
pub struct GrpcTransport<Req, Resp, F> {
    pool: Arc<ChannelPool>,
    call: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> GrpcTransport<Req, Resp, F>
where
    F: Fn(Channel, Req) -> BoxFuture<'static, Result<Resp, Status>> + Send + Sync,
{
    pub fn new(pool: Arc<ChannelPool>, call: F) -> Self {
        Self {
            pool,
            call,
            _marker: PhantomData,
        }
    }

    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }
}

#[async_trait]
impl<Req, Resp, F> Transport for GrpcTransport<Req, Resp, F>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
    F: Fn(Channel, Req) -> BoxFuture<'static, Result<Resp, Status>> + Send + Sync,
{
    type Request = Req;
    type Response = Resp;

    async fn call(&self, endpoint: &Endpoint, request: Req) -> Result<Resp, CallError> {
        let channel = self.pool.channel(endpoint).map_err(CallError::Transport)?;
        (self.call)(channel, request)
            .await
            .map_err(|status| classify_status(endpoint, status))
    }
}

/// 由 tonic 传输错误产生的状态视为传输失败，其余为应用错误
///
/// 服务端处理器主动返回的 `UNAVAILABLE` 没有传输错误来源，按应用错误原样透传
pub fn classify_status(endpoint: &Endpoint, status: Status) -> CallError {
    if caused_by_transport(&status) {
        return CallError::Transport(TransportError::new(
            endpoint.clone(),
            TransportErrorKind::Connect,
            status.message(),
        ));
    }
    CallError::Application(status)
}

fn caused_by_transport(status: &Status) -> bool {
    let mut source = std::error::Error::source(status);
    while let Some(err) = source {
        if err.downcast_ref::<tonic::transport::Error>().is_some() {
            return true;
        }
        source = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    fn endpoint() -> Endpoint {
        Endpoint::new("127.0.0.1", 50051)
    }

    #[test]
    fn handler_unavailable_is_passed_through() {
        let err = classify_status(&endpoint(), Status::unavailable("maintenance mode"));
        match err {
            CallError::Application(status) => {
                assert_eq!(status.code(), Code::Unavailable);
                assert_eq!(status.message(), "maintenance mode");
            }
            CallError::Transport(e) => panic!("unexpected transport error: {e}"),
        }
    }

    #[test]
    fn other_codes_are_application_errors() {
        for status in [
            Status::not_found("missing"),
            Status::invalid_argument("bad"),
            Status::internal("boom"),
        ] {
            let code = status.code();
            match classify_status(&endpoint(), status) {
                CallError::Application(status) => assert_eq!(status.code(), code),
                CallError::Transport(e) => panic!("unexpected transport error: {e}"),
            }
        }
    }

    #[tokio::test]
    async fn refused_connection_fails_over() {
        // 绑定后立即释放，得到一个没有监听者的端口
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = GrpcTransport::new(
            Arc::new(ChannelPool::default()),
            |channel: Channel, request: tonic_health::pb::HealthCheckRequest| {
                Box::pin(async move {
                    let response = tonic_health::pb::health_client::HealthClient::new(channel)
                        .check(request)
                        .await?;
                    Ok::<_, Status>(response.into_inner())
                })
            },
        );

        let result = transport
            .call(
                &Endpoint::from(addr),
                tonic_health::pb::HealthCheckRequest::default(),
            )
            .await;
        match result {
            Err(CallError::Transport(e)) => {
                assert_eq!(e.kind, TransportErrorKind::Connect);
                assert_eq!(e.endpoint, Endpoint::from(addr));
            }
            Err(CallError::Application(status)) => panic!("unexpected application error: {status}"),
            Ok(_) => panic!("call to a closed port succeeded"),
        }
    }
}
