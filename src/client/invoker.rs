//! 负载均衡调用器
//!
//! 解析服务名，按策略给出的顺序依次尝试端点。传输失败换下一个端点，
//! 同一次调用不会重复尝试同一端点；应用错误直接返回

use super::transport::{CallError, Transport};
use crate::discovery::instance::{Endpoint, ServiceName};
use crate::discovery::resolver::Resolve;
use crate::error::{DiscoveryError, Result, TransportError};
use crate::load_balancer::LoadBalancePolicy;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 默认单次尝试超时
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(3);

/// 单次调用的取消与截止时间
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }
}

/// 调用结果及实际响应的端点
#[derive(Debug, Clone)]
pub struct Routed<R> {
    pub endpoint: Endpoint,
    pub response: R,
}

/// 负载均衡调用器
pub struct BalancedInvoker<T> {
    resolver: Arc<dyn Resolve>,
    policy: Arc<dyn LoadBalancePolicy>,
    transport: T,
    attempt_timeout: Duration,
}

impl<T: Transport> BalancedInvoker<T> {
    pub fn new(resolver: Arc<dyn Resolve>, policy: Arc<dyn LoadBalancePolicy>, transport: T) -> Self {
        Self {
            resolver,
            policy,
            transport,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// 调用服务的某个健康实例
    pub async fn call(&self, service: &ServiceName, request: T::Request) -> Result<T::Response> {
        self.call_with(service, request, &CallContext::default())
            .await
    }

    pub async fn call_with(
        &self,
        service: &ServiceName,
        request: T::Request,
        ctx: &CallContext,
    ) -> Result<T::Response> {
        Ok(self.call_routed(service, request, ctx).await?.response)
    }

    /// 调用并返回实际响应的端点
    pub async fn call_routed(
        &self,
        service: &ServiceName,
        request: T::Request,
        ctx: &CallContext,
    ) -> Result<Routed<T::Response>> {
        let cancelled = || DiscoveryError::Cancelled(service.to_string());
        let deadline_exceeded = || DiscoveryError::DeadlineExceeded(service.to_string());

        if ctx.cancel.is_cancelled() {
            return Err(cancelled());
        }

        let set = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(cancelled()),
            set = self.resolver.resolve(service) => set?,
        };
        let plan = self.policy.plan(&set);
        debug!(
            service = %service,
            generation = set.generation,
            policy = self.policy.name(),
            candidates = plan.len(),
            "Call planned"
        );

        let mut attempts = 0;
        let mut last_error: Option<TransportError> = None;

        for index in plan {
            let endpoint = &set.endpoints()[index];
            if ctx.cancel.is_cancelled() {
                return Err(cancelled());
            }
            let budget = match ctx.deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(deadline_exceeded());
                    }
                    self.attempt_timeout.min(deadline - now)
                }
                None => self.attempt_timeout,
            };

            attempts += 1;
            self.policy.record(&set, endpoint);
            debug!(service = %service, endpoint = %endpoint, attempt = attempts, "Dispatching call");

            let outcome = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(cancelled()),
                outcome = tokio::time::timeout(budget, self.transport.call(endpoint, request.clone())) => outcome,
            };

            let failure = match outcome {
                Ok(Ok(response)) => {
                    return Ok(Routed {
                        endpoint: endpoint.clone(),
                        response,
                    });
                }
                Ok(Err(CallError::Application(status))) => {
                    return Err(DiscoveryError::Application {
                        endpoint: endpoint.clone(),
                        status,
                    });
                }
                Ok(Err(CallError::Transport(err))) => err,
                Err(_) => {
                    if ctx.deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(deadline_exceeded());
                    }
                    TransportError::timeout(
                        endpoint.clone(),
                        format!("no response within {:?}", budget),
                    )
                }
            };

            warn!(
                service = %service,
                endpoint = %endpoint,
                attempt = attempts,
                error = %failure,
                "⚠️ Endpoint failed, trying next"
            );
            last_error = Some(failure);
        }

        match last_error {
            Some(source) => Err(DiscoveryError::AllEndpointsFailed {
                service: service.to_string(),
                attempts,
                source,
            }),
            None => Err(DiscoveryError::NoHealthyInstances(service.to_string())),
        }
    }
}

/// `tower::Service` 的请求
#[derive(Debug, Clone)]
pub struct Invocation<Req> {
    pub service: ServiceName,
    pub request: Req,
    pub context: CallContext,
}

impl<Req> Invocation<Req> {
    pub fn new(service: impl Into<ServiceName>, request: Req) -> Self {
        Self {
            service: service.into(),
            request,
            context: CallContext::default(),
        }
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }
}

/// 以 `tower::Service` 形式暴露调用器，便于叠加 tower 中间件
pub struct InvokerService<T> {
    invoker: Arc<BalancedInvoker<T>>,
}

impl<T> InvokerService<T> {
    pub fn new(invoker: Arc<BalancedInvoker<T>>) -> Self {
        Self { invoker }
    }
}

impl<T> Clone for InvokerService<T> {
    fn clone(&self) -> Self {
        Self {
            invoker: self.invoker.clone(),
        }
    }
}

impl<T> tower::Service<Invocation<T::Request>> for InvokerService<T>
where
    T: Transport + 'static,
{
    type Response = T::Response;
    type Error = DiscoveryError;
    type Future = BoxFuture<'static, Result<T::Response>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, invocation: Invocation<T::Request>) -> Self::Future {
        let invoker = self.invoker.clone();
        Box::pin(async move {
            invoker
                .call_with(&invocation.service, invocation.request, &invocation.context)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::resolver::ResolvedEndpointSet;
    use crate::load_balancer::RoundRobin;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tonic::Status;
    use tower::ServiceExt;

    struct StaticResolver(Arc<ResolvedEndpointSet>);

    #[async_trait]
    impl Resolve for StaticResolver {
        async fn resolve(&self, _service: &ServiceName) -> Result<Arc<ResolvedEndpointSet>> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct Scripted {
        down: HashSet<u16>,
        rejecting: HashSet<u16>,
        hanging: HashSet<u16>,
        seen: Mutex<Vec<u16>>,
    }

    #[async_trait]
    impl Transport for Scripted {
        type Request = ();
        type Response = u16;

        async fn call(&self, endpoint: &Endpoint, _request: ()) -> std::result::Result<u16, CallError> {
            self.seen.lock().unwrap().push(endpoint.port);
            if self.hanging.contains(&endpoint.port) {
                std::future::pending::<()>().await;
            }
            if self.down.contains(&endpoint.port) {
                return Err(CallError::Transport(TransportError::connect(
                    endpoint.clone(),
                    "connection refused",
                )));
            }
            if self.rejecting.contains(&endpoint.port) {
                return Err(CallError::Application(Status::not_found("no such user")));
            }
            Ok(endpoint.port)
        }
    }

    fn invoker(ports: &[u16], transport: Scripted) -> BalancedInvoker<Scripted> {
        let set = ResolvedEndpointSet::new(
            ServiceName::from("hello"),
            1,
            ports.iter().map(|&p| Endpoint::new("127.0.0.1", p)).collect(),
        );
        BalancedInvoker::new(
            Arc::new(StaticResolver(Arc::new(set))),
            Arc::new(RoundRobin::new()),
            transport,
        )
        .with_attempt_timeout(Duration::from_millis(50))
    }

    fn hello() -> ServiceName {
        ServiceName::from("hello")
    }

    #[tokio::test]
    async fn alternates_between_endpoints() {
        let invoker = invoker(&[50051, 50052], Scripted::default());

        let mut ports = Vec::new();
        for _ in 0..4 {
            ports.push(invoker.call(&hello(), ()).await.unwrap());
        }
        assert_eq!(ports, vec![50051, 50052, 50051, 50052]);
    }

    #[tokio::test]
    async fn fails_over_to_the_next_endpoint() {
        let transport = Scripted {
            down: HashSet::from([50051]),
            ..Default::default()
        };
        let invoker = invoker(&[50051, 50052], transport);

        let routed = invoker
            .call_routed(&hello(), (), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(routed.endpoint.port, 50052);
        assert_eq!(*invoker.transport().seen.lock().unwrap(), vec![50051, 50052]);
    }

    #[tokio::test]
    async fn exhausting_endpoints_reports_last_error() {
        let transport = Scripted {
            down: HashSet::from([50051, 50052]),
            ..Default::default()
        };
        let invoker = invoker(&[50051, 50052], transport);

        let err = invoker.call(&hello(), ()).await.unwrap_err();
        match err {
            DiscoveryError::AllEndpointsFailed {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(source.endpoint.port, 50052);
            }
            other => panic!("unexpected error: {other}"),
        }
        // 每个端点只尝试一次
        assert_eq!(invoker.transport().seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn application_errors_are_not_retried() {
        let transport = Scripted {
            rejecting: HashSet::from([50051]),
            ..Default::default()
        };
        let invoker = invoker(&[50051, 50052], transport);

        let err = invoker.call(&hello(), ()).await.unwrap_err();
        match err {
            DiscoveryError::Application { endpoint, status } => {
                assert_eq!(endpoint.port, 50051);
                assert_eq!(status.code(), tonic::Code::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*invoker.transport().seen.lock().unwrap(), vec![50051]);
    }

    #[tokio::test]
    async fn slow_endpoint_times_out_and_fails_over() {
        let transport = Scripted {
            hanging: HashSet::from([50051]),
            ..Default::default()
        };
        let invoker = invoker(&[50051, 50052], transport);

        assert_eq!(invoker.call(&hello(), ()).await.unwrap(), 50052);
    }

    #[tokio::test]
    async fn cancellation_stops_without_retry() {
        let transport = Scripted {
            hanging: HashSet::from([50051, 50052]),
            ..Default::default()
        };
        let invoker = invoker(&[50051, 50052], transport).with_attempt_timeout(Duration::from_secs(30));

        let ctx = CallContext::default();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = invoker.call_with(&hello(), (), &ctx).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Cancelled(_)));
        assert_eq!(*invoker.transport().seen.lock().unwrap(), vec![50051]);
    }

    #[tokio::test]
    async fn passed_deadline_ends_the_call() {
        let transport = Scripted {
            hanging: HashSet::from([50051, 50052]),
            ..Default::default()
        };
        let invoker = invoker(&[50051, 50052], transport).with_attempt_timeout(Duration::from_secs(30));

        let ctx = CallContext::new().with_timeout(Duration::from_millis(30));
        let err = invoker.call_with(&hello(), (), &ctx).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn works_as_a_tower_service() {
        let invoker = Arc::new(invoker(&[50051, 50052], Scripted::default()));
        let service = InvokerService::new(invoker);

        let port = service
            .clone()
            .oneshot(Invocation::new("hello", ()))
            .await
            .unwrap();
        assert_eq!(port, 50051);
        let port = service.oneshot(Invocation::new("hello", ())).await.unwrap();
        assert_eq!(port, 50052);
    }
}
