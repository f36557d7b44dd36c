//! 监听任务定义

use futures::future::BoxFuture;
use std::future::Future;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// 任务执行结果
pub type TaskResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// 服务循环：接收已绑定的监听器，在取消令牌触发后退出
pub type ServeFn =
    Box<dyn FnOnce(TcpListener, CancellationToken) -> BoxFuture<'static, TaskResult> + Send>;

/// 把闭包包装为 [`ServeFn`]
pub fn serve_fn<F, Fut>(serve: F) -> ServeFn
where
    F: FnOnce(TcpListener, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    Box::new(move |listener, shutdown| Box::pin(serve(listener, shutdown)))
}
