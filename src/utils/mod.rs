//! 工具函数模块

use crate::error::{DiscoveryError, Result};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tracing::debug;

const INITIAL_DELAY_MS: u64 = 50; // 初始延迟 50ms
const MAX_DELAY_MS: u64 = 500; // 最大延迟 500ms
const CONNECT_TIMEOUT_MS: u64 = 100;

/// 等待服务启动就绪（通过 TCP 连接重试）
///
/// 使用指数退避策略重试连接，直到服务真正可以接受连接或超过 `limit`。
///
/// # 示例
/// ```rust,no_run
/// use flare_discovery::utils::wait_for_server_ready;
/// use std::time::Duration;
///
/// # async fn example() -> flare_discovery::Result<()> {
/// let address = "127.0.0.1:50051".parse().unwrap();
/// wait_for_server_ready(address, Duration::from_secs(10)).await?;
/// // 服务已就绪，可以进行服务注册等操作
/// # Ok(())
/// # }
/// ```
pub async fn wait_for_server_ready(address: SocketAddr, limit: Duration) -> Result<()> {
    let address = dial_address(address);
    let start = Instant::now();
    let mut delay_ms = INITIAL_DELAY_MS;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match timeout(
            Duration::from_millis(CONNECT_TIMEOUT_MS),
            TcpStream::connect(address),
        )
        .await
        {
            Ok(Ok(_)) => {
                debug!(
                    address = %address,
                    attempts = attempt,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Server is ready"
                );
                return Ok(());
            }
            Ok(Err(e)) => {
                debug!(address = %address, attempt, error = %e, "Connection attempt failed, retrying...");
            }
            Err(_) => {
                debug!(address = %address, attempt, "Connection attempt timed out, retrying...");
            }
        }

        if start.elapsed() >= limit {
            return Err(DiscoveryError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!(
                    "server at {} not ready after {:?} ({} attempts)",
                    address, limit, attempt
                ),
            )));
        }

        // 指数退避：延迟时间逐渐增加，但不超过最大值
        sleep(Duration::from_millis(delay_ms)).await;
        delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
    }
}

/// 监听在通配地址时改为连接回环地址
pub fn dial_address(address: SocketAddr) -> SocketAddr {
    match address.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), address.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), address.port())
        }
        _ => address,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn ready_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        wait_for_server_ready(address, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn times_out_without_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let err = wait_for_server_ready(address, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Io(_)));
    }

    #[test]
    fn wildcard_dials_loopback() {
        let addr: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        assert_eq!(dial_address(addr), "127.0.0.1:8080".parse().unwrap());
        let addr: SocketAddr = "[::]:8080".parse().unwrap();
        assert_eq!(dial_address(addr), "[::1]:8080".parse().unwrap());
    }
}
