//! Consul 注册中心集成测试
//!
//! 使用 wiremock 模拟 Consul agent 的 HTTP API

use flare_discovery::discovery::{Endpoint, InstanceDescriptor, InstanceId, ServiceName};
use flare_discovery::error::DiscoveryError;
use flare_discovery::health::HealthCheckSpec;
use flare_discovery::registry::{ConsulRegistry, RegistryBackend, RegistryClient};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn consul(server: &MockServer) -> ConsulRegistry {
    ConsulRegistry::new(&server.uri(), None, None, Duration::from_secs(2)).unwrap()
}

fn hello_descriptor() -> InstanceDescriptor {
    let health = HealthCheckSpec::grpc(Endpoint::new("10.0.0.5", 50051))
        .with_service("hello")
        .with_interval(Duration::from_secs(10))
        .with_timeout(Duration::from_secs(5))
        .with_deregister_after(Duration::from_secs(60));
    InstanceDescriptor::new("10.0.0.5", 50051, "hello", health).with_tags(["tagFoo", "tagBar"])
}

fn health_entries() -> serde_json::Value {
    json!([
        {
            "Node": { "Node": "node-1", "Address": "10.0.0.1" },
            "Service": {
                "ID": "10.0.0.1:50051[hello]",
                "Service": "hello",
                "Address": "",
                "Port": 50051,
                "Tags": null
            },
            "Checks": [{ "Status": "passing" }]
        },
        {
            "Node": { "Node": "node-2", "Address": "10.0.0.2" },
            "Service": {
                "ID": "10.0.0.9:50052[hello]",
                "Service": "hello",
                "Address": "10.0.0.9",
                "Port": 50052,
                "Tags": ["tagFoo"]
            },
            "Checks": [{ "Status": "passing" }, { "Status": "critical" }]
        }
    ])
}

/// 注册请求携带实例 ID、标签和 gRPC 检查
#[tokio::test]
async fn test_register_sends_service_definition() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/agent/service/register"))
        .and(query_param("replace-existing-checks", "true"))
        .and(body_partial_json(json!({
            "ID": "10.0.0.5:50051[hello]",
            "Name": "hello",
            "Tags": ["tagFoo", "tagBar"],
            "Address": "10.0.0.5",
            "Port": 50051,
            "Check": {
                "GRPC": "10.0.0.5:50051/hello",
                "GRPCUseTLS": false,
                "Interval": "10s",
                "Timeout": "5s",
                "DeregisterCriticalServiceAfter": "1m"
            }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = RegistryClient::new(Arc::new(consul(&server)));
    let id = client.register_descriptor(hello_descriptor()).await.unwrap();
    assert_eq!(id.as_str(), "10.0.0.5:50051[hello]");
}

/// 配置了 token 时每个请求都带上 X-Consul-Token
#[tokio::test]
async fn test_token_header_is_sent() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/agent/service/register"))
        .and(header("X-Consul-Token", "secret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let registry = ConsulRegistry::new(
        &server.uri(),
        Some("secret".to_string()),
        None,
        Duration::from_secs(2),
    )
    .unwrap();
    registry.register(&hello_descriptor()).await.unwrap();
}

/// 注销未知实例（404）视为成功
#[tokio::test]
async fn test_deregister_unknown_instance_is_ok() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/agent/service/deregister/10.0.0.5:50051[hello]"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Unknown service ID"))
        .expect(1)
        .mount(&server)
        .await;

    let registry = consul(&server);
    let id = InstanceId::from_raw("10.0.0.5:50051[hello]");
    assert!(registry.deregister(&id).await.is_ok());
}

/// 查询结果：服务地址为空时回退到节点地址，任一检查非 passing 即不健康
#[tokio::test]
async fn test_query_maps_health_entries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/health/service/hello"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Consul-Index", "42")
                .set_body_json(health_entries()),
        )
        .mount(&server)
        .await;

    let registry = consul(&server);
    let result = registry
        .query(&ServiceName::from("hello"), false)
        .await
        .unwrap();

    assert_eq!(result.index, 42);
    assert_eq!(result.entries.len(), 2);

    let first = &result.entries[0];
    assert_eq!(first.endpoint, Endpoint::new("10.0.0.1", 50051));
    assert!(first.tags.is_empty());
    assert!(first.passing);

    let second = &result.entries[1];
    assert_eq!(second.endpoint, Endpoint::new("10.0.0.9", 50052));
    assert_eq!(second.tags, vec!["tagFoo".to_string()]);
    assert!(!second.passing);
}

/// 健康查询带 passing 参数，阻塞查询带 index 与 wait
#[tokio::test]
async fn test_watch_uses_blocking_query() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/health/service/hello"))
        .and(query_param("passing", "true"))
        .and(query_param("index", "7"))
        .and(query_param("wait", "30s"))
        .and(query_param("dc", "dc1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Consul-Index", "8")
                .set_body_json(json!([])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let registry = ConsulRegistry::new(
        &server.uri(),
        None,
        Some("dc1".to_string()),
        Duration::from_secs(2),
    )
    .unwrap();
    let result = registry
        .watch(&ServiceName::from("hello"), 7, Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(result.index, 8);
    assert!(result.entries.is_empty());
}

#[tokio::test]
async fn test_server_error_is_unreachable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/health/service/hello"))
        .respond_with(ResponseTemplate::new(500).set_body_string("No cluster leader"))
        .mount(&server)
        .await;

    let err = consul(&server)
        .query(&ServiceName::from("hello"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::RegistryUnreachable(_)), "{err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_client_error_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/agent/service/register"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Permission denied"))
        .mount(&server)
        .await;

    let err = consul(&server)
        .register(&hello_descriptor())
        .await
        .unwrap_err();
    match err {
        DiscoveryError::RegistryRejected { status, message } => {
            assert_eq!(status, 403);
            assert_eq!(message, "Permission denied");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/health/service/hello"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Consul-Index", "3")
                .set_body_string("{not json"),
        )
        .mount(&server)
        .await;

    let err = consul(&server)
        .query(&ServiceName::from("hello"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::MalformedResponse(_)), "{err:?}");
}

#[tokio::test]
async fn test_missing_index_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/health/service/hello"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let err = consul(&server)
        .query(&ServiceName::from("hello"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::MalformedResponse(_)), "{err:?}");
}

/// agent 不可达时返回 RegistryUnreachable
#[tokio::test]
async fn test_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let registry = ConsulRegistry::new(
        &format!("http://{}", address),
        None,
        None,
        Duration::from_secs(2),
    )
    .unwrap();
    let err = registry
        .query(&ServiceName::from("hello"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::RegistryUnreachable(_)), "{err:?}");
}
