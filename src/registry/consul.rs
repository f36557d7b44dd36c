//! Consul 注册中心实现
//!
//! 通过 Consul agent 的 HTTP API 注册、注销和查询实例，阻塞查询用于变更通知

use super::trait_def::{QueryResult, RegistryBackend};
use crate::discovery::instance::{
    CatalogEntry, Endpoint, InstanceDescriptor, InstanceId, ServiceName,
};
use crate::error::{DiscoveryError, Result};
use crate::health::HealthTarget;
use crate::health::check::format_go_duration;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Consul 注册中心
pub struct ConsulRegistry {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    datacenter: Option<String>,
}

#[allow(non_snake_case)]
#[derive(Serialize)]
struct ConsulServiceRegistration {
    ID: String,
    Name: String,
    Tags: Vec<String>,
    Address: String,
    Port: u16,
    Check: ConsulCheck,
}

#[allow(non_snake_case)]
#[derive(Serialize)]
struct ConsulCheck {
    #[serde(skip_serializing_if = "Option::is_none")]
    GRPC: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    GRPCUseTLS: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    TCP: Option<String>,
    Interval: String,
    Timeout: String,
    DeregisterCriticalServiceAfter: String,
}

#[allow(non_snake_case)]
#[derive(Deserialize)]
struct ConsulHealthEntry {
    Node: ConsulNode,
    Service: ConsulServiceEntry,
    #[serde(default)]
    Checks: Vec<ConsulHealthCheck>,
}

#[allow(non_snake_case)]
#[derive(Deserialize)]
struct ConsulNode {
    #[serde(default)]
    Address: String,
}

#[allow(non_snake_case)]
#[derive(Deserialize)]
struct ConsulServiceEntry {
    ID: String,
    Service: String,
    #[serde(default)]
    Address: String,
    Port: u16,
    #[serde(default)]
    Tags: Option<Vec<String>>,
}

#[allow(non_snake_case)]
#[derive(Deserialize)]
struct ConsulHealthCheck {
    Status: String,
}

impl ConsulRegistry {
    /// 创建 Consul 客户端
    ///
    /// `address` 为 agent 地址，例如 `http://127.0.0.1:8500`
    pub fn new(
        address: &str,
        token: Option<String>,
        datacenter: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(address).map_err(|e| {
            DiscoveryError::config(format!("invalid Consul address `{}`: {}", address, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(DiscoveryError::config(format!(
                "invalid Consul address `{}`",
                address
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DiscoveryError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token: token.filter(|t| !t.is_empty()),
            datacenter: datacenter.filter(|dc| !dc.is_empty()),
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<Response> {
        self.authorize(request).send().await.map_err(|e| {
            DiscoveryError::unreachable(format!("Consul {} failed: {}", action, e))
        })
    }

    async fn service_entries(
        &self,
        service: &ServiceName,
        healthy_only: bool,
        blocking: Option<(u64, Duration)>,
    ) -> Result<QueryResult> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if healthy_only {
            params.push(("passing", "true".to_string()));
        }
        if let Some(dc) = &self.datacenter {
            params.push(("dc", dc.clone()));
        }

        let mut request = self
            .client
            .get(self.url(&["v1", "health", "service", service.as_str()]));
        if let Some((index, wait)) = blocking {
            params.push(("index", index.to_string()));
            params.push(("wait", format_go_duration(wait)));
            // Consul 会在 wait 基础上追加最多 wait/16 的随机抖动
            request = request.timeout(wait + wait / 16 + Duration::from_secs(5));
        }
        let request = request.query(&params);

        let response = check_status(self.send(request, "query").await?).await?;
        let index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                DiscoveryError::MalformedResponse(format!("missing or invalid {}", INDEX_HEADER))
            })?;

        let body: Vec<ConsulHealthEntry> = response.json().await.map_err(|e| {
            if e.is_decode() {
                DiscoveryError::MalformedResponse(e.to_string())
            } else {
                DiscoveryError::unreachable(format!("Consul query failed: {}", e))
            }
        })?;

        let entries = body
            .into_iter()
            .map(|entry| {
                let address = if entry.Service.Address.is_empty() {
                    entry.Node.Address
                } else {
                    entry.Service.Address
                };
                CatalogEntry {
                    id: InstanceId::from_raw(entry.Service.ID),
                    service: ServiceName::new(entry.Service.Service),
                    endpoint: Endpoint::new(address, entry.Service.Port),
                    tags: entry.Service.Tags.unwrap_or_default(),
                    passing: entry.Checks.iter().all(|c| c.Status == "passing"),
                }
            })
            .collect();

        Ok(QueryResult { index, entries })
    }
}

/// 5xx 视为注册中心不可用，其余非 2xx 视为拒绝
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(DiscoveryError::unreachable(format!(
            "Consul returned HTTP {}: {}",
            status.as_u16(),
            message.trim()
        )))
    } else {
        Err(DiscoveryError::RegistryRejected {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }
}

fn consul_check(descriptor: &InstanceDescriptor) -> ConsulCheck {
    let health = &descriptor.health;
    let (grpc, tcp) = match &health.target {
        HealthTarget::Grpc { .. } => (Some(health.target.to_string()), None),
        HealthTarget::Tcp { .. } => (None, Some(health.target.to_string())),
    };
    ConsulCheck {
        GRPCUseTLS: grpc.as_ref().map(|_| false),
        GRPC: grpc,
        TCP: tcp,
        Interval: format_go_duration(health.interval),
        Timeout: format_go_duration(health.timeout),
        DeregisterCriticalServiceAfter: format_go_duration(health.deregister_after),
    }
}

#[async_trait]
impl RegistryBackend for ConsulRegistry {
    async fn register(&self, descriptor: &InstanceDescriptor) -> Result<()> {
        let registration = ConsulServiceRegistration {
            ID: descriptor.id.to_string(),
            Name: descriptor.service.to_string(),
            Tags: descriptor.tags.clone(),
            Address: descriptor.address.clone(),
            Port: descriptor.port,
            Check: consul_check(descriptor),
        };

        let request = self
            .client
            .put(self.url(&["v1", "agent", "service", "register"]))
            .query(&[("replace-existing-checks", "true")])
            .json(&registration);
        check_status(self.send(request, "register").await?).await?;

        info!(
            service = %descriptor.service,
            instance_id = %descriptor.id,
            "Service registered with Consul: {} at {}:{}",
            descriptor.service,
            descriptor.address,
            descriptor.port
        );
        Ok(())
    }

    async fn deregister(&self, id: &InstanceId) -> Result<()> {
        let request = self
            .client
            .put(self.url(&["v1", "agent", "service", "deregister", id.as_str()]));
        let response = self.send(request, "deregister").await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(instance_id = %id, "Instance already absent from Consul");
            return Ok(());
        }
        check_status(response).await?;

        info!(instance_id = %id, "Service unregistered from Consul: {}", id);
        Ok(())
    }

    async fn query(&self, service: &ServiceName, healthy_only: bool) -> Result<QueryResult> {
        self.service_entries(service, healthy_only, None).await
    }

    async fn watch(
        &self,
        service: &ServiceName,
        last_index: u64,
        wait: Duration,
    ) -> Result<QueryResult> {
        self.service_entries(service, true, Some((last_index, wait)))
            .await
    }

    fn name(&self) -> &'static str {
        "consul"
    }
}
