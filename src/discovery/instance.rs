//! 服务实例定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::health::HealthCheckSpec;

/// 服务名最大长度
pub const MAX_SERVICE_NAME_LEN: usize = 255;

/// 逻辑服务名，多个实例可以共享同一个服务名
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 校验服务名：非空、不超过 255 字节、仅包含字母数字和 `-` `_` `.`
    pub fn validate(&self) -> Result<(), String> {
        if self.0.is_empty() {
            return Err("service name is empty".to_string());
        }
        if self.0.len() > MAX_SERVICE_NAME_LEN {
            return Err(format!(
                "service name exceeds {} bytes",
                MAX_SERVICE_NAME_LEN
            ));
        }
        if let Some(c) = self
            .0
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(format!(
                "service name `{}` contains invalid character {:?}",
                self.0, c
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ServiceName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 服务实例 ID
///
/// 由 `(address, port, service)` 确定性推导，进程无需持久化即可在退出时重新计算并注销
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// 推导实例 ID，格式为 `address:port[service]`
    ///
    /// 相同三元组得到相同 ID（重复注册即覆盖）；地址不含方括号、服务名不含方括号、
    /// 端口为十进制，因此不同三元组不会冲突
    pub fn derive(address: &str, port: u16, service: &ServiceName) -> Self {
        Self(format!("{}:{}[{}]", address, port, service))
    }

    /// 使用已有字符串构造（例如从注册中心读取）
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 推导服务实例 ID
pub fn instance_id(address: &str, port: u16, service: &ServiceName) -> InstanceId {
    InstanceId::derive(address, port, service)
}

/// 校验实例地址
pub fn validate_address(address: &str) -> Result<(), String> {
    if address.is_empty() {
        return Err("address is empty".to_string());
    }
    if address
        .chars()
        .any(|c| c.is_whitespace() || c == '[' || c == ']' || c == '/')
    {
        return Err(format!("address `{}` is malformed", address));
    }
    // 注册中心无法探测 0.0.0.0 / ::
    if let Ok(ip) = address.parse::<IpAddr>() {
        if ip.is_unspecified() {
            return Err(format!(
                "address `{}` is unspecified and cannot be dialed",
                address
            ));
        }
    }
    Ok(())
}

/// 网络端点
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// 转换为 gRPC URI
    pub fn uri(&self) -> String {
        format!("http://{}", self)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

impl From<std::net::SocketAddr> for Endpoint {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// 提交给注册中心的实例描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescriptor {
    pub id: InstanceId,
    pub service: ServiceName,
    pub address: String,
    pub port: u16,
    /// 有序标签
    pub tags: Vec<String>,
    pub health: HealthCheckSpec,
}

impl InstanceDescriptor {
    /// 创建实例描述，ID 由地址、端口和服务名推导
    pub fn new(
        address: impl Into<String>,
        port: u16,
        service: impl Into<ServiceName>,
        health: HealthCheckSpec,
    ) -> Self {
        let address = address.into();
        let service = service.into();
        Self {
            id: InstanceId::derive(&address, port, &service),
            service,
            address,
            port,
            tags: Vec::new(),
            health,
        }
    }

    /// 添加标签
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// 设置标签
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.address.clone(), self.port)
    }

    /// 基础校验：服务名、地址、端口、健康检查
    pub fn validate(&self) -> Result<(), String> {
        self.service.validate()?;
        validate_address(&self.address)?;
        if self.port == 0 {
            return Err("port must be in 1..=65535".to_string());
        }
        if self.id != InstanceId::derive(&self.address, self.port, &self.service) {
            return Err(format!(
                "instance id `{}` does not match address, port and service",
                self.id
            ));
        }
        self.health.validate()
    }
}

/// 注册中心查询返回的一条实例记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: InstanceId,
    pub service: ServiceName,
    pub endpoint: Endpoint,
    pub tags: Vec<String>,
    /// 所有健康检查均通过
    pub passing: bool,
}
