//! 负载均衡模块
//!
//! 策略只决定一次调用中尝试端点的顺序，失败转移由调用器负责。
//! 每个索引在一次计划中最多出现一次

use crate::discovery::instance::{Endpoint, ServiceName};
use crate::discovery::resolver::ResolvedEndpointSet;
use crate::error::{DiscoveryError, Result};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

/// 负载均衡策略
pub trait LoadBalancePolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// 返回本次调用的尝试顺序（`set.endpoints()` 的下标）
    fn plan(&self, set: &ResolvedEndpointSet) -> Vec<usize>;

    /// 记录某个端点被选中
    fn record(&self, _set: &ResolvedEndpointSet, _endpoint: &Endpoint) {}
}

/// 负载均衡策略类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalanceStrategy {
    /// 轮询（Round Robin）
    #[default]
    RoundRobin,
    /// 随机（Random）
    Random,
    /// 最久未使用优先
    LeastRecentlyUsed,
}

impl LoadBalanceStrategy {
    pub fn build(self) -> Arc<dyn LoadBalancePolicy> {
        match self {
            LoadBalanceStrategy::RoundRobin => Arc::new(RoundRobin::new()),
            LoadBalanceStrategy::Random => Arc::new(Random),
            LoadBalanceStrategy::LeastRecentlyUsed => Arc::new(LeastRecentlyUsed::new()),
        }
    }
}

impl FromStr for LoadBalanceStrategy {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "round_robin" | "roundrobin" => Ok(LoadBalanceStrategy::RoundRobin),
            "random" => Ok(LoadBalanceStrategy::Random),
            "least_recently_used" | "lru" => Ok(LoadBalanceStrategy::LeastRecentlyUsed),
            _ => Err(DiscoveryError::config(format!(
                "unknown load balance policy `{}`",
                s
            ))),
        }
    }
}

impl fmt::Display for LoadBalanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadBalanceStrategy::RoundRobin => write!(f, "round_robin"),
            LoadBalanceStrategy::Random => write!(f, "random"),
            LoadBalanceStrategy::LeastRecentlyUsed => write!(f, "least_recently_used"),
        }
    }
}

struct Cursor {
    /// 上次计划时端点列表的指纹
    fingerprint: AtomicU64,
    next: AtomicUsize,
}

/// 端点列表的指纹；集合已排序去重，成员相同则指纹相同
fn fingerprint(set: &ResolvedEndpointSet) -> u64 {
    let mut hasher = DefaultHasher::new();
    set.endpoints().hash(&mut hasher);
    hasher.finish()
}

/// 轮询
///
/// 每个服务名一个游标，只有端点成员变化时才归零。
/// 注册中心的变更索引会因其他服务或检查输出而前进，不作为归零依据
#[derive(Default)]
pub struct RoundRobin {
    cursors: RwLock<HashMap<ServiceName, Arc<Cursor>>>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前持有游标的服务数
    pub fn tracked(&self) -> usize {
        self.cursors.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn cursor(&self, set: &ResolvedEndpointSet) -> Arc<Cursor> {
        if let Some(cursor) = self
            .cursors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&set.service)
        {
            return cursor.clone();
        }
        self.cursors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(set.service.clone())
            .or_insert_with(|| {
                Arc::new(Cursor {
                    fingerprint: AtomicU64::new(fingerprint(set)),
                    next: AtomicUsize::new(0),
                })
            })
            .clone()
    }
}

impl LoadBalancePolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn plan(&self, set: &ResolvedEndpointSet) -> Vec<usize> {
        let len = set.len();
        if len == 0 {
            self.cursors
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&set.service);
            return Vec::new();
        }

        let cursor = self.cursor(set);
        let current = fingerprint(set);
        let seen = cursor.fingerprint.load(Ordering::Acquire);
        if seen != current
            && cursor
                .fingerprint
                .compare_exchange(seen, current, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            cursor.next.store(0, Ordering::Release);
        }

        let start = cursor.next.fetch_add(1, Ordering::AcqRel) % len;
        (0..len).map(|i| (start + i) % len).collect()
    }
}

/// 随机顺序
pub struct Random;

impl LoadBalancePolicy for Random {
    fn name(&self) -> &'static str {
        "random"
    }

    fn plan(&self, set: &ResolvedEndpointSet) -> Vec<usize> {
        let mut order: Vec<usize> = (0..set.len()).collect();
        order.shuffle(&mut rand::thread_rng());
        order
    }
}

/// 最久未使用的端点优先，从未使用过的最先
///
/// 使用记录按服务名分开保存，每次计划时丢弃已不在集合中的端点
#[derive(Default)]
pub struct LeastRecentlyUsed {
    last_used: Mutex<HashMap<ServiceName, HashMap<Endpoint, Instant>>>,
}

impl LeastRecentlyUsed {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某个服务当前保留的使用记录数
    pub fn tracked(&self, service: &ServiceName) -> usize {
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
            .map_or(0, HashMap::len)
    }
}

impl LoadBalancePolicy for LeastRecentlyUsed {
    fn name(&self) -> &'static str {
        "least_recently_used"
    }

    fn plan(&self, set: &ResolvedEndpointSet) -> Vec<usize> {
        let mut services = self.last_used.lock().unwrap_or_else(PoisonError::into_inner);
        if set.is_empty() {
            services.remove(&set.service);
            return Vec::new();
        }

        let last_used = services.entry(set.service.clone()).or_default();
        last_used.retain(|endpoint, _| set.endpoints().binary_search(endpoint).is_ok());

        let mut order: Vec<usize> = (0..set.len()).collect();
        order.sort_by_key(|&i| (last_used.get(&set.endpoints()[i]).copied(), i));
        order
    }

    fn record(&self, set: &ResolvedEndpointSet, endpoint: &Endpoint) {
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(set.service.clone())
            .or_default()
            .insert(endpoint.clone(), Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(generation: u64, ports: &[u16]) -> ResolvedEndpointSet {
        ResolvedEndpointSet::new(
            ServiceName::from("hello"),
            generation,
            ports
                .iter()
                .map(|&p| Endpoint::new("127.0.0.1", p))
                .collect(),
        )
    }

    fn first(policy: &dyn LoadBalancePolicy, set: &ResolvedEndpointSet) -> u16 {
        let idx = policy.plan(set)[0];
        let endpoint = &set.endpoints()[idx];
        policy.record(set, endpoint);
        endpoint.port
    }

    #[test]
    fn round_robin_alternates() {
        let policy = RoundRobin::new();
        let set = set(1, &[50051, 50052]);

        let picks: Vec<u16> = (0..4).map(|_| first(&policy, &set)).collect();
        assert_eq!(picks, vec![50051, 50052, 50051, 50052]);
    }

    #[test]
    fn round_robin_plan_visits_each_endpoint_once() {
        let policy = RoundRobin::new();
        let set = set(1, &[1, 2, 3]);
        policy.plan(&set);

        assert_eq!(policy.plan(&set), vec![1, 2, 0]);
    }

    #[test]
    fn round_robin_resets_when_membership_changes() {
        let policy = RoundRobin::new();
        let old = set(1, &[50051, 50052]);
        assert_eq!(first(&policy, &old), 50051);

        let new = set(2, &[50051, 50052, 50053]);
        let picks: Vec<u16> = (0..3).map(|_| first(&policy, &new)).collect();
        assert_eq!(picks, vec![50051, 50052, 50053]);
    }

    #[test]
    fn round_robin_ignores_index_only_changes() {
        let policy = RoundRobin::new();
        assert_eq!(first(&policy, &set(1, &[50051, 50052])), 50051);
        assert_eq!(first(&policy, &set(7, &[50051, 50052])), 50052);
        assert_eq!(first(&policy, &set(9, &[50051, 50052])), 50051);
    }

    #[test]
    fn round_robin_cursors_are_per_service() {
        let policy = RoundRobin::new();
        let hello = set(1, &[50051, 50052]);
        let other = ResolvedEndpointSet::new(
            ServiceName::from("other"),
            1,
            vec![Endpoint::new("127.0.0.1", 6000), Endpoint::new("127.0.0.1", 6001)],
        );

        assert_eq!(first(&policy, &hello), 50051);
        assert_eq!(first(&policy, &other), 6000);
        assert_eq!(first(&policy, &hello), 50052);
    }

    #[test]
    fn random_plan_is_a_permutation() {
        let set = set(1, &[1, 2, 3, 4, 5]);
        let mut plan = Random.plan(&set);
        plan.sort();
        assert_eq!(plan, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn least_recently_used_prefers_untouched() {
        let policy = LeastRecentlyUsed::new();
        let set = set(1, &[1, 2, 3]);

        let picks: Vec<u16> = (0..3).map(|_| first(&policy, &set)).collect();
        assert_eq!(picks, vec![1, 2, 3]);
    }

    #[test]
    fn least_recently_used_forgets_departed_endpoints() {
        let policy = LeastRecentlyUsed::new();
        let hello = ServiceName::from("hello");
        let before = set(1, &[1, 2, 3]);
        for _ in 0..3 {
            first(&policy, &before);
        }
        assert_eq!(policy.tracked(&hello), 3);

        let after = set(2, &[2, 3]);
        policy.plan(&after);
        assert_eq!(policy.tracked(&hello), 2);

        policy.plan(&set(3, &[]));
        assert_eq!(policy.tracked(&hello), 0);
    }

    #[test]
    fn round_robin_drops_cursor_of_empty_service() {
        let policy = RoundRobin::new();
        first(&policy, &set(1, &[1, 2]));
        assert_eq!(policy.tracked(), 1);

        assert!(policy.plan(&set(2, &[])).is_empty());
        assert_eq!(policy.tracked(), 0);
    }

    #[test]
    fn empty_set_has_empty_plan() {
        let empty = set(1, &[]);
        assert!(RoundRobin::new().plan(&empty).is_empty());
        assert!(Random.plan(&empty).is_empty());
        assert!(LeastRecentlyUsed::new().plan(&empty).is_empty());
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!(
            "round-robin".parse::<LoadBalanceStrategy>().unwrap(),
            LoadBalanceStrategy::RoundRobin
        );
        assert_eq!(
            "lru".parse::<LoadBalanceStrategy>().unwrap(),
            LoadBalanceStrategy::LeastRecentlyUsed
        );
        assert!("p2c".parse::<LoadBalanceStrategy>().is_err());
    }
}
