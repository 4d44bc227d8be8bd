use application::{
    DistributedRateLimitStore, DualTierRateLimiter, LocalRateLimiter, RateLimitError,
    RateLimitPolicy, TokenBucket, CHAT_POST_ACTION,
};
use async_trait::async_trait;
use domain::UserId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// 可切换可用性的分布式层替身，内部仍是同一套令牌桶
struct FlakyStore {
    available: AtomicBool,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl FlakyStore {
    fn new(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DistributedRateLimitStore for FlakyStore {
    async fn try_acquire(&self, key: &str, policy: RateLimitPolicy) -> Result<bool, RateLimitError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(RateLimitError::Unavailable("connection refused".into()));
        }
        // 所有实例共用同一把锁，检查并扣减是原子的
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        Ok(buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(policy, now))
            .try_acquire(now))
    }
}

#[tokio::test]
async fn test_concurrent_checks_never_exceed_capacity() {
    let store = Arc::new(FlakyStore::new(true));
    let limiter = Arc::new(
        DualTierRateLimiter::new(Some(store.clone()), Arc::new(LocalRateLimiter::new()))
            .with_policy(CHAT_POST_ACTION, RateLimitPolicy::new(10, 0.001)),
    );
    let user = UserId::generate();

    let mut tasks = Vec::new();
    for _ in 0..50 {
        let limiter = Arc::clone(&limiter);
        tasks.push(tokio::spawn(async move {
            limiter.allow(user, CHAT_POST_ACTION).await
        }));
    }

    let mut allowed = 0;
    for task in tasks {
        if task.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 10);
}

#[tokio::test]
async fn test_two_instances_share_the_distributed_tier() {
    let store = Arc::new(FlakyStore::new(true));
    let policy = RateLimitPolicy::new(3, 0.001);
    let instance_a = DualTierRateLimiter::new(Some(store.clone()), Arc::new(LocalRateLimiter::new()))
        .with_policy(CHAT_POST_ACTION, policy);
    let instance_b = DualTierRateLimiter::new(Some(store.clone()), Arc::new(LocalRateLimiter::new()))
        .with_policy(CHAT_POST_ACTION, policy);
    let user = UserId::generate();

    // 换实例（或换传输方式）不能绕过限流
    assert!(instance_a.allow(user, CHAT_POST_ACTION).await);
    assert!(instance_b.allow(user, CHAT_POST_ACTION).await);
    assert!(instance_a.allow(user, CHAT_POST_ACTION).await);
    assert!(!instance_b.allow(user, CHAT_POST_ACTION).await);
}

#[tokio::test]
async fn test_outage_falls_back_to_per_process_limits() {
    let store = Arc::new(FlakyStore::new(false));
    let policy = RateLimitPolicy::new(2, 0.001);
    let instance_a = DualTierRateLimiter::new(Some(store.clone()), Arc::new(LocalRateLimiter::new()))
        .with_policy(CHAT_POST_ACTION, policy);
    let instance_b = DualTierRateLimiter::new(Some(store.clone()), Arc::new(LocalRateLimiter::new()))
        .with_policy(CHAT_POST_ACTION, policy);
    let user = UserId::generate();

    for instance in [&instance_a, &instance_b] {
        assert!(instance.allow(user, CHAT_POST_ACTION).await);
        assert!(instance.allow(user, CHAT_POST_ACTION).await);
        assert!(!instance.allow(user, CHAT_POST_ACTION).await);
    }

    // 恢复后重新由分布式层裁决
    store.available.store(true, Ordering::SeqCst);
    assert!(instance_a.allow(user, CHAT_POST_ACTION).await);
}
