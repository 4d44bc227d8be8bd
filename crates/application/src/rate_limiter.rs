//! 令牌桶限流
//!
//! 两层结构：分布式层（Redis，原子读改写，多实例共享）为权威层；
//! 分布式层不可达时，单次检查退回到进程内的本地层。两层使用同一套令牌桶算法：
//! `tokens' = min(capacity, tokens + elapsed × rate)`，`tokens' >= 1` 时放行并扣减 1，
//! 否则拒绝，但仍保存补充后的令牌数。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use domain::UserId;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

/// 频道/会话发言动作，WebSocket 与 REST 共用
pub const CHAT_POST_ACTION: &str = "chat_post";

/// 令牌桶参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub capacity: u32,
    pub refill_per_sec: f64,
}

impl RateLimitPolicy {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }
}

/// 单个令牌桶，始终满足 `0 <= tokens <= capacity`
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// 新建的桶是满的
    pub fn new(policy: RateLimitPolicy, now: Instant) -> Self {
        let capacity = f64::from(policy.capacity);
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: policy.refill_per_sec.max(0.0),
            last_refill: now,
        }
    }

    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).clamp(0.0, self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }
}

/// 限流错误类型（分布式层）
#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimitError {
    /// 存储不可达，可重试
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
    #[error("rate limit script failed: {0}")]
    Script(String),
}

impl RateLimitError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RateLimitError::Unavailable(_))
    }
}

/// 分布式层：一次原子的检查并扣减
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DistributedRateLimitStore: Send + Sync {
    async fn try_acquire(&self, key: &str, policy: RateLimitPolicy) -> Result<bool, RateLimitError>;
}

type BucketKey = (UserId, String);

/// 进程内本地层
#[derive(Debug, Default)]
pub struct LocalRateLimiter {
    buckets: Mutex<HashMap<BucketKey, TokenBucket>>,
}

impl LocalRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, user_id: UserId, action: &str, policy: RateLimitPolicy, now: Instant) -> bool {
        let mut buckets = self.lock();
        buckets
            .entry((user_id, action.to_string()))
            .or_insert_with(|| TokenBucket::new(policy, now))
            .try_acquire(now)
    }

    /// 清理空闲超过 `idle` 的桶，返回清理数量
    pub fn sweep(&self, now: Instant, idle: Duration) -> usize {
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_refill()) < idle);
        before - buckets.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 周期性清理任务
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, idle: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.sweep(Instant::now(), idle);
                if removed > 0 {
                    tracing::debug!(removed, "清理空闲限流桶");
                }
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<BucketKey, TokenBucket>> {
        self.buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 双层限流器
pub struct DualTierRateLimiter {
    distributed: Option<Arc<dyn DistributedRateLimitStore>>,
    local: Arc<LocalRateLimiter>,
    policies: HashMap<String, RateLimitPolicy>,
}

impl DualTierRateLimiter {
    pub fn new(
        distributed: Option<Arc<dyn DistributedRateLimitStore>>,
        local: Arc<LocalRateLimiter>,
    ) -> Self {
        Self {
            distributed,
            local,
            policies: HashMap::new(),
        }
    }

    /// 仅本地层，单实例部署使用
    pub fn local_only(local: Arc<LocalRateLimiter>) -> Self {
        Self::new(None, local)
    }

    pub fn with_policy(mut self, action: impl Into<String>, policy: RateLimitPolicy) -> Self {
        self.policies.insert(action.into(), policy);
        self
    }

    pub fn policy(&self, action: &str) -> Option<RateLimitPolicy> {
        self.policies.get(action).copied()
    }

    pub fn local(&self) -> &Arc<LocalRateLimiter> {
        &self.local
    }

    /// 检查 (user_id, action) 是否放行
    ///
    /// 分布式层临时故障时重试一次，仍失败则本次检查退回本地层。
    pub async fn allow(&self, user_id: UserId, action: &str) -> bool {
        let Some(policy) = self.policy(action) else {
            tracing::warn!(action, "未配置限流策略的动作，直接放行");
            return true;
        };

        if let Some(store) = &self.distributed {
            let key = format!("ratelimit:{action}:{user_id}");
            match store.try_acquire(&key, policy).await {
                Ok(allowed) => return allowed,
                Err(err) if err.is_transient() => {
                    tracing::debug!(error = %err, action, "分布式限流失败，重试一次");
                    match store.try_acquire(&key, policy).await {
                        Ok(allowed) => return allowed,
                        Err(err) => {
                            tracing::warn!(error = %err, action, user_id = %user_id, "分布式限流不可用，退回本地限流");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, action, user_id = %user_id, "分布式限流出错，退回本地限流");
                }
            }
        }

        self.local.check(user_id, action, policy, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(capacity: u32, rate: f64) -> RateLimitPolicy {
        RateLimitPolicy::new(capacity, rate)
    }

    #[test]
    fn test_bucket_refill_law() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(policy(5, 2.0), start);

        for i in 0..5 {
            assert!(bucket.try_acquire(start), "request {} should be allowed", i + 1);
        }
        assert!(!bucket.try_acquire(start));

        // 不足 1/R 秒不补满一个令牌
        assert!(!bucket.try_acquire(start + Duration::from_millis(400)));
        // 恰好 1/R 秒后补充一个
        assert!(bucket.try_acquire(start + Duration::from_millis(500)));
        assert!(!bucket.try_acquire(start + Duration::from_millis(500)));
    }

    #[test]
    fn test_denied_check_keeps_refilled_tokens() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(policy(1, 1.0), start);
        assert!(bucket.try_acquire(start));

        assert!(!bucket.try_acquire(start + Duration::from_millis(500)));
        assert!((bucket.tokens() - 0.5).abs() < 1e-9);
        assert_eq!(bucket.last_refill(), start + Duration::from_millis(500));
    }

    #[test]
    fn test_tokens_stay_within_bounds() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(policy(3, 10.0), start);
        let mut now = start;

        for step in 0..200u64 {
            now += Duration::from_millis(step % 7 * 37);
            bucket.try_acquire(now);
            assert!(bucket.tokens() >= 0.0);
            assert!(bucket.tokens() <= 3.0);
        }

        // 长时间空闲后也不会超过容量
        bucket.try_acquire(now + Duration::from_secs(3600));
        assert!(bucket.tokens() <= 3.0);
    }

    #[test]
    fn test_local_limiter_keys_by_user_and_action() {
        let limiter = LocalRateLimiter::new();
        let now = Instant::now();
        let alice = UserId::generate();
        let bob = UserId::generate();
        let p = policy(1, 1.0);

        assert!(limiter.check(alice, "chat_post", p, now));
        assert!(!limiter.check(alice, "chat_post", p, now));
        assert!(limiter.check(alice, "typing", p, now));
        assert!(limiter.check(bob, "chat_post", p, now));
        assert_eq!(limiter.len(), 3);
    }

    #[test]
    fn test_local_sweep_evicts_idle_buckets() {
        let limiter = LocalRateLimiter::new();
        let start = Instant::now();
        let p = policy(5, 1.0);
        let idle_user = UserId::generate();
        let active_user = UserId::generate();

        limiter.check(idle_user, "chat_post", p, start);
        limiter.check(active_user, "chat_post", p, start + Duration::from_secs(500));

        let removed = limiter.sweep(start + Duration::from_secs(601), Duration::from_secs(600));
        assert_eq!(removed, 1);
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test]
    async fn test_dual_tier_uses_distributed_answer() {
        let mut store = MockDistributedRateLimitStore::new();
        store
            .expect_try_acquire()
            .times(1)
            .returning(|_, _| Ok(false));

        let limiter = DualTierRateLimiter::new(Some(Arc::new(store)), Arc::new(LocalRateLimiter::new()))
            .with_policy(CHAT_POST_ACTION, policy(10, 10.0));

        assert!(!limiter.allow(UserId::generate(), CHAT_POST_ACTION).await);
        // 分布式层给出答案时本地层不参与
        assert!(limiter.local().is_empty());
    }

    #[tokio::test]
    async fn test_dual_tier_retries_once_on_transient_failure() {
        let mut store = MockDistributedRateLimitStore::new();
        let mut seq = mockall::Sequence::new();
        store
            .expect_try_acquire()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(RateLimitError::Unavailable("timeout".into())));
        store
            .expect_try_acquire()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(true));

        let limiter = DualTierRateLimiter::new(Some(Arc::new(store)), Arc::new(LocalRateLimiter::new()))
            .with_policy(CHAT_POST_ACTION, policy(10, 10.0));

        assert!(limiter.allow(UserId::generate(), CHAT_POST_ACTION).await);
        assert!(limiter.local().is_empty());
    }

    #[tokio::test]
    async fn test_dual_tier_falls_back_to_local_when_unreachable() {
        let mut store = MockDistributedRateLimitStore::new();
        store
            .expect_try_acquire()
            .returning(|_, _| Err(RateLimitError::Unavailable("connection refused".into())));

        let limiter = DualTierRateLimiter::new(Some(Arc::new(store)), Arc::new(LocalRateLimiter::new()))
            .with_policy(CHAT_POST_ACTION, policy(2, 0.001));
        let user = UserId::generate();

        // 本地层仍然限流，而不是无条件放行
        assert!(limiter.allow(user, CHAT_POST_ACTION).await);
        assert!(limiter.allow(user, CHAT_POST_ACTION).await);
        assert!(!limiter.allow(user, CHAT_POST_ACTION).await);
    }

    #[tokio::test]
    async fn test_dual_tier_key_format() {
        let user = UserId::generate();
        let expected = format!("ratelimit:chat_post:{user}");
        let mut store = MockDistributedRateLimitStore::new();
        store
            .expect_try_acquire()
            .withf(move |key, policy| key == expected && policy.capacity == 10)
            .times(1)
            .returning(|_, _| Ok(true));

        let limiter = DualTierRateLimiter::new(Some(Arc::new(store)), Arc::new(LocalRateLimiter::new()))
            .with_policy(CHAT_POST_ACTION, policy(10, 10.0));
        assert!(limiter.allow(user, CHAT_POST_ACTION).await);
    }
}
