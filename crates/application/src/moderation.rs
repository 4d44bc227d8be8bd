//! 审核机器人
//!
//! 独立的事件总线消费者，每条新消息启动一个任务检查：
//! 1. 屏蔽词：大小写不敏感的子串匹配，命中即删除消息并记录 `delete_word`，不再继续检查；
//! 2. 刷屏：同一发送者在滑动窗口内发送相同正文达到阈值（含本条），禁言、删除并记录 `timeout_spam`。
//!
//! 写操作与 REST 审核接口使用同一组仓储。失败只记录日志，不重试。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use config::ModerationConfig;
use domain::{
    Message, MessageRepository, ModerationAction, ModerationKind, ModerationLog,
    ModerationLogAction, ModerationRepository, Principal, ServerEvent, Timestamp, UserId,
};
use serde_json::json;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clock::Clock;
use crate::event_bus::{BroadcastError, EventBus, EventSubscription, Topic};

const SPAM_MUTE_REASON: &str = "spam: repeated messages";
const SPAM_LOG_REASON: &str = "spam repeated";

#[derive(Debug, Clone)]
pub struct ModerationPolicy {
    pub spam_window: ChronoDuration,
    /// 窗口内相同正文的条数（含当前消息）达到该值即判定刷屏
    pub spam_threshold: usize,
    pub mute_duration: ChronoDuration,
    pub sweep_interval: Duration,
}

impl ModerationPolicy {
    pub fn from_config(config: &ModerationConfig) -> Self {
        Self {
            spam_window: ChronoDuration::seconds(config.spam_window_secs as i64),
            spam_threshold: config.spam_threshold,
            mute_duration: ChronoDuration::minutes(config.mute_minutes),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Default for ModerationPolicy {
    fn default() -> Self {
        Self {
            spam_window: ChronoDuration::seconds(10),
            spam_threshold: 3,
            mute_duration: ChronoDuration::minutes(5),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

type SenderWindow = Arc<Mutex<VecDeque<(Timestamp, String)>>>;

/// 每个发送者一个滑动窗口，窗口各自加锁，不同发送者互不影响
pub struct SpamDetector {
    windows: Mutex<HashMap<UserId, SenderWindow>>,
    window: ChronoDuration,
    threshold: usize,
}

impl SpamDetector {
    pub fn new(window: ChronoDuration, threshold: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window,
            threshold,
        }
    }

    /// 记录一条消息并返回窗口内相同正文的条数（含本条）
    pub fn record(&self, sender: UserId, body: &str, at: Timestamp) -> usize {
        let window = {
            let mut windows = self
                .windows
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(windows.entry(sender).or_default())
        };

        let mut entries = window.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let cutoff = at - self.window;
        entries.retain(|(sent_at, _)| *sent_at > cutoff);
        entries.push_back((at, body.to_string()));
        entries.iter().filter(|(_, text)| text == body).count()
    }

    pub fn is_spam(&self, sender: UserId, body: &str, at: Timestamp) -> bool {
        self.record(sender, body, at) >= self.threshold
    }

    /// 移除已完全过期的发送者窗口
    pub fn sweep(&self, now: Timestamp) -> usize {
        let cutoff = now - self.window;
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = windows.len();
        windows.retain(|_, window| {
            let entries = window.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            entries.back().is_some_and(|(sent_at, _)| *sent_at > cutoff)
        });
        before - windows.len()
    }

    pub fn tracked_senders(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// 单条消息的审核结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationOutcome {
    Clean,
    BannedWord(String),
    Spam,
    /// 机器人自己的消息不审核
    Skipped,
}

pub struct ModerationBot {
    bot: Principal,
    messages: Arc<dyn MessageRepository>,
    moderation: Arc<dyn ModerationRepository>,
    clock: Arc<dyn Clock>,
    spam: SpamDetector,
    policy: ModerationPolicy,
}

impl ModerationBot {
    pub fn new(
        bot: Principal,
        messages: Arc<dyn MessageRepository>,
        moderation: Arc<dyn ModerationRepository>,
        clock: Arc<dyn Clock>,
        policy: ModerationPolicy,
    ) -> Self {
        Self {
            bot,
            messages,
            moderation,
            clock,
            spam: SpamDetector::new(policy.spam_window, policy.spam_threshold),
            policy,
        }
    }

    pub fn bot(&self) -> &Principal {
        &self.bot
    }

    pub fn spam_detector(&self) -> &SpamDetector {
        &self.spam
    }

    /// 订阅消息主题并在后台运行
    pub async fn start(self: Arc<Self>, bus: &dyn EventBus) -> Result<JoinHandle<()>, BroadcastError> {
        let subscription = bus.subscribe(Topic::Messages).await?;
        tracing::info!(bot_id = %self.bot.id, "审核机器人已启动");
        Ok(tokio::spawn(self.run(subscription)))
    }

    pub async fn run(self: Arc<Self>, mut subscription: EventSubscription) {
        let mut sweep = tokio::time::interval(self.policy.sweep_interval);
        sweep.tick().await;

        loop {
            tokio::select! {
                event = subscription.recv() => match event {
                    Some(ServerEvent::MessageNew(message)) => {
                        let bot = Arc::clone(&self);
                        tokio::spawn(async move {
                            bot.process(&message).await;
                        });
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = sweep.tick() => {
                    let removed = self.spam.sweep(self.clock.now());
                    if removed > 0 {
                        tracing::debug!(removed, "清理过期的刷屏窗口");
                    }
                }
            }
        }
        tracing::info!("审核机器人订阅已结束");
    }

    /// 审核单条消息
    pub async fn process(&self, message: &Message) -> ModerationOutcome {
        if message.sender_id == self.bot.id {
            return ModerationOutcome::Skipped;
        }

        match self.moderation.banned_words(message.conversation_id).await {
            Ok(words) => {
                if let Some(word) = words.iter().find(|word| word.matches(&message.body)) {
                    self.remove_for_banned_word(message, &word.word).await;
                    return ModerationOutcome::BannedWord(word.word.clone());
                }
            }
            Err(err) => {
                tracing::warn!(
                    conversation_id = %message.conversation_id,
                    error = %err,
                    "加载屏蔽词失败，跳过屏蔽词检查"
                );
            }
        }

        let now = self.clock.now();
        if self.spam.is_spam(message.sender_id, &message.body, now) {
            self.mute_for_spam(message, now).await;
            return ModerationOutcome::Spam;
        }

        ModerationOutcome::Clean
    }

    async fn remove_for_banned_word(&self, message: &Message, word: &str) {
        tracing::info!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            "消息命中屏蔽词，删除"
        );
        self.delete_message(message).await;
        self.write_log(
            message,
            ModerationLogAction::DeleteWord,
            word,
            json!({ "matched_word": word }),
        )
        .await;
    }

    async fn mute_for_spam(&self, message: &Message, now: Timestamp) {
        tracing::info!(
            sender_id = %message.sender_id,
            conversation_id = %message.conversation_id,
            "检测到刷屏，禁言并删除消息"
        );

        let action = ModerationAction {
            conversation_id: message.conversation_id,
            user_id: message.sender_id,
            kind: ModerationKind::Mute,
            expires_at: Some(now + self.policy.mute_duration),
            reason: SPAM_MUTE_REASON.to_string(),
            moderator_id: Some(self.bot.id),
            created_at: now,
        };
        if let Err(err) = self.moderation.add_moderation(&action).await {
            tracing::error!(sender_id = %message.sender_id, error = %err, "刷屏禁言写入失败");
        }

        self.delete_message(message).await;
        self.write_log(
            message,
            ModerationLogAction::TimeoutSpam,
            SPAM_LOG_REASON,
            json!({
                "mute_minutes": self.policy.mute_duration.num_minutes(),
                "window_secs": self.policy.spam_window.num_seconds(),
            }),
        )
        .await;
    }

    async fn delete_message(&self, message: &Message) {
        if let Err(err) = self.messages.delete(message.id).await {
            tracing::error!(message_id = %message.id, error = %err, "审核删除消息失败");
        }
    }

    async fn write_log(
        &self,
        message: &Message,
        action: ModerationLogAction,
        reason: &str,
        metadata: serde_json::Value,
    ) {
        let entry = ModerationLog {
            id: Uuid::new_v4(),
            conversation_id: Some(message.conversation_id),
            message_id: Some(message.id),
            action,
            moderator_id: Some(self.bot.id),
            target_user_id: Some(message.sender_id),
            reason: Some(reason.to_string()),
            metadata: Some(metadata),
            created_at: self.clock.now(),
        };
        if let Err(err) = self.moderation.add_log(&entry).await {
            tracing::error!(message_id = %message.id, action = action.as_str(), error = %err, "审核日志写入失败");
        }
    }
}
