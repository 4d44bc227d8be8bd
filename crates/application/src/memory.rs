//! 内存实现的仓储（测试与本地开发）

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    BannedWord, ConversationId, ConversationRepository, Message, MessageId, MessageRepository,
    ModerationAction, ModerationKind, ModerationLog, ModerationRepository, Principal,
    RepositoryError, RepositoryResult, Timestamp, UserId, UserRepository,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryConversationRepository {
    members: RwLock<HashMap<ConversationId, Vec<Principal>>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_member(&self, conversation_id: ConversationId, principal: Principal) {
        let mut members = self.members.write().await;
        let entry = members.entry(conversation_id).or_default();
        if !entry.iter().any(|member| member.id == principal.id) {
            entry.push(principal);
        }
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<bool> {
        let members = self.members.read().await;
        Ok(members
            .get(&conversation_id)
            .is_some_and(|list| list.iter().any(|member| member.id == user_id)))
    }

    async fn get_members(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Vec<Principal>> {
        let members = self.members.read().await;
        Ok(members.get(&conversation_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<HashMap<MessageId, Message>>,
    reads: RwLock<HashMap<(MessageId, UserId), Timestamp>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, id: MessageId) -> bool {
        self.messages.read().await.contains_key(&id)
    }

    pub async fn count(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn read_at(&self, message_id: MessageId, user_id: UserId) -> Option<Timestamp> {
        self.reads.read().await.get(&(message_id, user_id)).copied()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn create(&self, message: &Message) -> RepositoryResult<()> {
        let mut messages = self.messages.write().await;
        if messages.contains_key(&message.id) {
            return Err(RepositoryError::Conflict);
        }
        messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        Ok(self.messages.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: MessageId) -> RepositoryResult<()> {
        self.messages
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn mark_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
        read_at: Timestamp,
    ) -> RepositoryResult<()> {
        if !self.contains(message_id).await {
            return Err(RepositoryError::NotFound);
        }
        self.reads
            .write()
            .await
            .insert((message_id, user_id), read_at);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryModerationRepository {
    banned_words: RwLock<HashMap<ConversationId, Vec<BannedWord>>>,
    actions: RwLock<Vec<ModerationAction>>,
    logs: RwLock<Vec<ModerationLog>>,
}

impl InMemoryModerationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_banned_word(&self, conversation_id: ConversationId, word: &str) {
        let mut words = self.banned_words.write().await;
        let entry = words.entry(conversation_id).or_default();
        if entry.iter().any(|existing| existing.word.eq_ignore_ascii_case(word)) {
            return;
        }
        entry.push(BannedWord {
            id: Uuid::new_v4(),
            conversation_id,
            word: word.to_string(),
            created_at: chrono::Utc::now(),
        });
    }

    pub async fn actions(&self) -> Vec<ModerationAction> {
        self.actions.read().await.clone()
    }

    pub async fn logs(&self) -> Vec<ModerationLog> {
        self.logs.read().await.clone()
    }
}

#[async_trait]
impl ModerationRepository for InMemoryModerationRepository {
    async fn banned_words(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Vec<BannedWord>> {
        Ok(self
            .banned_words
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_moderation(&self, action: &ModerationAction) -> RepositoryResult<()> {
        let mut actions = self.actions.write().await;
        // 同一会话同一用户同一类型只保留最新一条
        actions.retain(|existing| {
            !(existing.conversation_id == action.conversation_id
                && existing.user_id == action.user_id
                && existing.kind == action.kind)
        });
        actions.push(action.clone());
        Ok(())
    }

    async fn active_restriction(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        now: Timestamp,
    ) -> RepositoryResult<Option<ModerationKind>> {
        let actions = self.actions.read().await;
        let active: Vec<ModerationKind> = actions
            .iter()
            .filter(|action| {
                action.conversation_id == conversation_id
                    && action.user_id == user_id
                    && action.is_active(now)
            })
            .map(|action| action.kind)
            .collect();

        if active.contains(&ModerationKind::Ban) {
            Ok(Some(ModerationKind::Ban))
        } else if active.contains(&ModerationKind::Mute) {
            Ok(Some(ModerationKind::Mute))
        } else {
            Ok(None)
        }
    }

    async fn add_log(&self, entry: &ModerationLog) -> RepositoryResult<()> {
        self.logs.write().await.push(entry.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<UserId, Principal>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, principal: Principal) {
        self.users.write().await.insert(principal.id, principal);
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<Principal>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn ensure_system_user(
        &self,
        email: &str,
        display_name: &str,
    ) -> RepositoryResult<Principal> {
        let mut users = self.users.write().await;
        if let Some(existing) = users.values().find(|user| user.email == email) {
            return Ok(existing.clone());
        }
        let principal = Principal::new(UserId::generate(), email, display_name);
        users.insert(principal.id, principal.clone());
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_ban_takes_precedence_over_mute() {
        let repo = InMemoryModerationRepository::new();
        let conversation = ConversationId::generate();
        let user = UserId::generate();
        let now = Utc::now();

        for (kind, expires_at) in [
            (ModerationKind::Mute, Some(now + Duration::minutes(5))),
            (ModerationKind::Ban, Some(now + Duration::minutes(1))),
        ] {
            repo.add_moderation(&ModerationAction {
                conversation_id: conversation,
                user_id: user,
                kind,
                expires_at,
                reason: "test".into(),
                moderator_id: None,
                created_at: now,
            })
            .await
            .unwrap();
        }

        assert_eq!(
            repo.active_restriction(conversation, user, now).await.unwrap(),
            Some(ModerationKind::Ban)
        );
        assert_eq!(
            repo.active_restriction(conversation, user, now + Duration::minutes(2))
                .await
                .unwrap(),
            Some(ModerationKind::Mute)
        );
        assert_eq!(
            repo.active_restriction(conversation, user, now + Duration::minutes(6))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_ensure_system_user_is_idempotent() {
        let repo = InMemoryUserRepository::new();
        let first = repo.ensure_system_user("bot@system.local", "Bot").await.unwrap();
        let second = repo.ensure_system_user("bot@system.local", "Bot").await.unwrap();
        assert_eq!(first, second);
    }
}
