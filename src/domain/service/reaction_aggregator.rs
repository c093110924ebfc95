//! 表情回应聚合服务
//!
//! 回应以 `messages/{channel}/{key}/reactions/{emoji}/{user_id}` 的
//! 叶子形式存储，叶子值为展示名。单叶子原子写入保证并发回应互不
//! 覆盖：不同 (表情, 用户) 组合落在不同叶子上，没有读-改-写整个
//! 消息的竞态窗口。同一用户对同一表情的重复回应是幂等空操作。

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::domain::model::{self, ReactionMap, UserRef};
use crate::domain::repository::RealtimeStore;
use crate::error::{ChatError, Result};

/// 表情回应聚合器
pub struct ReactionAggregator {
    channel_id: String,
    messages_path: String,
    store: Arc<dyn RealtimeStore>,
}

impl ReactionAggregator {
    pub fn new(channel_id: impl Into<String>, store: Arc<dyn RealtimeStore>) -> Result<Self> {
        let channel_id = channel_id.into();
        model::validate_key(&channel_id, "channel id")?;
        Ok(Self {
            messages_path: format!("messages/{channel_id}"),
            channel_id,
            store,
        })
    }

    /// 为消息添加表情回应，返回该消息当前的回应映射
    ///
    /// 该 (表情, 用户) 已存在时不产生任何写入；消息不存在时返回
    /// [`ChatError::NotFound`]。
    #[instrument(skip(self, user), fields(channel_id = %self.channel_id, user_id = %user.id))]
    pub async fn add_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        user: &UserRef,
    ) -> Result<ReactionMap> {
        model::validate_key(emoji, "emoji")?;
        user.validate()?;
        let message_path = self.message_path(message_id)?;
        let message = self.require_message(message_id, &message_path).await?;

        let already_present = message
            .get("reactions")
            .and_then(|reactions| reactions.get(emoji))
            .and_then(|users| users.get(&user.id))
            .is_some();
        if already_present {
            debug!(emoji = %emoji, "reaction already present, idempotent no-op");
            return reactions_from_value(&message);
        }

        let leaf = format!("{message_path}/reactions/{emoji}/{}", user.id);
        self.store
            .update_leaf(&leaf, Value::String(user.display_name.clone()))
            .await?;
        self.current_reactions(&message_path).await
    }

    /// 移除表情回应，返回该消息当前的回应映射
    ///
    /// 该 (表情, 用户) 不存在时不产生任何写入；消息不存在时返回
    /// [`ChatError::NotFound`]。
    #[instrument(skip(self, user), fields(channel_id = %self.channel_id, user_id = %user.id))]
    pub async fn remove_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        user: &UserRef,
    ) -> Result<ReactionMap> {
        model::validate_key(emoji, "emoji")?;
        user.validate()?;
        let message_path = self.message_path(message_id)?;
        let message = self.require_message(message_id, &message_path).await?;

        let present = message
            .get("reactions")
            .and_then(|reactions| reactions.get(emoji))
            .and_then(|users| users.get(&user.id))
            .is_some();
        if !present {
            debug!(emoji = %emoji, "reaction absent, nothing to remove");
            return reactions_from_value(&message);
        }

        let leaf = format!("{message_path}/reactions/{emoji}/{}", user.id);
        self.store.update_leaf(&leaf, Value::Null).await?;
        self.current_reactions(&message_path).await
    }

    fn message_path(&self, message_id: &str) -> Result<String> {
        model::validate_key(message_id, "message id")?;
        Ok(format!("{}/{}", self.messages_path, message_id))
    }

    async fn require_message(&self, message_id: &str, message_path: &str) -> Result<Value> {
        self.store.get(message_path).await?.ok_or_else(|| {
            ChatError::not_found(format!(
                "message {message_id} not found in channel {}",
                self.channel_id
            ))
        })
    }

    /// 写入后重读回应子树，反映包括并发写入在内的收敛结果
    async fn current_reactions(&self, message_path: &str) -> Result<ReactionMap> {
        let reactions = self.store.get(&format!("{message_path}/reactions")).await?;
        match reactions {
            None => Ok(ReactionMap::new()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }
}

/// 从消息快照中取出回应映射（缺失时为空映射）
fn reactions_from_value(message: &Value) -> Result<ReactionMap> {
    match message.get("reactions") {
        None => Ok(ReactionMap::new()),
        Some(value) => Ok(serde_json::from_value(value.clone())?),
    }
}
