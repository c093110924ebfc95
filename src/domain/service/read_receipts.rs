//! 已读回执服务
//!
//! 批量已读把频道内所有 `sent`/`delivered` 消息一次性置为 `read`，
//! 全部状态迁移合并进单个批量写入；没有可迁移的消息时不产生任何
//! 写入。单条投递确认走点状态迁移，回退会被状态机拒绝。

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::domain::model::{self, MessageStatus};
use crate::domain::repository::RealtimeStore;
use crate::error::{ChatError, Result};

/// 已读回执跟踪器
pub struct ReadReceiptTracker {
    channel_id: String,
    messages_path: String,
    store: Arc<dyn RealtimeStore>,
}

impl ReadReceiptTracker {
    pub fn new(channel_id: impl Into<String>, store: Arc<dyn RealtimeStore>) -> Result<Self> {
        let channel_id = channel_id.into();
        model::validate_key(&channel_id, "channel id")?;
        Ok(Self {
            messages_path: format!("messages/{channel_id}"),
            channel_id,
            store,
        })
    }

    /// 将频道内全部 `sent`/`delivered` 消息标记为已读
    ///
    /// 一次有序扫描收集待迁移项，合并为单个批量写入；`sending` 与
    /// 已是 `read` 的消息不被触碰。返回本次迁移的消息数，0 表示
    /// 没有发出任何存储写入。
    #[instrument(skip(self), fields(channel_id = %self.channel_id))]
    pub async fn mark_channel_read(&self) -> Result<usize> {
        let children = self.store.children(&self.messages_path).await?;
        let mut updates = Vec::new();
        for (key, value) in &children {
            let Some(raw_status) = value.get("status").and_then(Value::as_str) else {
                warn!(message_key = %key, "message record without readable status, skipping");
                continue;
            };
            let status = match MessageStatus::from_str(raw_status) {
                Ok(status) => status,
                Err(err) => {
                    warn!(message_key = %key, "skipping message: {err}");
                    continue;
                }
            };
            if matches!(status, MessageStatus::Sent | MessageStatus::Delivered) {
                updates.push((
                    format!("{}/{}/status", self.messages_path, key),
                    json!("read"),
                ));
            }
        }

        if updates.is_empty() {
            debug!("no unread messages, skipping store write");
            return Ok(0);
        }
        let marked = updates.len();
        self.store.update_leaves(updates).await?;
        debug!(marked, "messages marked as read");
        Ok(marked)
    }

    /// 确认单条消息已投递（`delivered`）
    ///
    /// 返回是否实际发生了状态迁移：消息已处于 `delivered` 时为幂等
    /// 空操作；已是 `read` 等更晚状态时返回
    /// [`ChatError::InvalidTransition`]；消息不存在时返回
    /// [`ChatError::NotFound`]。
    #[instrument(skip(self), fields(channel_id = %self.channel_id))]
    pub async fn acknowledge_delivery(&self, message_id: &str) -> Result<bool> {
        model::validate_key(message_id, "message id")?;
        let message_path = format!("{}/{}", self.messages_path, message_id);
        let message = self.store.get(&message_path).await?.ok_or_else(|| {
            ChatError::not_found(format!(
                "message {message_id} not found in channel {}",
                self.channel_id
            ))
        })?;

        let status_value = message.get("status").cloned().unwrap_or(Value::Null);
        let current: MessageStatus = serde_json::from_value(status_value)?;
        if !current.check_transition(MessageStatus::Delivered)? {
            return Ok(false);
        }

        self.store
            .update_leaf(&format!("{message_path}/status"), json!("delivered"))
            .await?;
        debug!(message_key = %message_id, from = %current, "message acknowledged as delivered");
        Ok(true)
    }
}
