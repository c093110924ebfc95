//! 消息通道领域服务
//!
//! 管理单个频道的有序消息日志：追加、订阅、全量读取与按键分页。
//! 消息间的先后关系由存储分配的键序决定，时间戳仅用于展示。

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::domain::model::{self, Message, NewMessage};
use crate::domain::repository::{ChildAddedHandler, ErrorHandler, RealtimeStore, Subscription};
use crate::error::Result;

/// 新消息投递回调
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// 消息通道
pub struct MessageChannel {
    channel_id: String,
    messages_path: String,
    page_size_limit: usize,
    store: Arc<dyn RealtimeStore>,
}

impl MessageChannel {
    /// 创建消息通道
    ///
    /// `page_size_limit` 是分页查询的 limit 上限（配置项）。
    pub fn new(
        channel_id: impl Into<String>,
        store: Arc<dyn RealtimeStore>,
        page_size_limit: usize,
    ) -> Result<Self> {
        let channel_id = channel_id.into();
        model::validate_key(&channel_id, "channel id")?;
        Ok(Self {
            messages_path: format!("messages/{channel_id}"),
            channel_id,
            page_size_limit,
            store,
        })
    }

    /// 频道 ID
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// 追加一条消息，返回存储分配的消息键
    ///
    /// 校验通过后以 `sent` 状态落盘；提交顺序即所有订阅者的投递顺序。
    #[instrument(skip(self, input), fields(channel_id = %self.channel_id))]
    pub async fn append(&self, input: NewMessage) -> Result<String> {
        input.validate()?;
        let message = Message::outgoing(input);
        let key = self.store.create(&self.messages_path, message.to_value()?).await?;
        debug!(message_key = %key, "message appended");
        Ok(key)
    }

    /// 订阅频道消息
    ///
    /// 已有消息按插入序恰好重放一次，其后每条新消息恰好投递一次。
    /// 无法解析的记录视为投递失败：触发一次 `on_error` 后订阅终止。
    #[instrument(skip(self, on_message, on_error), fields(channel_id = %self.channel_id))]
    pub async fn subscribe(
        &self,
        on_message: MessageHandler,
        on_error: ErrorHandler,
    ) -> Result<Subscription> {
        let handler: ChildAddedHandler = Arc::new(move |key: &str, value: &Value| {
            let message = Message::from_child(key, value)?;
            on_message(message);
            Ok(())
        });
        self.store
            .subscribe_children(&self.messages_path, handler, on_error)
            .await
    }

    /// 按插入序读取频道全部消息
    #[instrument(skip(self), fields(channel_id = %self.channel_id))]
    pub async fn messages(&self) -> Result<Vec<Message>> {
        let children = self.store.children(&self.messages_path).await?;
        children
            .iter()
            .map(|(key, value)| Message::from_child(key, value))
            .collect()
    }

    /// 读取严格位于 `cursor` 之前的至多 `limit` 条消息（升序）
    ///
    /// `cursor` 是某条已知消息的键；未知游标视为「没有更早的消息」，
    /// 返回空页而不报错。`limit` 会被收紧到配置的上限。
    #[instrument(skip(self), fields(channel_id = %self.channel_id))]
    pub async fn page_before(&self, cursor: &str, limit: usize) -> Result<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = limit.min(self.page_size_limit);

        let cursor_path = format!("{}/{}", self.messages_path, cursor);
        if self.store.get(&cursor_path).await?.is_none() {
            debug!(cursor = %cursor, "unknown pagination cursor, returning empty page");
            return Ok(Vec::new());
        }

        let page = self
            .store
            .children_before(&self.messages_path, cursor, limit)
            .await?;
        page.iter()
            .map(|(key, value)| Message::from_child(key, value))
            .collect()
    }
}
