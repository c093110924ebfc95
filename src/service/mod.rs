//! 消息服务门面
//!
//! 把消息通道、表情回应、输入状态与已读回执四个领域服务组合成
//! 面向单个频道的统一入口，并负责附件上传编排与指标收集。
//! 调用方只需要一个 [`MessagingService`] 实例即可完成全部操作。

use std::sync::Arc;
use std::time::Instant;

use futures::future;
use tracing::{debug, error, instrument};

use crate::config::ChatConfig;
use crate::domain::model::{Message, NewMessage, ReactionMap, UploadFile, UserRef};
use crate::domain::repository::{AttachmentUploader, ErrorHandler, RealtimeStore, Subscription};
use crate::domain::service::{
    MessageChannel, MessageHandler, PresenceTracker, ReactionAggregator, ReadReceiptTracker,
    TypingHandler,
};
use crate::error::{ChatError, Result};
use crate::metrics::ChatMetrics;

/// 单频道消息服务
pub struct MessagingService {
    channel_id: String,
    channel: MessageChannel,
    reactions: ReactionAggregator,
    presence: PresenceTracker,
    receipts: ReadReceiptTracker,
    uploader: Arc<dyn AttachmentUploader>,
    metrics: Arc<ChatMetrics>,
}

impl MessagingService {
    /// 为指定频道创建消息服务
    ///
    /// 存储与上传器由调用方注入，超时与分页上限取自配置。
    pub fn new(
        channel_id: impl Into<String>,
        store: Arc<dyn RealtimeStore>,
        uploader: Arc<dyn AttachmentUploader>,
        config: &ChatConfig,
    ) -> Result<Self> {
        let channel_id = channel_id.into();
        let channel = MessageChannel::new(
            channel_id.clone(),
            store.clone(),
            config.messaging.page_size_limit,
        )?;
        let reactions = ReactionAggregator::new(channel_id.clone(), store.clone())?;
        let presence = PresenceTracker::new(
            channel_id.clone(),
            store.clone(),
            config.messaging.typing_ttl(),
            config.messaging.typing_sweep_interval(),
        )?;
        let receipts = ReadReceiptTracker::new(channel_id.clone(), store)?;
        Ok(Self {
            channel_id,
            channel,
            reactions,
            presence,
            receipts,
            uploader,
            metrics: Arc::new(ChatMetrics::new()),
        })
    }

    /// 频道 ID
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// 本服务实例的指标
    pub fn metrics(&self) -> &ChatMetrics {
        &self.metrics
    }

    /// 发送一条消息，返回存储分配的消息键
    ///
    /// 所有附件并发上传，全部成功后才追加消息；任何一个上传失败都
    /// 中止整次发送，不产生任何存储写入。校验在上传之前完成。
    #[instrument(
        skip(self, author, text, files),
        fields(channel_id = %self.channel_id, user_id = %author.id, file_count = files.len())
    )]
    pub async fn send_message(
        &self,
        author: &UserRef,
        text: &str,
        files: Vec<UploadFile>,
    ) -> Result<String> {
        author.validate()?;
        if text.trim().is_empty() && files.is_empty() {
            return Err(ChatError::validation(
                "message requires text or at least one attachment",
            ));
        }
        let started = Instant::now();

        let attachments = future::try_join_all(files.iter().map(|file| self.uploader.upload(file)))
            .await
            .map_err(|err| {
                error!(error = %err, "attachment upload failed, message aborted");
                err
            })?;

        let key = self
            .channel
            .append(NewMessage {
                author: author.clone(),
                text: text.to_string(),
                attachments,
            })
            .await?;

        self.metrics
            .messages_sent_total
            .with_label_values(&[self.channel_id.as_str()])
            .inc();
        self.metrics
            .messages_sent_duration_seconds
            .observe(started.elapsed().as_secs_f64());
        Ok(key)
    }

    /// 订阅频道消息：先重放已有消息，再按提交顺序投递新消息
    pub async fn listen_to_messages(
        &self,
        on_message: MessageHandler,
        on_error: ErrorHandler,
    ) -> Result<Subscription> {
        self.channel
            .subscribe(on_message, self.counted_errors(on_error))
            .await
    }

    /// 按插入序读取频道全部消息
    pub async fn get_all_messages(&self) -> Result<Vec<Message>> {
        self.channel.messages().await
    }

    /// 读取严格位于 `cursor` 之前的至多 `limit` 条消息
    pub async fn get_messages_before(&self, cursor: &str, limit: usize) -> Result<Vec<Message>> {
        self.channel.page_before(cursor, limit).await
    }

    /// 为消息添加表情回应，返回该消息当前的回应映射
    pub async fn add_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        user: &UserRef,
    ) -> Result<ReactionMap> {
        let reactions = self.reactions.add_reaction(message_id, emoji, user).await?;
        self.metrics
            .reactions_applied_total
            .with_label_values(&["add"])
            .inc();
        Ok(reactions)
    }

    /// 移除表情回应，返回该消息当前的回应映射
    pub async fn remove_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        user: &UserRef,
    ) -> Result<ReactionMap> {
        let reactions = self
            .reactions
            .remove_reaction(message_id, emoji, user)
            .await?;
        self.metrics
            .reactions_applied_total
            .with_label_values(&["remove"])
            .inc();
        Ok(reactions)
    }

    /// 声明该用户正在输入（可反复调用刷新存活时间）
    pub async fn send_typing_indicator(&self, user: &UserRef) -> Result<()> {
        self.presence.set_typing(user).await?;
        self.metrics.typing_updates_total.inc();
        Ok(())
    }

    /// 清除该用户的输入状态
    pub async fn clear_typing_indicator(&self, user: &UserRef) -> Result<()> {
        self.presence.clear_typing(user).await?;
        self.metrics.typing_updates_total.inc();
        Ok(())
    }

    /// 订阅正在输入的用户集合
    pub async fn listen_to_typing_indicators(
        &self,
        on_change: TypingHandler,
        on_error: ErrorHandler,
    ) -> Result<Subscription> {
        self.presence
            .subscribe_typing(on_change, self.counted_errors(on_error))
            .await
    }

    /// 将频道内全部 `sent`/`delivered` 消息标记为已读，返回迁移条数
    pub async fn mark_messages_as_read(&self) -> Result<usize> {
        let marked = self.receipts.mark_channel_read().await?;
        if marked > 0 {
            self.metrics.read_receipt_batch_size.observe(marked as f64);
        }
        debug!(channel_id = %self.channel_id, marked, "channel marked as read");
        Ok(marked)
    }

    /// 确认单条消息已投递
    pub async fn acknowledge_delivery(&self, message_id: &str) -> Result<bool> {
        self.receipts.acknowledge_delivery(message_id).await
    }

    /// 包装错误回调，投递失败先计入指标再转发给调用方
    fn counted_errors(&self, on_error: ErrorHandler) -> ErrorHandler {
        let metrics = self.metrics.clone();
        Arc::new(move |err| {
            metrics.subscription_errors_total.inc();
            on_error(err);
        })
    }
}
