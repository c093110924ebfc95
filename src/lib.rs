//! Campus Chat 消息核心库
//!
//! 提供群组频道的实时消息能力：有序消息日志、表情回应、
//! 输入状态与已读回执，以及统一的配置加载与指标收集。
//! 实时存储与附件上传通过 `domain::repository` 中的接口注入。

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod logging;
pub mod metrics;
pub mod service;

pub use config::{ChatConfig, app_config, load_config};
pub use domain::model::{
    Attachment, Message, MessageStatus, NewMessage, ReactionMap, TypingEntry, UploadFile, UserRef,
};
pub use domain::repository::{
    AttachmentUploader, ChildAddedHandler, ErrorHandler, RealtimeStore, Subscription,
    ValueChangedHandler,
};
pub use domain::service::{
    MessageChannel, MessageHandler, PresenceTracker, ReactionAggregator, ReadReceiptTracker,
    TypingHandler,
};
pub use error::{ChatError, Result};
pub use infrastructure::media::{MemoryUploader, RejectingUploader};
pub use infrastructure::persistence::{MemoryRealtimeStore, StoreStats};
pub use logging::init_logging;
pub use metrics::{ChatMetrics, gather_metrics};
pub use service::MessagingService;
