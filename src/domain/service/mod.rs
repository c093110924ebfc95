//! 领域服务
//!
//! 四个围绕单一频道的服务：消息通道、表情回应聚合、
//! 输入状态跟踪与已读回执。

pub mod message_channel;
pub mod presence_tracker;
pub mod reaction_aggregator;
pub mod read_receipts;

pub use message_channel::{MessageChannel, MessageHandler};
pub use presence_tracker::{PresenceTracker, TypingHandler};
pub use reaction_aggregator::ReactionAggregator;
pub use read_receipts::ReadReceiptTracker;
