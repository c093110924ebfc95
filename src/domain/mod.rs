pub mod model;
pub mod repository;
pub mod service;

pub use model::{
    Attachment, Message, MessageStatus, NewMessage, ReactionMap, TypingEntry, UploadFile, UserRef,
};
pub use repository::{AttachmentUploader, RealtimeStore, Subscription};
pub use service::{
    MessageChannel, MessageHandler, PresenceTracker, ReactionAggregator, ReadReceiptTracker,
    TypingHandler,
};
