pub mod media;
pub mod persistence;

pub use media::{MemoryUploader, RejectingUploader};
pub use persistence::{MemoryRealtimeStore, StoreStats};
