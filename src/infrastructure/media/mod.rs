pub mod memory_uploader;

pub use memory_uploader::{MemoryUploader, RejectingUploader};
