//! 内存附件上传器
//!
//! 用于测试与本地开发的 [`AttachmentUploader`] 实现：
//! 内容保存在进程内，URL 采用 `mem://{id}/{name}` 形式。

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::domain::model::{Attachment, UploadFile};
use crate::domain::repository::AttachmentUploader;
use crate::error::{ChatError, Result};

/// 内存上传器
#[derive(Debug, Default)]
pub struct MemoryUploader {
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl MemoryUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取回已上传的内容（按附件 ID）
    pub fn blob(&self, id: &str) -> Option<Bytes> {
        self.blobs.lock().unwrap().get(id).cloned()
    }

    /// 已上传附件数量
    pub fn stored_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }
}

#[async_trait]
impl AttachmentUploader for MemoryUploader {
    async fn upload(&self, file: &UploadFile) -> Result<Attachment> {
        if file.name.trim().is_empty() {
            return Err(ChatError::upload("attachment name must not be empty"));
        }
        let id = Uuid::new_v4().to_string();
        let size = file.bytes.len() as u64;
        self.blobs.lock().unwrap().insert(id.clone(), file.bytes.clone());
        Ok(Attachment {
            url: format!("mem://{id}/{name}", name = file.name),
            id,
            mime_type: file.mime_type.clone(),
            name: file.name.clone(),
            size,
        })
    }
}

/// 故障注入上传器：前 `succeed_first` 个上传成功，之后全部失败
///
/// 用于验证「任一附件上传失败则整次发送中止、不留半成品状态」。
#[derive(Debug, Default)]
pub struct RejectingUploader {
    succeed_first: usize,
    attempts: AtomicUsize,
    delegate: MemoryUploader,
}

impl RejectingUploader {
    pub fn new(succeed_first: usize) -> Self {
        Self {
            succeed_first,
            attempts: AtomicUsize::new(0),
            delegate: MemoryUploader::new(),
        }
    }

    /// 已尝试的上传次数
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttachmentUploader for RejectingUploader {
    async fn upload(&self, file: &UploadFile) -> Result<Attachment> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.succeed_first {
            return self.delegate.upload(file).await;
        }
        Err(ChatError::upload(format!(
            "injected failure uploading {}",
            file.name
        )))
    }
}
