//! 消息领域模型
//!
//! 消息状态机管理消息的投递生命周期状态：
//! - SENDING: 客户端乐观展示中（尚未提交到存储）
//! - SENT: 已提交到频道日志（正常态）
//! - DELIVERED: 已被接收端确认
//! - READ: 已读（终态）
//!
//! 状态只能单调前进，允许跳跃（如批量已读将 SENT 直接置为 READ），
//! 任何回退迁移都会被拒绝。

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChatError, Result};

/// 表情回应映射：emoji -> (用户 ID -> 展示名)
///
/// 与存储中 `reactions/{emoji}/{user_id}` 的叶子布局一一对应，
/// 同一用户对同一表情天然只有一个叶子，具备集合语义。
pub type ReactionMap = BTreeMap<String, BTreeMap<String, String>>;

/// 存储路径保留字符，路径段中不允许出现
const RESERVED_KEY_CHARS: [char; 6] = ['/', '.', '#', '$', '[', ']'];

/// 校验将用作存储路径段的标识（频道 ID、用户 ID、表情键）
pub fn validate_key(segment: &str, what: &str) -> Result<()> {
    if segment.trim().is_empty() {
        return Err(ChatError::validation(format!("{what} must not be empty")));
    }
    if segment.contains(RESERVED_KEY_CHARS) {
        return Err(ChatError::validation(format!(
            "{what} contains reserved characters: {segment}"
        )));
    }
    Ok(())
}

/// 消息投递状态枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// 客户端乐观展示中（尚未提交到存储）
    Sending,
    /// 已提交到频道日志（正常态）
    Sent,
    /// 已被接收端确认
    Delivered,
    /// 已读（终态）
    Read,
}

impl MessageStatus {
    /// 转换为存储中的字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    /// 从存储字符串解析
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            _ => Err(format!("Invalid message status: {}", s)),
        }
    }

    /// 状态在生命周期中的序号，用于判定迁移方向
    pub fn rank(&self) -> u8 {
        match self {
            MessageStatus::Sending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
        }
    }

    /// 是否为终态（不可再变更）
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Read)
    }

    /// 是否允许迁移到目标状态（只允许前进，可跳跃）
    pub fn can_transition_to(&self, target: MessageStatus) -> bool {
        target.rank() > self.rank()
    }

    /// 校验迁移：同状态为幂等空操作（返回 false），回退报错
    pub fn check_transition(&self, target: MessageStatus) -> Result<bool> {
        if *self == target {
            return Ok(false);
        }
        if self.can_transition_to(target) {
            return Ok(true);
        }
        Err(ChatError::InvalidTransition {
            from: *self,
            to: target,
        })
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 已解析的用户身份（由调用方提供，核心不做鉴权）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// 用户 ID（用作存储路径段）
    pub id: String,
    /// 展示名
    pub display_name: String,
}

impl UserRef {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// 校验身份字段
    pub fn validate(&self) -> Result<()> {
        validate_key(&self.id, "user id")?;
        if self.display_name.trim().is_empty() {
            return Err(ChatError::validation("user display name must not be empty"));
        }
        Ok(())
    }
}

/// 消息附件元数据（上传完成后写入消息记录）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// 附件 ID（由上传器分配）
    pub id: String,
    /// MIME 类型
    pub mime_type: String,
    /// 可访问的下载地址
    pub url: String,
    /// 原始文件名
    pub name: String,
    /// 字节大小
    pub size: u64,
}

/// 待上传的附件内容
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// 原始文件名
    pub name: String,
    /// MIME 类型
    pub mime_type: String,
    /// 文件内容
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

/// 待追加的新消息（追加成功后由存储分配消息键）
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// 作者身份
    pub author: UserRef,
    /// 文本内容（有附件时允许为空）
    pub text: String,
    /// 已上传完成的附件
    pub attachments: Vec<Attachment>,
}

impl NewMessage {
    /// 校验：作者合法，且文本与附件至少有其一
    pub fn validate(&self) -> Result<()> {
        self.author.validate()?;
        if self.text.trim().is_empty() && self.attachments.is_empty() {
            return Err(ChatError::validation(
                "message requires text or at least one attachment",
            ));
        }
        Ok(())
    }
}

/// 频道消息记录
///
/// `id` 是存储分配的子键，不会序列化进存储值；
/// 消息间的先后关系由键序决定，`timestamp` 仅用于展示。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// 存储分配的消息键（读取时由子键回填）
    #[serde(skip)]
    pub id: String,
    /// 文本内容
    pub text: String,
    /// 作者身份
    pub author: UserRef,
    /// 提交时刻（RFC 3339，仅展示用途）
    pub timestamp: String,
    /// 投递状态
    pub status: MessageStatus,
    /// 附件列表
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// 表情回应
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: ReactionMap,
}

impl Message {
    /// 由待追加消息构造即将落盘的记录（状态置为 SENT）
    pub fn outgoing(input: NewMessage) -> Self {
        Self {
            id: String::new(),
            text: input.text,
            author: input.author,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            status: MessageStatus::Sent,
            attachments: input.attachments,
            reactions: ReactionMap::new(),
        }
    }

    /// 序列化为存储值（不含消息键）
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// 从存储子节点还原消息，`key` 回填为消息 ID
    pub fn from_child(key: &str, value: &Value) -> Result<Self> {
        let mut message: Message = serde_json::from_value(value.clone())?;
        message.id = key.to_string();
        Ok(message)
    }

    /// 指定表情下的回应用户集合（按用户 ID 排序）
    pub fn reaction_users(&self, emoji: &str) -> Vec<UserRef> {
        self.reactions
            .get(emoji)
            .map(|users| {
                users
                    .iter()
                    .map(|(id, name)| UserRef::new(id.clone(), name.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// 输入状态条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingEntry {
    /// 用户 ID
    pub id: String,
    /// 展示名
    pub name: String,
    /// 最近一次刷新时刻（Unix 毫秒）
    pub last_seen_at: i64,
}

impl TypingEntry {
    /// 以当前时刻构造条目
    pub fn now(user: &UserRef) -> Self {
        Self {
            id: user.id.clone(),
            name: user.display_name.clone(),
            last_seen_at: Utc::now().timestamp_millis(),
        }
    }

    /// 条目是否已过期
    pub fn is_expired(&self, ttl: Duration, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.last_seen_at) > ttl.as_millis() as i64
    }
}
