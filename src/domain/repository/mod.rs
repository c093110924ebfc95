//! 领域仓储接口定义
//!
//! 消息核心消费的两个外部端口：实时存储与附件上传器。
//! 具体实现由基础设施层提供（内存实现见 `infrastructure`），
//! 核心逻辑只依赖这里的 trait。

mod subscription;

pub use subscription::{Subscription, SubscriptionState};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::model::{Attachment, UploadFile};
use crate::error::{ChatError, Result};

/// 子节点新增回调
///
/// 返回 `Err` 表示消费方无法处理该条投递（如记录损坏），
/// 订阅随即终止并通过错误回调上报，不再有后续投递。
pub type ChildAddedHandler = Arc<dyn Fn(&str, &Value) -> Result<()> + Send + Sync>;

/// 子树快照变更回调，语义与 [`ChildAddedHandler`] 的返回值一致
pub type ValueChangedHandler = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// 订阅错误回调
///
/// 每个订阅至多调用一次；调用后订阅视为死亡，需要重新订阅。
pub type ErrorHandler = Arc<dyn Fn(ChatError) + Send + Sync>;

/// 实时存储接口
///
/// 路径为 `/` 分隔的段序列（如 `messages/g1/01ARZ…`）。约定：
/// - 同一存储实例内的写入具有全序，订阅投递顺序与提交顺序一致；
/// - `create` 分配的子键随提交顺序单调递增，键序即插入序；
/// - 叶子写入原子生效，`Value::Null` 表示删除该叶子。
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// 在 `path` 下新增子节点，返回存储分配的子键
    async fn create(&self, path: &str, value: Value) -> Result<String>;

    /// 读取 `path` 处的子树快照，不存在时返回 None
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// 原子写入单个叶子；`Value::Null` 删除该叶子
    async fn update_leaf(&self, path: &str, value: Value) -> Result<()>;

    /// 单批次原子写入多个叶子（要么全部生效，要么全部不生效）
    async fn update_leaves(&self, updates: Vec<(String, Value)>) -> Result<()>;

    /// 按键升序返回 `path` 下的全部子节点
    async fn children(&self, path: &str) -> Result<Vec<(String, Value)>>;

    /// 按键升序返回严格位于 `end_exclusive` 之前的至多 `limit` 个子节点
    ///
    /// 取的是紧邻 `end_exclusive` 的最后 `limit` 个，代价与 `limit`
    /// 成正比而非与子节点总数成正比。
    async fn children_before(
        &self,
        path: &str,
        end_exclusive: &str,
        limit: usize,
    ) -> Result<Vec<(String, Value)>>;

    /// 订阅 `path` 下的子节点新增
    ///
    /// 已存在的子节点按键升序恰好重放一次，其后每个新增子节点按
    /// 提交顺序恰好投递一次。取消后不再有任何投递。
    async fn subscribe_children(
        &self,
        path: &str,
        on_child_added: ChildAddedHandler,
        on_error: ErrorHandler,
    ) -> Result<Subscription>;

    /// 订阅 `path` 处子树的快照变更
    ///
    /// 订阅时先投递当前快照，之后该子树内任何写入都会触发一次
    /// 新快照投递。
    async fn subscribe_value(
        &self,
        path: &str,
        on_change: ValueChangedHandler,
        on_error: ErrorHandler,
    ) -> Result<Subscription>;
}

/// 附件上传接口
///
/// 上传成功返回完整的附件元数据；失败以 [`ChatError::Upload`] 上报，
/// 由调用方决定整体事务是否中止。
#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    /// 上传单个附件
    async fn upload(&self, file: &UploadFile) -> Result<Attachment>;
}
