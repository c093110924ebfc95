//! 输入状态跟踪服务
//!
//! 输入状态以 `typing/{channel}/{user_id}` 的叶子形式存储，写入时
//! 刷新 `last_seen_at`。订阅端对快照做 TTL 过滤并叠加周期扫描：
//! 即使写入方崩溃后再也没有清除，过期条目也会在 TTL + 扫描间隔内
//! 从投递结果中消失。过滤只发生在读取侧，观察者不会反向写存储。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{instrument, warn};

use crate::domain::model::{self, TypingEntry, UserRef};
use crate::domain::repository::{
    ErrorHandler, RealtimeStore, Subscription, SubscriptionState, ValueChangedHandler,
};
use crate::error::Result;

/// 输入状态集合变更回调（条目按用户 ID 升序）
pub type TypingHandler = Arc<dyn Fn(Vec<TypingEntry>) + Send + Sync>;

/// 输入状态跟踪器
pub struct PresenceTracker {
    channel_id: String,
    typing_path: String,
    ttl: Duration,
    sweep_interval: Duration,
    store: Arc<dyn RealtimeStore>,
}

impl PresenceTracker {
    pub fn new(
        channel_id: impl Into<String>,
        store: Arc<dyn RealtimeStore>,
        ttl: Duration,
        sweep_interval: Duration,
    ) -> Result<Self> {
        let channel_id = channel_id.into();
        model::validate_key(&channel_id, "channel id")?;
        Ok(Self {
            typing_path: format!("typing/{channel_id}"),
            channel_id,
            ttl,
            sweep_interval,
            store,
        })
    }

    /// 声明该用户正在输入（可反复调用以刷新存活时间）
    #[instrument(skip(self, user), fields(channel_id = %self.channel_id, user_id = %user.id))]
    pub async fn set_typing(&self, user: &UserRef) -> Result<()> {
        user.validate()?;
        let entry = TypingEntry::now(user);
        self.store
            .update_leaf(&self.entry_path(user), serde_json::to_value(&entry)?)
            .await
    }

    /// 清除该用户的输入状态
    #[instrument(skip(self, user), fields(channel_id = %self.channel_id, user_id = %user.id))]
    pub async fn clear_typing(&self, user: &UserRef) -> Result<()> {
        user.validate()?;
        self.store.update_leaf(&self.entry_path(user), Value::Null).await
    }

    /// 订阅正在输入的用户集合
    ///
    /// 订阅时投递一次当前集合，之后仅在过滤后的集合发生变化时投递
    /// （包括仅因超时而发生的变化）。
    #[instrument(skip(self, on_change, on_error), fields(channel_id = %self.channel_id))]
    pub async fn subscribe_typing(
        &self,
        on_change: TypingHandler,
        on_error: ErrorHandler,
    ) -> Result<Subscription> {
        let (tx, mut rx) = unbounded_channel::<Value>();
        // 快照先进入合并任务的队列；这里发送失败只说明合并任务已经
        // 退出，不构成订阅错误
        let forward: ValueChangedHandler = Arc::new(move |value: &Value| {
            let _ = tx.send(value.clone());
            Ok(())
        });
        let store_subscription = self
            .store
            .subscribe_value(&self.typing_path, forward, on_error)
            .await?;

        let state = Arc::new(SubscriptionState::new());
        let task_state = state.clone();
        let ttl = self.ttl;
        let sweep_interval = self.sweep_interval;
        let task = tokio::spawn(async move {
            // 合并任务持有存储侧订阅，任务退出时一并取消
            let _store_subscription = store_subscription;
            let mut interval = tokio::time::interval(sweep_interval);
            let mut latest = Value::Null;
            let mut last_emitted: Option<Vec<TypingEntry>> = None;
            loop {
                tokio::select! {
                    snapshot = rx.recv() => match snapshot {
                        Some(value) => latest = value,
                        // 存储侧订阅终止（错误已经由它上报）
                        None => break,
                    },
                    _ = interval.tick() => {}
                }
                if task_state.is_cancelled() {
                    break;
                }
                let current = active_entries(&latest, ttl);
                let changed = match &last_emitted {
                    Some(previous) => !same_typing_set(previous, &current),
                    None => true,
                };
                if changed {
                    on_change(current.clone());
                    last_emitted = Some(current);
                }
            }
        });

        Ok(Subscription::new(state, task))
    }

    fn entry_path(&self, user: &UserRef) -> String {
        format!("{}/{}", self.typing_path, user.id)
    }
}

/// 从快照中筛出未过期的条目，按用户 ID 升序
fn active_entries(snapshot: &Value, ttl: Duration) -> Vec<TypingEntry> {
    let now_ms = Utc::now().timestamp_millis();
    let mut entries: Vec<TypingEntry> = match snapshot {
        Value::Null => Vec::new(),
        Value::Object(map) => map
            .values()
            .filter_map(|raw| match serde_json::from_value::<TypingEntry>(raw.clone()) {
                Ok(entry) if !entry.is_expired(ttl, now_ms) => Some(entry),
                Ok(_) => None,
                Err(err) => {
                    // 瞬态状态里的损坏条目跳过即可，下次刷新会自愈
                    warn!("skipping malformed typing entry: {err}");
                    None
                }
            })
            .collect(),
        other => {
            warn!("unexpected typing snapshot shape: {other}");
            Vec::new()
        }
    };
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    entries
}

/// 集合是否等价（按用户与展示名比较，刷新时间戳不算变化）
fn same_typing_set(a: &[TypingEntry], b: &[TypingEntry]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.id == y.id && x.name == y.name)
}
