//! 订阅句柄
//!
//! RAII 风格的订阅守卫：取消即停止投递，drop 时自动取消。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;

/// 订阅的共享取消状态
///
/// 投递任务在每次回调前检查该标志，置位后不再有任何投递，
/// 因此在回调内部调用取消也是安全的。
#[derive(Debug, Default)]
pub struct SubscriptionState {
    cancelled: AtomicBool,
}

impl SubscriptionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 置取消标志（幂等）
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 是否已取消
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// 订阅守卫
///
/// 持有投递任务与取消标志。`unsubscribe` 可在任意时刻调用，
/// 包括投递回调内部；drop 时自动取消并回收投递任务。
pub struct Subscription {
    state: Arc<SubscriptionState>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(state: Arc<SubscriptionState>, task: JoinHandle<()>) -> Self {
        Self { state, task }
    }

    /// 取消订阅，之后不再有任何回调投递
    pub fn unsubscribe(&self) {
        self.state.cancel();
    }

    /// 订阅是否已取消（含错误终止）
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.state.cancel();
        // 投递任务要么已自然退出，要么停在队列等待上，中止它不会切断
        // 正在执行的同步回调
        self.task.abort();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
