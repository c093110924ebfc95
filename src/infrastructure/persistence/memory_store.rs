//! 内存实时存储
//!
//! [`RealtimeStore`] 的进程内实现，用于测试、基准与本地开发。
//! 所有写入在一把写锁下串行提交，订阅的注册与已有数据重放也在
//! 同一把锁下完成，因此：
//! - 全部订阅者观察到同一提交顺序；
//! - 每条记录要么出现在重放里、要么出现在增量里，恰好一次。
//!
//! 投递通过每个订阅者独立的无界队列异步完成，慢消费者不会阻塞提交。

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::sync::RwLock;
use tracing::warn;
use ulid::Generator;

use crate::domain::repository::{
    ChildAddedHandler, ErrorHandler, RealtimeStore, Subscription, SubscriptionState,
    ValueChangedHandler,
};
use crate::error::{ChatError, Result};

/// 存储树节点
#[derive(Debug, Clone)]
enum Node {
    /// 叶子值（对象以外的任意 JSON 值，数组按整体存放）
    Leaf(Value),
    /// 分支，子键有序
    Branch(BTreeMap<String, Node>),
}

impl Node {
    fn from_value(value: &Value) -> Node {
        match value {
            Value::Object(map) => {
                let mut children = BTreeMap::new();
                for (key, child) in map {
                    // 空值键等价于不存在
                    if child.is_null() {
                        continue;
                    }
                    children.insert(key.clone(), Node::from_value(child));
                }
                Node::Branch(children)
            }
            other => Node::Leaf(other.clone()),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Node::Leaf(value) => value.clone(),
            Node::Branch(children) => {
                let mut map = serde_json::Map::new();
                for (key, child) in children {
                    map.insert(key.clone(), child.to_value());
                }
                Value::Object(map)
            }
        }
    }

    fn node_at(&self, segs: &[String]) -> Option<&Node> {
        let mut current = self;
        for seg in segs {
            match current {
                Node::Branch(children) => current = children.get(seg)?,
                Node::Leaf(_) => return None,
            }
        }
        Some(current)
    }

    /// 走到 `segs` 指向的分支，路径上缺失的节点按分支创建，
    /// 途中的叶子被分支替换（与后端存储的深写语义一致）
    fn branch_at_mut(&mut self, segs: &[String]) -> &mut BTreeMap<String, Node> {
        let mut current = self;
        for seg in segs {
            if !matches!(current, Node::Branch(_)) {
                *current = Node::Branch(BTreeMap::new());
            }
            let Node::Branch(children) = current else {
                unreachable!("branch ensured above");
            };
            current = children
                .entry(seg.clone())
                .or_insert_with(|| Node::Branch(BTreeMap::new()));
        }
        if !matches!(current, Node::Branch(_)) {
            *current = Node::Branch(BTreeMap::new());
        }
        let Node::Branch(children) = current else {
            unreachable!("branch ensured above");
        };
        children
    }

    /// 删除 `segs` 指向的节点，并自底向上清理空分支。
    /// 返回是否真的删除了内容。
    fn remove_at(&mut self, segs: &[String]) -> bool {
        match self {
            Node::Leaf(_) => false,
            Node::Branch(children) => match segs {
                [] => false,
                [last] => children.remove(last).is_some(),
                [head, rest @ ..] => {
                    let Some(child) = children.get_mut(head) else {
                        return false;
                    };
                    let removed = child.remove_at(rest);
                    if removed {
                        if let Node::Branch(grand) = child {
                            if grand.is_empty() {
                                children.remove(head);
                            }
                        }
                    }
                    removed
                }
            },
        }
    }
}

/// 子节点订阅者
struct ChildWatcher {
    path: Vec<String>,
    state: Arc<SubscriptionState>,
    tx: UnboundedSender<(String, Value)>,
}

/// 子树快照订阅者
struct ValueWatcher {
    path: Vec<String>,
    state: Arc<SubscriptionState>,
    tx: UnboundedSender<Value>,
}

struct StoreInner {
    root: Node,
    keygen: Generator,
    child_watchers: Vec<ChildWatcher>,
    value_watchers: Vec<ValueWatcher>,
}

#[derive(Debug, Default)]
struct StoreCounters {
    creates: AtomicU64,
    leaf_writes: AtomicU64,
    batch_writes: AtomicU64,
    reads: AtomicU64,
}

/// 存储操作计数快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// `create` 调用数
    pub creates: u64,
    /// 单叶子写入调用数
    pub leaf_writes: u64,
    /// 批量写入调用数（每批记一次，空批不计）
    pub batch_writes: u64,
    /// 读取调用数
    pub reads: u64,
}

/// 内存实时存储
pub struct MemoryRealtimeStore {
    inner: Arc<RwLock<StoreInner>>,
    counters: Arc<StoreCounters>,
}

impl Default for MemoryRealtimeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRealtimeStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                root: Node::Branch(BTreeMap::new()),
                keygen: Generator::new(),
                child_watchers: Vec::new(),
                value_watchers: Vec::new(),
            })),
            counters: Arc::new(StoreCounters::default()),
        }
    }

    /// 存储操作计数
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            creates: self.counters.creates.load(Ordering::Relaxed),
            leaf_writes: self.counters.leaf_writes.load(Ordering::Relaxed),
            batch_writes: self.counters.batch_writes.load(Ordering::Relaxed),
            reads: self.counters.reads.load(Ordering::Relaxed),
        }
    }

    fn split_path(path: &str) -> Result<Vec<String>> {
        let segs: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if segs.is_empty() {
            return Err(ChatError::validation("store path must not be empty"));
        }
        Ok(segs)
    }

    /// 两条路径在祖先链上相关（一方是另一方的前缀）
    fn paths_related(a: &[String], b: &[String]) -> bool {
        let n = a.len().min(b.len());
        a[..n] == b[..n]
    }

    /// 向与 `written` 相关的全部快照订阅者投递当前快照
    fn notify_value_watchers(inner: &mut StoreInner, written: &[Vec<String>]) {
        let StoreInner {
            root,
            value_watchers,
            ..
        } = inner;
        value_watchers.retain(|watcher| {
            if watcher.state.is_cancelled() {
                return false;
            }
            let affected = written
                .iter()
                .any(|path| Self::paths_related(&watcher.path, path));
            if !affected {
                return true;
            }
            let snapshot = root
                .node_at(&watcher.path)
                .map(Node::to_value)
                .unwrap_or(Value::Null);
            watcher.tx.send(snapshot).is_ok()
        });
    }

    /// 向 `parent` 的子节点订阅者投递新增事件
    fn notify_child_watchers(inner: &mut StoreInner, parent: &[String], key: &str, value: &Value) {
        inner.child_watchers.retain(|watcher| {
            if watcher.state.is_cancelled() {
                return false;
            }
            if watcher.path != parent {
                return true;
            }
            watcher.tx.send((key.to_string(), value.clone())).is_ok()
        });
    }

    /// 在写锁内生效一组叶子写入，返回本批新出现的直接子节点
    fn apply_leaf_updates(
        inner: &mut StoreInner,
        updates: &[(Vec<String>, Value)],
    ) -> Vec<(Vec<String>, String)> {
        let mut created = Vec::new();
        let mut seen: BTreeSet<Vec<String>> = BTreeSet::new();
        for (segs, value) in updates {
            let (parent, key) = segs.split_at(segs.len() - 1);
            let key = &key[0];
            if value.is_null() {
                inner.root.remove_at(segs);
                continue;
            }
            let branch = inner.root.branch_at_mut(parent);
            let existed = branch.contains_key(key);
            branch.insert(key.clone(), Node::from_value(value));
            if !existed && seen.insert(segs.clone()) {
                created.push((parent.to_vec(), key.clone()));
            }
        }
        created
    }

    async fn write_leaves(&self, updates: Vec<(String, Value)>) -> Result<()> {
        let mut parsed = Vec::with_capacity(updates.len());
        for (path, value) in updates {
            parsed.push((Self::split_path(&path)?, value));
        }

        let mut inner = self.inner.write().await;
        let created = Self::apply_leaf_updates(&mut inner, &parsed);
        for (parent, key) in &created {
            let value = inner
                .root
                .node_at(parent)
                .and_then(|node| match node {
                    Node::Branch(children) => children.get(key),
                    Node::Leaf(_) => None,
                })
                .map(Node::to_value)
                .unwrap_or(Value::Null);
            Self::notify_child_watchers(&mut inner, parent, key, &value);
        }
        let written: Vec<Vec<String>> = parsed.into_iter().map(|(segs, _)| segs).collect();
        Self::notify_value_watchers(&mut inner, &written);
        Ok(())
    }
}

#[async_trait]
impl RealtimeStore for MemoryRealtimeStore {
    async fn create(&self, path: &str, value: Value) -> Result<String> {
        if value.is_null() {
            return Err(ChatError::validation("cannot create a null value"));
        }
        let segs = Self::split_path(path)?;

        let mut inner = self.inner.write().await;
        let key = inner
            .keygen
            .generate()
            .map_err(|e| ChatError::store(format!("key generation failed: {e}")))?
            .to_string();
        let branch = inner.root.branch_at_mut(&segs);
        branch.insert(key.clone(), Node::from_value(&value));
        self.counters.creates.fetch_add(1, Ordering::Relaxed);

        Self::notify_child_watchers(&mut inner, &segs, &key, &value);
        let mut written = segs;
        written.push(key.clone());
        Self::notify_value_watchers(&mut inner, &[written]);
        Ok(key)
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let segs = Self::split_path(path)?;
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.read().await;
        Ok(inner.root.node_at(&segs).map(Node::to_value))
    }

    async fn update_leaf(&self, path: &str, value: Value) -> Result<()> {
        self.write_leaves(vec![(path.to_string(), value)]).await?;
        self.counters.leaf_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn update_leaves(&self, updates: Vec<(String, Value)>) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.write_leaves(updates).await?;
        self.counters.batch_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Vec<(String, Value)>> {
        let segs = Self::split_path(path)?;
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.read().await;
        let Some(Node::Branch(children)) = inner.root.node_at(&segs) else {
            return Ok(Vec::new());
        };
        Ok(children
            .iter()
            .map(|(key, node)| (key.clone(), node.to_value()))
            .collect())
    }

    async fn children_before(
        &self,
        path: &str,
        end_exclusive: &str,
        limit: usize,
    ) -> Result<Vec<(String, Value)>> {
        let segs = Self::split_path(path)?;
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        let Some(Node::Branch(children)) = inner.root.node_at(&segs) else {
            return Ok(Vec::new());
        };
        let mut page: Vec<(String, Value)> = children
            .range::<str, _>((Bound::Unbounded, Bound::Excluded(end_exclusive)))
            .rev()
            .take(limit)
            .map(|(key, node)| (key.clone(), node.to_value()))
            .collect();
        page.reverse();
        Ok(page)
    }

    async fn subscribe_children(
        &self,
        path: &str,
        on_child_added: ChildAddedHandler,
        on_error: ErrorHandler,
    ) -> Result<Subscription> {
        let segs = Self::split_path(path)?;
        let (tx, mut rx) = unbounded_channel::<(String, Value)>();
        let state = Arc::new(SubscriptionState::new());

        {
            // 重放与注册在同一把写锁下完成：先于注册提交的记录全部进入
            // 重放，晚于注册的提交全部进入增量，二者不重不漏
            let mut inner = self.inner.write().await;
            if let Some(Node::Branch(children)) = inner.root.node_at(&segs) {
                for (key, node) in children {
                    let _ = tx.send((key.clone(), node.to_value()));
                }
            }
            inner.child_watchers.push(ChildWatcher {
                path: segs,
                state: state.clone(),
                tx,
            });
        }

        let task_state = state.clone();
        let task = tokio::spawn(async move {
            while let Some((key, value)) = rx.recv().await {
                if task_state.is_cancelled() {
                    break;
                }
                if let Err(err) = on_child_added(&key, &value) {
                    task_state.cancel();
                    warn!("child subscription terminated: {err}");
                    on_error(err);
                    break;
                }
            }
        });

        Ok(Subscription::new(state, task))
    }

    async fn subscribe_value(
        &self,
        path: &str,
        on_change: ValueChangedHandler,
        on_error: ErrorHandler,
    ) -> Result<Subscription> {
        let segs = Self::split_path(path)?;
        let (tx, mut rx) = unbounded_channel::<Value>();
        let state = Arc::new(SubscriptionState::new());

        {
            let mut inner = self.inner.write().await;
            let snapshot = inner
                .root
                .node_at(&segs)
                .map(Node::to_value)
                .unwrap_or(Value::Null);
            let _ = tx.send(snapshot);
            inner.value_watchers.push(ValueWatcher {
                path: segs,
                state: state.clone(),
                tx,
            });
        }

        let task_state = state.clone();
        let task = tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                if task_state.is_cancelled() {
                    break;
                }
                if let Err(err) = on_change(&value) {
                    task_state.cancel();
                    warn!("value subscription terminated: {err}");
                    on_error(err);
                    break;
                }
            }
        });

        Ok(Subscription::new(state, task))
    }
}
