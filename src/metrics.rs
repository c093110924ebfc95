//! # Prometheus 指标收集模块
//!
//! 为消息核心提供统一的 Prometheus 指标收集能力。

use once_cell::sync::Lazy;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 消息核心指标
pub struct ChatMetrics {
    /// 消息发送总数
    pub messages_sent_total: IntCounterVec,
    /// 消息发送耗时（秒，含附件上传）
    pub messages_sent_duration_seconds: Histogram,
    /// 表情回应写入总数（按操作区分 add/remove/noop）
    pub reactions_applied_total: IntCounterVec,
    /// 已读回执批量大小
    pub read_receipt_batch_size: Histogram,
    /// 输入状态写入总数
    pub typing_updates_total: IntCounter,
    /// 订阅投递失败总数
    pub subscription_errors_total: IntCounter,
}

impl ChatMetrics {
    pub fn new() -> Self {
        let messages_sent_total = IntCounterVec::new(
            Opts::new("chat_messages_sent_total", "Total number of messages sent"),
            &["channel_id"],
        )
        .expect("Failed to create chat_messages_sent_total metric");

        let messages_sent_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "chat_messages_sent_duration_seconds",
                "Message sending duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )
        .expect("Failed to create chat_messages_sent_duration_seconds metric");

        let reactions_applied_total = IntCounterVec::new(
            Opts::new(
                "chat_reactions_applied_total",
                "Total number of reaction operations",
            ),
            &["op"],
        )
        .expect("Failed to create chat_reactions_applied_total metric");

        let read_receipt_batch_size = Histogram::with_opts(
            HistogramOpts::new(
                "chat_read_receipt_batch_size",
                "Number of messages transitioned per mark-read batch",
            )
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]),
        )
        .expect("Failed to create chat_read_receipt_batch_size metric");

        let typing_updates_total = IntCounter::new(
            "chat_typing_updates_total",
            "Total number of typing indicator writes",
        )
        .expect("Failed to create chat_typing_updates_total metric");

        let subscription_errors_total = IntCounter::new(
            "chat_subscription_errors_total",
            "Total number of subscription delivery failures",
        )
        .expect("Failed to create chat_subscription_errors_total metric");

        // 注册指标，忽略重复注册错误（在基准测试中可能会重复创建）
        let _ = REGISTRY.register(Box::new(messages_sent_total.clone()));
        let _ = REGISTRY.register(Box::new(messages_sent_duration_seconds.clone()));
        let _ = REGISTRY.register(Box::new(reactions_applied_total.clone()));
        let _ = REGISTRY.register(Box::new(read_receipt_batch_size.clone()));
        let _ = REGISTRY.register(Box::new(typing_updates_total.clone()));
        let _ = REGISTRY.register(Box::new(subscription_errors_total.clone()));

        Self {
            messages_sent_total,
            messages_sent_duration_seconds,
            reactions_applied_total,
            read_receipt_batch_size,
            typing_updates_total,
            subscription_errors_total,
        }
    }
}

impl Default for ChatMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 导出全局注册表中的所有指标（Prometheus 文本格式）
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
