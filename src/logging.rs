//! 日志初始化模块
//!
//! 基于 `tracing-subscriber` 的统一日志初始化。
//! 订阅错误、状态迁移与扇出路径都会产生结构化日志，
//! 但日志只是补充观测手段，错误本身仍然通过返回值与回调传播。

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// 从配置初始化日志系统
///
/// 优先使用环境变量 `RUST_LOG`，未设置时采用配置文件中的日志级别。
/// `logging_config` 为 None 时使用默认配置（info 级别、文本格式）。
pub fn init_logging(logging_config: Option<&LoggingConfig>) {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level_str = logging_config.map(|c| c.level.as_str()).unwrap_or("info");
            EnvFilter::new(level_str)
        }
    };

    let default_config = LoggingConfig::default();
    let config = logging_config.unwrap_or(&default_config);

    let builder = fmt::Subscriber::builder()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file)
        .with_line_number(config.with_line_number)
        .with_env_filter(env_filter);

    if config.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
