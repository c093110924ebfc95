//! 配置模块
//!
//! 提供消息核心的配置管理：
//! - TOML 配置文件加载与解析
//! - 各字段的生产默认值
//! - 全局只读配置实例（`OnceLock`，只初始化一次）
//!
//! 组件构造时显式传入配置引用；全局访问器仅供应用入口使用，
//! 核心逻辑不依赖全局状态。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::warn;

/// 全局应用配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<ChatConfig> = OnceLock::new();

/// 消息行为配置
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    /// 输入状态条目的存活时间（秒），超过后视为过期
    #[serde(default = "default_typing_ttl_seconds")]
    pub typing_ttl_seconds: u64,
    /// 输入状态订阅的过期扫描间隔（毫秒）
    #[serde(default = "default_typing_sweep_interval_ms")]
    pub typing_sweep_interval_ms: u64,
    /// 单页消息数量上限（分页查询的 limit 会被收紧到该值）
    #[serde(default = "default_page_size_limit")]
    pub page_size_limit: usize,
}

fn default_typing_ttl_seconds() -> u64 {
    10
}

fn default_typing_sweep_interval_ms() -> u64 {
    1000
}

fn default_page_size_limit() -> usize {
    100
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            typing_ttl_seconds: default_typing_ttl_seconds(),
            typing_sweep_interval_ms: default_typing_sweep_interval_ms(),
            page_size_limit: default_page_size_limit(),
        }
    }
}

impl MessagingConfig {
    /// 输入状态存活时间
    pub fn typing_ttl(&self) -> Duration {
        Duration::from_secs(self.typing_ttl_seconds)
    }

    /// 输入状态扫描间隔
    pub fn typing_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.typing_sweep_interval_ms)
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（trace/debug/info/warn/error）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 输出格式（text/json）
    #[serde(default = "default_log_format")]
    pub format: String,
    /// 是否输出日志目标
    #[serde(default = "default_true")]
    pub with_target: bool,
    /// 是否输出线程 ID
    #[serde(default)]
    pub with_thread_ids: bool,
    /// 是否输出源文件名
    #[serde(default)]
    pub with_file: bool,
    /// 是否输出行号
    #[serde(default)]
    pub with_line_number: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

/// 应用配置根
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatConfig {
    /// 消息行为配置
    #[serde(default)]
    pub messaging: MessagingConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ChatConfig {
    /// 确保配置有合法取值，非法值回退到默认
    fn ensure_defaults(&mut self) {
        if self.messaging.typing_ttl_seconds == 0 {
            self.messaging.typing_ttl_seconds = default_typing_ttl_seconds();
        }
        if self.messaging.typing_sweep_interval_ms == 0 {
            self.messaging.typing_sweep_interval_ms = default_typing_sweep_interval_ms();
        }
        if self.messaging.page_size_limit == 0 {
            self.messaging.page_size_limit = default_page_size_limit();
        }
    }
}

/// 加载配置
///
/// `path` 为 None 时依次尝试 `config.toml`、`config/campus-chat.toml`；
/// 所有候选都失败则回退到默认配置。
pub fn load_config(path: Option<&str>) -> &'static ChatConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![
            PathBuf::from("config.toml"),
            PathBuf::from("config/campus-chat.toml"),
        ],
    };

    APP_CONFIG.get_or_init(|| load_with_fallback(&candidates))
}

/// 获取应用配置
pub fn app_config() -> &'static ChatConfig {
    APP_CONFIG.get().expect("configuration not initialised")
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> ChatConfig {
    for path in candidates {
        match load_config_from_source(path) {
            Ok(mut cfg) => {
                cfg.ensure_defaults();
                return cfg;
            }
            Err(err) => {
                warn!("failed to load config from {}: {err}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    ChatConfig::default()
}

/// 从源加载配置
fn load_config_from_source(path: &Path) -> Result<ChatConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("failed to parse configuration file {}", path.display()))
}
