//! 日志初始化模块
//!
//! 宿主负责自身的日志设置；独立运行或测试时可通过此处初始化 `tracing` 订阅者。

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// 从配置初始化日志系统
///
/// # 参数
/// * `logging_config` - 日志配置（可选），为 None 时使用默认配置（info 级别）
///
/// # 示例
/// ```rust,ignore
/// use k2s_core::config::LoggingConfig;
///
/// init_tracing_from_config(None);
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     with_target: false,
///     with_thread_ids: true,
///     with_file: true,
///     with_line_number: true,
///     json: false,
/// };
/// init_tracing_from_config(Some(&config));
/// ```
pub fn init_tracing_from_config(logging_config: Option<&LoggingConfig>) {
    let default_config = LoggingConfig::default();
    let config = logging_config.unwrap_or(&default_config);

    // 优先使用环境变量 RUST_LOG
    let env_filter = build_filter(config);

    let result = if config.json {
        fmt::Subscriber::builder()
            .json()
            .with_target(config.with_target)
            .with_thread_ids(config.with_thread_ids)
            .with_file(config.with_file)
            .with_line_number(config.with_line_number)
            .with_env_filter(env_filter)
            .try_init()
    } else {
        fmt::Subscriber::builder()
            .with_target(config.with_target)
            .with_thread_ids(config.with_thread_ids)
            .with_file(config.with_file)
            .with_line_number(config.with_line_number)
            .with_env_filter(env_filter)
            .try_init()
    };

    // 宿主可能已经安装了全局订阅者
    if let Err(err) = result {
        tracing::debug!("tracing subscriber already installed: {err}");
    }
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}
