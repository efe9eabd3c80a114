//! k2s 配置模块
//!
//! 该模块提供守护层的配置加载功能，包括：
//! - 配置文件或配置目录的加载与合并
//! - 环境特定配置覆盖
//! - 各开关的文档默认值

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use serde::Deserialize;
use toml::Value;
use tracing::warn;

mod manager;
pub use manager::ConfigManager;

/// 各开关的文档默认值
///
/// 破坏性或与卸载相关的开关默认开启，读取与解析类开关默认关闭。
pub static DEFAULT_OPTIONS: Lazy<BTreeMap<String, bool>> = Lazy::new(|| {
    [
        ("optionBlockContextEmit", false),
        ("optionBlockContextOn", false),
        ("optionBlockContextMiddleware", true),
        ("optionBlockContextPlugin", true),
        ("optionBlockLoaderResolve", false),
        ("optionBlockLoaderReloadPlugin", true),
        ("optionBlockNodeLoaderResolve", false),
        ("optionBlockNodeLoaderWriteConfig", true),
        ("optionBlockNodeLoaderReadConfig", false),
        ("optionBlockI18nFind", false),
        ("optionObfuscateI18nFind", true),
        ("optionBlockMarketInstall", true),
        ("optionBlockCtxLoaderUnloadPlugin", true),
        ("optionBlockConfigWriterUnload", true),
        ("optionBlockConfigWriterRemove", true),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect()
});

/// 守护层配置
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    /// 开关配置，键为配置键（如 `optionBlockContextEmit`）
    #[serde(default = "default_options")]
    pub options: BTreeMap<String, bool>,
    #[serde(default)]
    pub path_policy: PathPolicyConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            options: default_options(),
            path_policy: PathPolicyConfig::default(),
            bootstrap: BootstrapConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GuardConfig {
    pub fn option(&self, key: &str) -> Option<bool> {
        self.options.get(key).copied()
    }

    /// 未显式配置的开关补齐为文档默认值
    fn ensure_defaults(&mut self) {
        for (key, value) in DEFAULT_OPTIONS.iter() {
            self.options.entry(key.clone()).or_insert(*value);
        }
    }
}

/// 文件路径策略
#[derive(Debug, Clone, Deserialize)]
pub struct PathPolicyConfig {
    /// 命中任一片段即视为不安全
    #[serde(default = "default_deny_fragments")]
    pub deny: Vec<String>,
    /// 本模块自身安装位置的标记，命中即视为安全
    #[serde(default = "default_self_markers")]
    pub self_markers: Vec<String>,
}

impl Default for PathPolicyConfig {
    fn default() -> Self {
        Self {
            deny: default_deny_fragments(),
            self_markers: default_self_markers(),
        }
    }
}

/// 启动配置
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    /// 延迟生效的开关，等待宿主启动期写配置完成
    #[serde(default = "default_deferred_options")]
    pub deferred_options: Vec<String>,
    /// 延迟时长（毫秒）
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            deferred_options: default_deferred_options(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别，`RUST_LOG` 未设置时生效
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub with_target: bool,
    #[serde(default)]
    pub with_thread_ids: bool,
    #[serde(default)]
    pub with_file: bool,
    #[serde(default)]
    pub with_line_number: bool,
    /// 以 JSON 格式输出
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
            json: false,
        }
    }
}

fn default_options() -> BTreeMap<String, bool> {
    DEFAULT_OPTIONS.clone()
}

fn default_deny_fragments() -> Vec<String> {
    [
        "node_modules",
        "package.json",
        "koishi.yml",
        "tsconfig",
        "/src",
        "/client",
        "/lib",
        "/dist",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_self_markers() -> Vec<String> {
    vec!["k2345-security".to_string()]
}

fn default_deferred_options() -> Vec<String> {
    vec!["optionBlockNodeLoaderWriteConfig".to_string()]
}

fn default_grace_period_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// 加载配置
///
/// 未指定路径时依次尝试 `config/k2s.toml`、`k2s.toml`，全部失败则使用默认配置。
pub fn load_config(path: Option<&str>) -> GuardConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config/k2s.toml"), PathBuf::from("k2s.toml")],
    };

    load_with_fallback(&candidates)
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> GuardConfig {
    for path in candidates {
        match load_config_from_source(path) {
            Ok(cfg) => return cfg,
            Err(err) => {
                warn!("failed to load config from {}: {err:#}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    GuardConfig::default()
}

/// 从文件或目录加载配置，并合并环境特定配置
pub fn load_config_from_source(path: &Path) -> Result<GuardConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    let (mut merged, base_dir) = if metadata.is_dir() {
        (load_config_directory(path)?, path.to_path_buf())
    } else {
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        (load_toml_value(path)?, base_dir)
    };

    ConfigManager::load_environment_config(&mut merged, &base_dir)?;

    let mut cfg: GuardConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    cfg.ensure_defaults();
    Ok(cfg)
}

/// 从目录加载配置：`base.toml` 加 `overrides/` 下按文件名排序的片段
fn load_config_directory(path: &Path) -> Result<Value> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;
    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("overrides"))?;
    Ok(merged)
}

fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in {}", path.display()))?;
    Ok(value)
}

/// 表按键递归合并，其余类型整体覆盖
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}
