//! 配置管理器 - 负责环境特定配置的选择与覆盖

use std::env;
use std::path::Path;

use anyhow::Result;
use toml::Value;
use tracing::debug;

use super::{load_toml_value, merge_value};

/// 环境变量：当前环境名称
pub const ENV_VAR: &str = "K2S_ENV";

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 `K2S_ENV` 读取，未设置时默认为 "development"
    pub fn get_environment() -> String {
        env::var(ENV_VAR).unwrap_or_else(|_| "development".to_string())
    }

    /// 合并 `{base_dir}/environments/{environment}.toml`（若存在）
    pub fn load_environment_config(base: &mut Value, base_dir: &Path) -> Result<()> {
        Self::load_environment_named(base, base_dir, &Self::get_environment())
    }

    pub(crate) fn load_environment_named(
        base: &mut Value,
        base_dir: &Path,
        environment: &str,
    ) -> Result<()> {
        let env_config_path = base_dir
            .join("environments")
            .join(format!("{environment}.toml"));

        if env_config_path.exists() {
            let overlay = load_toml_value(&env_config_path)?;
            merge_value(base, overlay);
            debug!(
                environment = %environment,
                path = %env_config_path.display(),
                "merged environment config"
            );
        }

        Ok(())
    }
}
