use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{GuardError, Result};

use super::naming;
use super::store::ConfigStore;

/// 开关的四态视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagState {
    Enabled,
    Disabled,
    /// 显式清除
    Cleared,
    /// 从未配置
    Absent,
}

impl fmt::Display for FlagState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagState::Enabled => write!(f, "enabled"),
            FlagState::Disabled => write!(f, "disabled"),
            FlagState::Cleared => write!(f, "cleared"),
            FlagState::Absent => write!(f, "absent"),
        }
    }
}

/// 功能开关注册表
///
/// 名称既可以是裸名称（`contextEmit`），也可以是配置键（`optionBlockContextEmit`），
/// 两者都会归一化到同一个开关上。每次写入同步镜像到 [`ConfigStore`]。
pub struct FeatureRegistry {
    flags: DashMap<String, Option<bool>>,
    store: Arc<dyn ConfigStore>,
}

impl FeatureRegistry {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            flags: DashMap::new(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    pub fn has(&self, name: &str) -> bool {
        self.flags.contains_key(&naming::normalize(name))
    }

    /// 读取开关值；从未配置与显式清除都返回 `None`，需要区分时使用 [`Self::state`]
    pub fn get(&self, name: &str) -> Option<bool> {
        self.flags
            .get(&naming::normalize(name))
            .and_then(|entry| *entry.value())
    }

    /// 开关未设置（从未配置或已清除）时返回 `default`
    pub fn get_or(&self, name: &str, default: Option<bool>) -> Option<bool> {
        self.get(name).or(default)
    }

    pub fn state(&self, name: &str) -> FlagState {
        match self.flags.get(&naming::normalize(name)).map(|entry| *entry.value()) {
            Some(Some(true)) => FlagState::Enabled,
            Some(Some(false)) => FlagState::Disabled,
            Some(None) => FlagState::Cleared,
            None => FlagState::Absent,
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name) == Some(true)
    }

    pub fn set(&self, name: &str, enable: bool) -> Result<()> {
        self.set_value(name, Some(enable))
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        self.set_value(name, Some(true))
    }

    pub fn reset(&self, name: &str) -> Result<()> {
        self.set_value(name, Some(false))
    }

    pub fn clear(&self, name: &str) -> Result<()> {
        self.set_value(name, None)
    }

    pub fn set_value(&self, name: &str, value: Option<bool>) -> Result<()> {
        validate_name(name)?;
        let flag = naming::normalize(name);
        let key = naming::config_key(&flag);

        self.flags.insert(flag, value);
        self.store.write_option(&key, value);
        Ok(())
    }

    /// 仅当开关从未配置时写入，返回是否发生了写入
    pub fn seed(&self, name: &str, value: Option<bool>) -> Result<bool> {
        validate_name(name)?;
        let flag = naming::normalize(name);
        let key = naming::config_key(&flag);

        match self.flags.entry(flag) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(value);
                self.store.write_option(&key, value);
                Ok(true)
            }
        }
    }

    /// 批量应用配置项
    pub fn apply_options<'a, I>(&self, options: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        for (key, value) in options {
            self.set(key, value)?;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> BTreeMap<String, Option<bool>> {
        self.flags
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

impl fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureRegistry")
            .field("flags", &self.snapshot())
            .finish()
    }
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GuardError::configuration("feature name must not be empty"));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(GuardError::configuration(format!(
            "invalid feature name: {name:?}"
        )));
    }
    Ok(())
}
