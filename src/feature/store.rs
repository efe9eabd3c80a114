use std::collections::BTreeMap;

use dashmap::DashMap;

/// 宿主配置存储能力
///
/// 功能开关的每次写入都会同步镜像到这里，宿主的配置视图无需额外同步。
pub trait ConfigStore: Send + Sync {
    fn write_option(&self, key: &str, value: Option<bool>);

    /// 外层 `None` 表示从未写入，内层 `None` 表示显式清除
    fn read_option(&self, key: &str) -> Option<Option<bool>>;
}

/// 进程内配置存储
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: DashMap<String, Option<bool>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前配置视图（按键排序）
    pub fn snapshot(&self) -> BTreeMap<String, Option<bool>> {
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn write_option(&self, key: &str, value: Option<bool>) {
        self.values.insert(key.to_string(), value);
    }

    fn read_option(&self, key: &str) -> Option<Option<bool>> {
        self.values.get(key).map(|entry| *entry.value())
    }
}
