//! 文件路径分类

use crate::config::PathPolicyConfig;

/// 判断资源路径是否允许访问
///
/// 命中任一拒绝片段即不安全；路径同时包含本模块自身安装位置的标记时始终安全。
#[derive(Debug, Clone)]
pub struct PathClassifier {
    deny: Vec<String>,
    self_markers: Vec<String>,
}

impl PathClassifier {
    pub fn new<D, M>(deny: D, self_markers: M) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            deny: deny.into_iter().map(Into::into).collect(),
            self_markers: self_markers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &PathPolicyConfig) -> Self {
        Self::new(config.deny.iter().cloned(), config.self_markers.iter().cloned())
    }

    pub fn is_safe(&self, path: &str) -> bool {
        let path = path.replace('\\', "/");
        if self.self_markers.iter().any(|m| path.contains(m.as_str())) {
            return true;
        }
        !self.deny.iter().any(|d| path.contains(d.as_str()))
    }

    /// 重命名要求新旧路径都安全
    pub fn is_rename_safe(&self, from: &str, to: &str) -> bool {
        self.is_safe(from) && self.is_safe(to)
    }
}

impl Default for PathClassifier {
    fn default() -> Self {
        Self::from_config(&PathPolicyConfig::default())
    }
}
