//! K2S 错误工具模块
//!
//! - `ConfigurationError`：安装期错误（目标缺失、重复 hook），不重试
//! - `DenialError`：被拦截的破坏性操作，抛出前总会先触发一次告警
//! - 其余宿主侧失败统一包装为 `Operation`

use rand::Rng;
use thiserror::Error;

/// 拒绝访问时附带的展示用短语，仅用于显示
const DENIAL_FLAVORS: &[&str] = &[
    "何をしているのですか（笑）",
    "アクセスが拒否されましたです~",
    "アクセスなし",
    "欲しくない!",
    "どうしたの?",
    "何か奇妙なことが起こりました!",
];

pub type Result<T> = std::result::Result<T, GuardError>;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Denied(#[from] DenialError),
    #[error("operation failed: {0}")]
    Operation(#[from] anyhow::Error),
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl GuardError {
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        GuardError::Configuration(message.into())
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, GuardError::Denied(_))
    }

    pub fn as_denial(&self) -> Option<&DenialError> {
        match self {
            GuardError::Denied(denial) => Some(denial),
            _ => None,
        }
    }
}

/// 被拦截操作的拒绝错误
#[derive(Debug, Clone, Error)]
#[error("access denied: {message} - {flavor}")]
pub struct DenialError {
    pub registry_name: String,
    pub hooked_name: String,
    pub message: String,
    pub flavor: &'static str,
}

impl DenialError {
    /// 构造拒绝错误并随机挑选一条展示短语
    ///
    /// 调用方需要自行保证在此之前已经触发过告警，见 [`crate::alert::AlertBroadcaster::deny`]。
    pub(crate) fn new<N, H, M>(registry_name: N, hooked_name: H, message: M) -> Self
    where
        N: Into<String>,
        H: Into<String>,
        M: Into<String>,
    {
        let flavor = DENIAL_FLAVORS[rand::thread_rng().gen_range(0..DENIAL_FLAVORS.len())];
        Self {
            registry_name: registry_name.into(),
            hooked_name: hooked_name.into(),
            message: message.into(),
            flavor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_error_display_carries_flavor() {
        let err = DenialError::new("explorerWrite", "explorer/write", "已为您阻止篡改关键性数据");
        assert!(DENIAL_FLAVORS.contains(&err.flavor));

        let rendered = err.to_string();
        assert!(rendered.starts_with("access denied: 已为您阻止篡改关键性数据 - "));
        assert!(rendered.ends_with(err.flavor));
    }

    #[test]
    fn test_guard_error_denial_accessors() {
        let err: GuardError = DenialError::new("unloadProtect", "unload", "已为您阻止意外操作").into();
        assert!(err.is_denied());
        assert_eq!(err.as_denial().map(|d| d.hooked_name.as_str()), Some("unload"));

        let cfg = GuardError::configuration("hooked twice");
        assert!(!cfg.is_denied());
        assert!(cfg.as_denial().is_none());
    }
}
