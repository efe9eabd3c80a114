//! 内置拦截目标
//!
//! 宿主按 `(owner, operation)` 查表获取开关名与拦截文案，再交给 [`InterceptionEngine`]
//! 安装。
//!
//! [`InterceptionEngine`]: super::InterceptionEngine

use super::engine::HookSpec;

/// 一个内置拦截目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookTarget {
    pub owner: &'static str,
    pub operation: &'static str,
    pub flag: &'static str,
    pub message: &'static str,
}

impl HookTarget {
    /// 预填开关与文案的安装参数
    pub fn spec<X>(&self) -> HookSpec<X> {
        HookSpec::new().flag(self.flag).message(self.message)
    }
}

const fn target(
    owner: &'static str,
    operation: &'static str,
    flag: &'static str,
    message: &'static str,
) -> HookTarget {
    HookTarget {
        owner,
        operation,
        flag,
        message,
    }
}

pub const STANDARD_TARGETS: &[HookTarget] = &[
    target("Context", "emit", "contextEmit", "已为您阻止插件发出 Koishi 事件"),
    target("Context", "on", "contextOn", "已为您阻止插件 *监听* 您的 Koishi"),
    target("Context", "middleware", "contextMiddleware", "已为您阻止插件 hook 消息"),
    target("Context", "plugin", "contextPlugin", "已为您阻止 危险插件 的加载"),
    target("Loader", "resolve", "loaderResolve", "已为您阻止一个 危险插件 的解析"),
    target("Loader", "reloadPlugin", "loaderReloadPlugin", "已为您阻止一个 危险操作"),
    target("NodeLoader", "resolve", "nodeLoaderResolve", "已为您阻止一个 危险插件 的解析"),
    target("NodeLoader", "writeConfig", "nodeLoaderWriteConfig", "已为您阻止插件写入配置"),
    target("NodeLoader", "readConfig", "nodeLoaderReadConfig", "已为您阻止插件读取 Koishi 配置"),
    target("Loader", "unloadPlugin", "ctxLoaderUnloadPlugin", "已为您阻止意外的插件卸载"),
    target("ConfigWriter", "unload", "configWriterUnload", "已为您阻止意外的插件卸载"),
    target("ConfigWriter", "remove", "configWriterRemove", "已为您阻止意外的插件移除"),
    target("I18n", "find", "i18nFind", "已为您优化I18n翻译"),
    target("console", "market/install", "marketInstall", "已为您阻止 market 安装不安全插件"),
];

pub fn find(owner: &str, operation: &str) -> Option<&'static HookTarget> {
    STANDARD_TARGETS
        .iter()
        .find(|t| t.owner == owner && t.operation == operation)
}

pub fn find_by_flag(flag: &str) -> Option<&'static HookTarget> {
    STANDARD_TARGETS.iter().find(|t| t.flag == flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_OPTIONS;
    use crate::feature::naming;

    #[test]
    fn test_every_target_has_documented_default() {
        for target in STANDARD_TARGETS {
            let key = naming::config_key(target.flag);
            assert!(
                DEFAULT_OPTIONS.contains_key(&key),
                "missing default for {key}"
            );
        }
    }

    #[test]
    fn test_target_spec_binds_flag_and_message() {
        use crate::context::GuardContext;
        use crate::hooks::{InterceptionEngine, SyncOperation};

        let engine = InterceptionEngine::new(GuardContext::in_memory().unwrap());
        let target = find("Context", "middleware").unwrap();
        let op: SyncOperation<(), String, bool> =
            SyncOperation::new(target.owner, target.operation, |_: &(), _: &String| Ok(true));

        let hooked = engine.wrap(&op, target.spec()).unwrap();
        assert_eq!(hooked.record.registry_name, "contextMiddleware");
        assert_eq!(hooked.record.message, "已为您阻止插件 hook 消息");
        assert_eq!(hooked.record.hooked_name, "Context.middleware");
    }

    #[test]
    fn test_find() {
        let plugin = find("Context", "plugin").unwrap();
        assert_eq!(plugin.flag, "contextPlugin");
        assert!(find("Context", "dispose").is_none());
        assert_eq!(
            find_by_flag("marketInstall").unwrap().operation,
            "market/install"
        );
    }
}
