//! # 守护层启动器
//!
//! 负责从配置恢复开关状态、组装各组件并输出启动横幅

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GuardConfig;
use crate::context::GuardContext;
use crate::error::{GuardError, Result};
use crate::feature::ConfigStore;

use super::wire::{self, GuardApplication};

pub const LOADED_BANNER: &str = "已加载 koishi-k2345-security! 请查看插件配置!";
pub const NOTICE_TITLE: &str = "k2345 Security";

/// 应用启动器
pub struct GuardBootstrap;

impl GuardBootstrap {
    /// 组装守护层并输出启动横幅
    ///
    /// 存在延迟开关时需要在 tokio 运行时内调用，否则返回配置错误。
    pub fn run(config: &GuardConfig, store: Arc<dyn ConfigStore>) -> Result<GuardApplication> {
        let application = wire::initialize(config, store)?;
        Self::announce(&application.ctx);
        Ok(application)
    }

    /// 把配置中的开关写入注册表
    ///
    /// `bootstrap.deferred_options` 中的开关在宽限期后由单次延迟任务写入，
    /// 让宿主启动期的配置写入不受拦截。返回该任务的句柄。
    /// 存在延迟开关但当前不在 tokio 运行时内时，不写入任何开关并返回配置错误。
    pub fn seed(ctx: &Arc<GuardContext>, config: &GuardConfig) -> Result<Option<JoinHandle<()>>> {
        let (deferred, immediate): (BTreeMap<_, _>, BTreeMap<_, _>) = config
            .options
            .iter()
            .map(|(key, value)| (key.clone(), *value))
            .partition(|(key, _)| config.bootstrap.deferred_options.contains(key));

        let runtime = if deferred.is_empty() {
            None
        } else {
            let handle = Handle::try_current().map_err(|err| {
                GuardError::configuration(format!(
                    "deferred options require a tokio runtime: {err}"
                ))
            })?;
            Some(handle)
        };

        for (key, value) in &immediate {
            ctx.features().set(key, *value)?;
        }

        let Some(runtime) = runtime else {
            return Ok(None);
        };

        let grace = Duration::from_millis(config.bootstrap.grace_period_ms);
        debug!(options = ?deferred, grace_ms = config.bootstrap.grace_period_ms, "deferring options");

        let ctx = ctx.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            for (key, value) in deferred {
                match ctx.features().set(&key, value) {
                    Ok(()) => debug!(option = %key, value, "applied deferred option"),
                    Err(err) => warn!(option = %key, "failed to apply deferred option: {err}"),
                }
            }
        });

        Ok(Some(handle))
    }

    /// 输出启动横幅与开关快照，并广播一条通知
    pub fn announce(ctx: &GuardContext) {
        info!("{LOADED_BANNER}");
        debug!(features = ?ctx.features().snapshot(), "feature snapshot");
        ctx.alerts().notice(NOTICE_TITLE, LOADED_BANNER);
    }
}
