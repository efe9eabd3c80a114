//! Wire 风格的依赖注入模块
//!
//! 按依赖顺序构建上下文、拦截引擎与保护链

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::GuardConfig;
use crate::context::GuardContext;
use crate::error::Result;
use crate::feature::ConfigStore;
use crate::guard::GuardChain;
use crate::hooks::InterceptionEngine;
use crate::path::PathClassifier;

use super::bootstrap::GuardBootstrap;

/// 应用上下文 - 包含所有已初始化的组件
///
/// 保护链在此处尚未武装，由宿主提供作用域后调用 [`GuardChain::arm`]。
pub struct GuardApplication {
    pub ctx: Arc<GuardContext>,
    pub engine: Arc<InterceptionEngine>,
    pub chain: Arc<GuardChain>,
    pub classifier: PathClassifier,
    /// 延迟开关的写入任务
    pub deferred: Option<JoinHandle<()>>,
}

/// 构建应用上下文
pub fn initialize(config: &GuardConfig, store: Arc<dyn ConfigStore>) -> Result<GuardApplication> {
    // 1. 上下文
    let ctx = GuardContext::new(store)?;

    // 2. 从配置恢复开关
    let deferred = GuardBootstrap::seed(&ctx, config)?;

    // 3. 拦截引擎与保护链
    let engine = Arc::new(InterceptionEngine::new(ctx.clone()));
    let chain = Arc::new(GuardChain::new());
    let classifier = PathClassifier::from_config(&config.path_policy);

    info!(options = config.options.len(), "guard application initialized");

    Ok(GuardApplication {
        ctx,
        engine,
        chain,
        classifier,
        deferred,
    })
}
