//! 自我保护链
//!
//! 防止本模块被宿主的各条卸载路径移除：
//! - 卸载例程绑定开关 `ctxLoaderUnloadPlugin`，保留未受保护的原始实现
//! - 父作用域或自身销毁时，以原始卸载例程从根作用域摘除自身句柄，并返回拒绝错误
//! - 注册表删除遇到受保护句柄时拒绝执行
//!
//! 状态只会从 `Unarmed` 变为 `Armed` 一次。

mod runtime;

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::context::GuardContext;
use crate::error::{GuardError, Result};
use crate::hooks::{HookRecord, HookSpec, InterceptionEngine, SyncFn, SyncOperation};

pub use runtime::{DisposeListener, ForkListener, RuntimeHandle, Scope};

pub const UNLOAD_FEATURE: &str = "ctxLoaderUnloadPlugin";
pub const UNLOAD_MESSAGE: &str = "已为您阻止意外的插件卸载";
pub const PROTECT_REGISTRY: &str = "unloadProtect";
pub const PROTECT_HOOKED: &str = "unload";
pub const PROTECT_MESSAGE: &str = "已为您阻止意外操作";

/// 卸载例程：在作用域上卸载目标句柄
pub type UnloadOperation = SyncOperation<dyn Scope, Arc<RuntimeHandle>, bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Unarmed,
    Armed,
}

enum ChainState {
    Unarmed,
    /// 正在安装，外部视为未武装
    Arming,
    Armed {
        handle: Arc<RuntimeHandle>,
        records: Vec<HookRecord>,
    },
}

pub struct GuardChain {
    state: Mutex<ChainState>,
}

impl GuardChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState::Unarmed),
        }
    }

    pub fn state(&self) -> GuardState {
        match &*self.state.lock() {
            ChainState::Unarmed | ChainState::Arming => GuardState::Unarmed,
            ChainState::Armed { .. } => GuardState::Armed,
        }
    }

    /// 受保护的自身句柄，未武装时为 None
    pub fn handle(&self) -> Option<Arc<RuntimeHandle>> {
        match &*self.state.lock() {
            ChainState::Armed { handle, .. } => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn records(&self) -> Vec<HookRecord> {
        match &*self.state.lock() {
            ChainState::Armed { records, .. } => records.clone(),
            _ => Vec::new(),
        }
    }

    /// 武装保护链
    ///
    /// `unload` 为宿主的卸载例程，`registry_delete` 为注册表的删除入口。
    /// 失败时不留下任何 hook、监听器或受保护标记，可以重试。
    pub fn arm<G>(
        &self,
        engine: &InterceptionEngine,
        scope: &dyn Scope,
        unload: &UnloadOperation,
        registry_delete: &SyncOperation<G, Arc<RuntimeHandle>, bool>,
    ) -> Result<()>
    where
        G: ?Sized + 'static,
    {
        {
            let mut state = self.state.lock();
            match *state {
                ChainState::Armed { .. } => {
                    return Err(GuardError::configuration("guard chain is already armed"));
                }
                ChainState::Arming => {
                    return Err(GuardError::configuration("guard chain is being armed"));
                }
                ChainState::Unarmed => *state = ChainState::Arming,
            }
        }

        // 宿主回调期间不持有状态锁
        match attach(engine, scope, unload, registry_delete) {
            Ok((handle, records)) => {
                info!(runtime = %handle.name(), "guard chain armed");
                *self.state.lock() = ChainState::Armed { handle, records };
                Ok(())
            }
            Err(err) => {
                *self.state.lock() = ChainState::Unarmed;
                Err(err)
            }
        }
    }
}

/// 先安装两个 hook，全部成功后再标记句柄并注册监听器
fn attach<G>(
    engine: &InterceptionEngine,
    scope: &dyn Scope,
    unload: &UnloadOperation,
    registry_delete: &SyncOperation<G, Arc<RuntimeHandle>, bool>,
) -> Result<(Arc<RuntimeHandle>, Vec<HookRecord>)>
where
    G: ?Sized + 'static,
{
    engine.ensure_unhooked(unload)?;
    engine.ensure_unhooked(registry_delete)?;

    let ctx = engine.context().clone();
    let own = scope.runtime();

    let unload_hook = engine.wrap(
        unload,
        HookSpec::new()
            .flag(UNLOAD_FEATURE)
            .message(UNLOAD_MESSAGE)
            .default_enabled(true),
    )?;

    let delete_hook = {
        let own = own.clone();
        let ctx = ctx.clone();
        engine.install(
            registry_delete,
            PROTECT_REGISTRY,
            PROTECT_MESSAGE,
            move |deleter: SyncFn<G, Arc<RuntimeHandle>, bool>| {
                let guarded: SyncFn<G, Arc<RuntimeHandle>, bool> =
                    Arc::new(move |registry: &G, target: &Arc<RuntimeHandle>| {
                        if target.is_pinned() || RuntimeHandle::same(target, &own) {
                            error!("failed to unload {}: access denied", target.name());
                            ctx.alerts().protect(
                                PROTECT_REGISTRY,
                                PROTECT_HOOKED,
                                Some(PROTECT_MESSAGE),
                            );
                            return Ok(false);
                        }
                        deleter(registry, target)
                    });
                guarded
            },
        )
    };
    let delete_hook = match delete_hook {
        Ok(hooked) => hooked,
        Err(err) => {
            engine.rollback(unload, unload_hook);
            return Err(err);
        }
    };

    own.pin();

    let origin = unload_hook.origin.clone();
    let root = Arc::downgrade(&scope.root());
    if let Some(parent) = scope.parent() {
        parent.on_dispose(teardown_listener(
            "parent",
            ctx.clone(),
            origin.clone(),
            root.clone(),
            own.clone(),
        ));
    }
    scope.on_dispose(teardown_listener("self", ctx, origin, root, own.clone()));

    let forked_from = own.clone();
    scope.on_fork(Box::new(move |child: &Arc<RuntimeHandle>| {
        child.pin();
        info!(parent = %forked_from.name(), child = %child.name(), "pinned forked runtime");
    }));

    Ok((own, vec![unload_hook.record, delete_hook.record]))
}

impl Default for GuardChain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GuardChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardChain")
            .field("state", &self.state())
            .field("handle", &self.handle())
            .finish()
    }
}

fn teardown_listener(
    source: &'static str,
    ctx: Arc<GuardContext>,
    origin: SyncFn<dyn Scope, Arc<RuntimeHandle>, bool>,
    root: Weak<dyn Scope>,
    own: Arc<RuntimeHandle>,
) -> DisposeListener {
    Box::new(move || {
        match root.upgrade() {
            Some(root) => {
                if let Err(err) = origin(&*root, &own) {
                    warn!(source, runtime = %own.name(), "failed to detach from root: {err}");
                }
            }
            None => warn!(source, runtime = %own.name(), "root scope already released"),
        }
        Err(ctx
            .alerts()
            .deny(PROTECT_REGISTRY, PROTECT_HOOKED, PROTECT_MESSAGE))
    })
}
