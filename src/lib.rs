//! k2s 核心库
//!
//! 嵌入插件宿主的拦截与自我保护层：
//! - 以功能开关控制宿主声明的可拦截操作，拦截时广播告警
//! - 按路径策略守护宿主的文件浏览器能力
//! - 武装自我保护链，防止本模块经由各条卸载路径被移除

pub mod alert;
pub mod config;
pub mod context;
pub mod error;
pub mod explorer;
pub mod feature;
pub mod guard;
pub mod hooks;
pub mod metrics;
pub mod path;
pub mod service;
pub mod tracing;

#[cfg(test)]
mod testing;

pub use alert::{
    AlertBroadcaster, AlertEvent, AlertKind, BroadcastOptions, ChannelCapability,
    ObservationChannel,
};
pub use config::{GuardConfig, LoggingConfig, PathPolicyConfig, load_config};
pub use context::GuardContext;
pub use error::{DenialError, GuardError, Result};
pub use explorer::{ExplorerGuard, FileExplorer};
pub use feature::{ConfigStore, FeatureRegistry, FlagState, MemoryConfigStore};
pub use guard::{GuardChain, GuardState, RuntimeHandle, Scope};
pub use hooks::{
    AsyncOperation, Deferred, HookPass, HookRecord, HookSpec, Hooked, InterceptionEngine, Patchable,
    SyncOperation,
};
pub use metrics::GuardMetrics;
pub use path::PathClassifier;
pub use service::{GuardApplication, GuardBootstrap};
