//! 操作拦截模块
//!
//! - 宿主通过 [`SyncOperation`] / [`AsyncOperation`] 声明可拦截操作
//! - [`InterceptionEngine`] 为每个操作安装一次受开关控制的替换实现
//! - 内置目标表与翻译混淆 hook

pub mod catalogue;
mod engine;
mod operation;
pub mod translation;

pub use catalogue::{HookTarget, STANDARD_TARGETS};
pub use engine::{
    AsyncTransform, DEFAULT_HOOK_MESSAGE, HookPass, HookRecord, HookSpec, Hooked,
    InterceptionEngine, SyncTransform,
};
pub use operation::{
    AsyncFn, AsyncOperation, Deferred, HookSlot, OperationTable, Patchable, SyncFn, SyncOperation,
};
pub use translation::{TranslationRecord, guard_translation_lookup};
