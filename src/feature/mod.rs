//! 功能开关模块
//!
//! - 三态开关：开启 / 关闭 / 未设置，并可区分"显式清除"与"从未配置"
//! - 每次写入同步镜像到宿主配置键

pub mod naming;
mod registry;
mod store;

pub(crate) use registry::validate_name;
pub use registry::{FeatureRegistry, FlagState};
pub use store::{ConfigStore, MemoryConfigStore};
