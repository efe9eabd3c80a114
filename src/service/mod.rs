//! # 服务层
//!
//! 提供启动与依赖注入

pub mod bootstrap;
mod wire;

pub use bootstrap::GuardBootstrap;
pub use wire::{GuardApplication, initialize};
