//! # Prometheus 指标收集模块
//!
//! 每个 [`crate::context::GuardContext`] 持有独立的注册表，记录拦截与放行次数。

use prometheus::{IntCounterVec, Opts, Registry};

/// 拦截层指标
pub struct GuardMetrics {
    registry: Registry,
    /// 被拦截的调用次数
    pub protections_total: IntCounterVec,
    /// 放行的调用次数
    pub passthrough_total: IntCounterVec,
}

impl GuardMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let protections_total = IntCounterVec::new(
            Opts::new(
                "k2s_protections_total",
                "Total number of blocked or denied operations",
            ),
            &["registry_name"],
        )?;
        let passthrough_total = IntCounterVec::new(
            Opts::new(
                "k2s_passthrough_total",
                "Total number of guarded operations passed through to the original",
            ),
            &["registry_name"],
        )?;

        registry.register(Box::new(protections_total.clone()))?;
        registry.register(Box::new(passthrough_total.clone()))?;

        Ok(Self {
            registry,
            protections_total,
            passthrough_total,
        })
    }

    pub fn record_protection(&self, registry_name: &str) {
        self.protections_total
            .with_label_values(&[registry_name])
            .inc();
    }

    pub fn record_passthrough(&self, registry_name: &str) {
        self.passthrough_total
            .with_label_values(&[registry_name])
            .inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
