//! 翻译查找混淆
//!
//! `obfuscateI18nFind` 开启时，翻译查找结果中每条记录的所有叶子字符串都会被替换为随机串。

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

use super::engine::{HookSpec, Hooked, InterceptionEngine};
use super::operation::{SyncFn, SyncOperation};

/// 混淆开关
pub const OBFUSCATE_FEATURE: &str = "obfuscateI18nFind";
/// 翻译查找 hook 绑定的开关
pub const TRANSLATION_FEATURE: &str = "i18nFind";
pub const TRANSLATION_MESSAGE: &str = "已为您优化I18n翻译";

const OBFUSCATION_ALPHABET: &[u8] =
    b"abc-def-ghi-jkl-mno-pqr-stu-vwx-yzABC-DEF1234567890114514homohomo-!?*$%#@";
const MIN_LENGTH: usize = 15;
const MAX_LENGTH: usize = 60;

/// 一条翻译查找结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub locale: String,
    /// 翻译键 → 文本
    pub data: BTreeMap<String, String>,
}

impl TranslationRecord {
    pub fn new<S: Into<String>>(locale: S) -> Self {
        Self {
            locale: locale.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_entry<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// 生成长度在 `[15, 60)` 内的随机串
pub fn random_text<G: Rng + ?Sized>(rng: &mut G) -> String {
    let len = rng.gen_range(MIN_LENGTH..MAX_LENGTH);
    (0..len)
        .filter_map(|_| OBFUSCATION_ALPHABET.choose(rng).map(|b| *b as char))
        .collect()
}

/// 原地替换所有叶子字符串
pub fn obfuscate(records: &mut [TranslationRecord]) {
    let mut rng = rand::thread_rng();
    for record in records.iter_mut() {
        for value in record.data.values_mut() {
            *value = random_text(&mut rng);
        }
    }
}

/// 包装翻译查找操作
///
/// 开关 `i18nFind` 决定是否拦截；放行时若 `obfuscateI18nFind` 开启则混淆结果。
pub fn guard_translation_lookup<R, A>(
    engine: &InterceptionEngine,
    operation: &SyncOperation<R, A, Vec<TranslationRecord>>,
) -> Result<Hooked<SyncFn<R, A, Vec<TranslationRecord>>>>
where
    R: ?Sized + 'static,
    A: 'static,
{
    let ctx = Arc::clone(engine.context());
    let spec = HookSpec::new()
        .flag(TRANSLATION_FEATURE)
        .message(TRANSLATION_MESSAGE)
        .transform(move |result: Option<Vec<TranslationRecord>>, _: &A| {
            let mut records = result.unwrap_or_default();
            if ctx.features().is_enabled(OBFUSCATE_FEATURE) {
                debug!(records = records.len(), "obfuscating translation lookup");
                obfuscate(&mut records);
            }
            Ok(records)
        });

    engine.wrap(operation, spec)
}
