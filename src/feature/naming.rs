//! 功能开关命名规则
//!
//! 运行时开关使用去前缀的裸名称（如 `contextEmit`），宿主配置使用带前缀的键
//! （如 `optionBlockContextEmit`）。两者之间通过这里的函数互相换算。

/// 配置键前缀
pub const OPTION_PREFIX: &str = "option";
/// 拦截类开关前缀
pub const BLOCK_PREFIX: &str = "block";
/// 混淆类开关前缀，配置键中保留该前缀
pub const OBFUSCATE_PREFIX: &str = "obfuscate";

/// 去掉前缀并把剩余部分首字母转为小写
///
/// 仅当前缀后紧跟一个大写字母时才会剥离，`blocker` 之类的名称保持不变。
pub fn strip_prefix(name: &str, prefix: &str) -> String {
    match name.strip_prefix(prefix) {
        Some(rest) if rest.chars().next().is_some_and(char::is_uppercase) => lower_first(rest),
        _ => name.to_string(),
    }
}

/// 添加前缀并把原名称首字母转为大写
pub fn add_prefix(name: &str, prefix: &str) -> String {
    format!("{prefix}{}", upper_first(name))
}

/// 把配置键或带 `block` 前缀的名称归一化为开关名
pub fn normalize(name: &str) -> String {
    strip_prefix(&strip_prefix(name, OPTION_PREFIX), BLOCK_PREFIX)
}

/// 开关名对应的宿主配置键
pub fn config_key(name: &str) -> String {
    let bare = normalize(name);
    if strip_prefix(&bare, OBFUSCATE_PREFIX) != bare {
        add_prefix(&bare, OPTION_PREFIX)
    } else {
        add_prefix(&add_prefix(&bare, BLOCK_PREFIX), OPTION_PREFIX)
    }
}

/// 以下划线连接各段后转为小驼峰，用作默认开关名（`Context` + `emit` → `contextEmit`）
pub fn camel_case(parts: &[&str]) -> String {
    let mut out = String::new();
    for segment in parts
        .iter()
        .flat_map(|part| part.split(['_', '-', '.', '/', ' ']))
        .filter(|segment| !segment.is_empty())
    {
        if out.is_empty() {
            out.push_str(&lower_first(segment));
        } else {
            out.push_str(&upper_first(segment));
        }
    }
    out
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
