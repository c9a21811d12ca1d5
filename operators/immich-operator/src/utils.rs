//! 工具函数模块
//!
//! 标签合并与随机凭据生成等通用辅助函数。

use std::collections::BTreeMap;

use rand::Rng;

/// 合并两组字符串映射，覆盖方优先
pub fn merge_string_maps(
    base: BTreeMap<String, String>,
    overlay: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut merged = base;
    if let Some(overlay) = overlay {
        for (key, value) in overlay {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// 生成指定长度的随机字母数字密码
///
/// 使用操作系统熵初始化的 CSPRNG，字符集为大小写字母与数字。
pub fn generate_random_password(length: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
