//! 客户端文件名清洗：去除路径分量与不安全字符。

const WINDOWS_DEVICE_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// 将任意客户端文件名转换为可安全拼接到存储目录下的单一文件名。
///
/// 非 ASCII 字符被丢弃，路径分隔符视为空白，空白串折叠为 `_`，
/// 只保留 `[A-Za-z0-9_.-]`，并去掉首尾的 `.` 与 `_`。结果可能为空。
/// 在 Windows 上，保留设备名（`CON`、`LPT1` 等）额外加 `_` 前缀。
pub fn secure_filename(raw: &str) -> String {
    let ascii: String = raw
        .chars()
        .filter(char::is_ascii)
        .map(|ch| if ch == '/' || ch == '\\' { ' ' } else { ch })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
        .collect();
    let trimmed = cleaned.trim_matches(['.', '_']);

    if cfg!(windows) && is_device_name(trimmed) {
        return format!("_{trimmed}");
    }
    trimmed.to_string()
}

fn is_device_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or_default();
    WINDOWS_DEVICE_NAMES
        .iter()
        .any(|device| device.eq_ignore_ascii_case(stem))
}
