//! 上传文件扩展名白名单。

/// 允许上传的扩展名（小写）。
pub const ALLOWED_EXTENSIONS: [&str; 6] = ["txt", "pdf", "png", "jpg", "jpeg", "gif"];

/// 判断文件名最后一个 `.` 之后的后缀是否在白名单内（不区分大小写）。
pub fn is_allowed(filename: &str) -> bool {
    let Some((_, extension)) = filename.rsplit_once('.') else {
        return false;
    };
    ALLOWED_EXTENSIONS
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(extension))
}
