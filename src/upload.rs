//! 上传处理结果：成功、策略拒绝与 I/O 失败。

use std::fmt;
use std::io;
use std::path::PathBuf;

/// 成功写入存储目录的文件。
#[derive(Debug)]
pub struct StoredFile {
    pub name: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// 可由用户修正的策略拒绝。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingLength,
    EmptyFilename,
    DisallowedExtension(String),
    InvalidPath(String),
    MethodNotAllowed,
    MissingFileField,
    NothingSelected,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingLength => f.write_str("did not sense Content-Length in headers"),
            Rejection::EmptyFilename => f.write_str("did not sense filename in form action"),
            Rejection::DisallowedExtension(name) => {
                write!(f, "not going to process file with extension {name}")
            }
            Rejection::InvalidPath(name) => write!(f, "not going to write file to path {name}"),
            Rejection::MethodNotAllowed => f.write_str("Can only upload on POST/PUT methods"),
            Rejection::MissingFileField => f.write_str("No files uploaded"),
            Rejection::NothingSelected => f.write_str("No selected file"),
        }
    }
}

/// 失败发生的阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// 打开、写入或提交目标文件。
    Write,
    /// 从 multipart 请求体中接收文件内容。
    Receive,
}

/// 上传过程中的 I/O 错误。
#[derive(Debug)]
pub struct UploadFailure {
    pub filename: String,
    pub stage: FailureStage,
    pub error: io::Error,
}

impl fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            FailureStage::Write => write!(
                f,
                "ERROR writing file {} to disk: {}",
                self.filename, self.error
            ),
            FailureStage::Receive => write!(f, "ERROR materializing files to disk: {}", self.error),
        }
    }
}

#[derive(Debug)]
pub enum UploadResult {
    Success(StoredFile),
    Rejected(Rejection),
    Failed(UploadFailure),
}

impl UploadResult {
    pub(crate) fn failed(filename: &str, error: io::Error) -> Self {
        UploadResult::Failed(UploadFailure {
            filename: filename.to_string(),
            stage: FailureStage::Write,
            error,
        })
    }

    pub(crate) fn receive_failed(filename: &str, error: io::Error) -> Self {
        UploadResult::Failed(UploadFailure {
            filename: filename.to_string(),
            stage: FailureStage::Receive,
            error,
        })
    }

    #[cfg(test)]
    pub fn is_success(&self) -> bool {
        matches!(self, UploadResult::Success(_))
    }
}
