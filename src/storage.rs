//! 存储目录：路径解析、符号链接校验与上传目标文件。

use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, ErrorKind};

use crate::atomic::AtomicFile;

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub async fn resolve_path_checked(
        &self,
        relative: &str,
        allow_missing_leaf: bool,
    ) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        self.ensure_no_symlink_components(&target, allow_missing_leaf)
            .await?;
        Ok(target)
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        let trimmed = relative.trim_start_matches(['/', '\\']);
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath);
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath);
        }

        Ok(self.root.join(normalized))
    }

    async fn ensure_no_symlink_components(
        &self,
        target: &Path,
        allow_missing_leaf: bool,
    ) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidPath)?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StorageError::InvalidPath);
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(StorageError::InvalidPath);
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound && allow_missing_leaf => {
                    return Ok(());
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

/// 单次上传的写入目标：直接写最终路径，或写同目录临时文件后原子替换。
pub enum Destination {
    Direct { path: PathBuf, file: File },
    Atomic(AtomicFile),
}

impl Destination {
    /// 以创建/截断方式打开目标。
    pub async fn open(target: &Path, atomic: bool) -> io::Result<Self> {
        if atomic {
            return Ok(Destination::Atomic(AtomicFile::new(target).await?));
        }
        let file = File::create(target).await?;
        Ok(Destination::Direct {
            path: target.to_path_buf(),
            file,
        })
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Destination::Direct { file, .. } => file.write_all(bytes).await,
            Destination::Atomic(atomic) => atomic.file_mut().write_all(bytes).await,
        }
    }

    /// 写入完成：刷新（或原子替换）并返回最终路径。
    pub async fn commit(self) -> io::Result<PathBuf> {
        match self {
            Destination::Direct { path, mut file } => {
                file.flush().await?;
                Ok(path)
            }
            Destination::Atomic(atomic) => atomic.finalize().await,
        }
    }

    /// 写入失败：直接模式保留已写入的截断文件，原子模式删除临时文件。
    pub async fn abandon(self) {
        match self {
            Destination::Direct { mut file, .. } => {
                let _ = file.flush().await;
            }
            Destination::Atomic(atomic) => atomic.cleanup().await,
        }
    }
}
