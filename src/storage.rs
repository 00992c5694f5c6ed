use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::{BLOB_FILE_NAME, META_FILE_NAME};

/// 存储根目录布局：每个上传占用 `<root>/<owner>/<upload_id>/` 一个目录。
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

    /// 解析某个上传的记录目录，校验 owner 与 upload_id 均为合法路径段。
    pub fn upload_dir(&self, owner: &str, upload_id: &str) -> Result<PathBuf, StorageError> {
        validate_segment(owner)?;
        validate_segment(upload_id)?;
        Ok(self.root.join(owner).join(upload_id))
    }

    pub fn meta_path(&self, owner: &str, upload_id: &str) -> Result<PathBuf, StorageError> {
        Ok(self.upload_dir(owner, upload_id)?.join(META_FILE_NAME))
    }

    /// 将记录中保存的相对 blob 引用解析为绝对路径。
    pub fn resolve_blob(&self, blob_ref: &str) -> Result<PathBuf, StorageError> {
        let mut resolved = self.root.clone();
        for segment in blob_ref.split('/') {
            validate_segment(segment)?;
            resolved.push(segment);
        }
        Ok(resolved)
    }
}

/// 生成记录所拥有的 blob 的相对引用。
pub fn blob_ref(owner: &str, upload_id: &str) -> String {
    format!("{owner}/{upload_id}/{BLOB_FILE_NAME}")
}

/// 校验单个路径段：非空、无分隔符、无目录遍历。
pub fn validate_segment(segment: &str) -> Result<(), StorageError> {
    if segment.is_empty() || segment.len() > 255 {
        return Err(StorageError::InvalidSegment(segment.to_string()));
    }
    if segment == "." || segment == ".." {
        return Err(StorageError::InvalidSegment(segment.to_string()));
    }
    let valid = segment
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-');
    if !valid {
        return Err(StorageError::InvalidSegment(segment.to_string()));
    }
    Ok(())
}

#[derive(Debug)]
pub enum StorageError {
    InvalidSegment(String),
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
