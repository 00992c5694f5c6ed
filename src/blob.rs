//! 追加式 blob 写入与流式 MD5 计算。

use md5::{Digest, Md5};
use std::io::SeekFrom;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::storage::{Storage, StorageError};

/// 记录独占的追加式字节汇。实现者只需保证按偏移追加与整体哈希。
pub trait BlobSink {
    /// 创建空 blob；已存在时清空。
    fn create(&self, blob_ref: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// 在 `offset` 处追加 `bytes`，返回追加后的 blob 长度。
    ///
    /// 若 blob 比 `offset` 长（上一次追加写入后未来得及持久化记录），
    /// 先截断到 `offset` 再写入，客户端从记录偏移重发即可自愈。
    fn append(
        &self,
        blob_ref: &str,
        offset: u64,
        bytes: &[u8],
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    fn len(&self, blob_ref: &str) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// 流式计算整个 blob 的 MD5，返回十六进制小写摘要。
    fn md5_hex(&self, blob_ref: &str) -> impl Future<Output = Result<String, StorageError>> + Send;
}

/// 本地文件系统实现：blob 与记录元数据同目录。
#[derive(Clone, Debug)]
pub struct FsBlobSink {
    storage: Storage,
}

impl FsBlobSink {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

impl BlobSink for FsBlobSink {
    async fn create(&self, blob_ref: &str) -> Result<(), StorageError> {
        let path = self.storage.resolve_blob(blob_ref)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        File::create(&path).await?;
        Ok(())
    }

    async fn append(&self, blob_ref: &str, offset: u64, bytes: &[u8]) -> Result<u64, StorageError> {
        let path = self.storage.resolve_blob(blob_ref)?;
        let mut file = OpenOptions::new().write(true).open(&path).await?;
        file.set_len(offset).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(offset + bytes.len() as u64)
    }

    async fn len(&self, blob_ref: &str) -> Result<u64, StorageError> {
        let path = self.storage.resolve_blob(blob_ref)?;
        let metadata = fs::metadata(&path).await?;
        Ok(metadata.len())
    }

    async fn md5_hex(&self, blob_ref: &str) -> Result<String, StorageError> {
        let path = self.storage.resolve_blob(blob_ref)?;
        let mut file = File::open(&path).await?;
        let mut hasher = Md5::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}
