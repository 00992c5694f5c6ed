//! 上传记录的持久化存取。

use tokio::fs;
use tracing::debug;

use crate::config::META_FILE_NAME;
use crate::record::UploadRecord;
use crate::storage::{Storage, StorageError, validate_segment};

/// 记录存取接口：按 (owner, upload_id) 定位，列举可按 owner 过滤。
pub trait RecordStore {
    fn find(
        &self,
        owner: &str,
        upload_id: &str,
    ) -> impl Future<Output = Result<Option<UploadRecord>, StorageError>> + Send;

    fn save(&self, record: &UploadRecord)
    -> impl Future<Output = Result<(), StorageError>> + Send;

    /// 删除记录及其独占目录（含 blob）。记录不存在时静默成功。
    fn delete(
        &self,
        owner: &str,
        upload_id: &str,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// 列举记录；`owner` 为 None 时跨所有 owner。
    fn list(
        &self,
        owner: Option<&str>,
    ) -> impl Future<Output = Result<Vec<UploadRecord>, StorageError>> + Send;
}

/// 文件系统实现：每条记录是上传目录下的一个 meta.json。
#[derive(Clone, Debug)]
pub struct FsRecordStore {
    storage: Storage,
}

impl FsRecordStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    async fn read_record(
        &self,
        owner: &str,
        upload_id: &str,
    ) -> Result<Option<UploadRecord>, StorageError> {
        let meta_path = self.storage.meta_path(owner, upload_id)?;
        let bytes = match fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::Io(err)),
        };
        let record = serde_json::from_slice(&bytes).map_err(|err| {
            StorageError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        })?;
        Ok(Some(record))
    }

    async fn list_owner(
        &self,
        owner: &str,
        records: &mut Vec<UploadRecord>,
    ) -> Result<(), StorageError> {
        let owner_dir = self.storage.root_path().join(owner);
        let mut dir = match fs::read_dir(&owner_dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(StorageError::Io(err)),
        };
        while let Some(entry) = dir.next_entry().await? {
            if !entry.metadata().await?.is_dir() {
                continue;
            }
            let upload_id = entry.file_name().to_string_lossy().to_string();
            if validate_segment(&upload_id).is_err() {
                continue;
            }
            match self.read_record(owner, &upload_id).await {
                Ok(Some(record)) => records.push(record),
                // 创建中途或损坏的目录不计入列举
                Ok(None) => debug!(owner, upload_id, "upload dir without metadata, skipped"),
                Err(err) => debug!(owner, upload_id, error = ?err, "unreadable metadata, skipped"),
            }
        }
        Ok(())
    }
}

impl RecordStore for FsRecordStore {
    async fn find(
        &self,
        owner: &str,
        upload_id: &str,
    ) -> Result<Option<UploadRecord>, StorageError> {
        self.read_record(owner, upload_id).await
    }

    async fn save(&self, record: &UploadRecord) -> Result<(), StorageError> {
        let dir = self.storage.upload_dir(&record.owner, &record.upload_id)?;
        fs::create_dir_all(&dir).await?;
        let content = serde_json::to_vec(record).map_err(|err| {
            StorageError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        })?;
        fs::write(dir.join(META_FILE_NAME), content).await?;
        Ok(())
    }

    async fn delete(&self, owner: &str, upload_id: &str) -> Result<(), StorageError> {
        let dir = self.storage.upload_dir(owner, upload_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn list(&self, owner: Option<&str>) -> Result<Vec<UploadRecord>, StorageError> {
        let mut records = Vec::new();
        if let Some(owner) = owner {
            validate_segment(owner)?;
            self.list_owner(owner, &mut records).await?;
            return Ok(records);
        }

        let mut dir = match fs::read_dir(self.storage.root_path()).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(err) => return Err(StorageError::Io(err)),
        };
        while let Some(entry) = dir.next_entry().await? {
            if !entry.metadata().await?.is_dir() {
                continue;
            }
            let owner = entry.file_name().to_string_lossy().to_string();
            if validate_segment(&owner).is_err() {
                continue;
            }
            self.list_owner(&owner, &mut records).await?;
        }
        Ok(records)
    }
}
