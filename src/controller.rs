//! 上传生命周期编排：记录解析、重启、校验和与过期清扫。

use chrono::{Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::assembler::{ChunkAssembler, ChunkOutcome};
use crate::blob::{BlobSink, FsBlobSink};
use crate::error::ApiError;
use crate::range::ContentRange;
use crate::record::{UploadRecord, UploadStatus, UploadStatusView};
use crate::storage::{StorageError, validate_segment};
use crate::store::{FsRecordStore, RecordStore};

/// 注入式扩展点。默认全部空实现，宿主可在构造控制器时替换。
pub trait UploadHooks: Send + Sync {
    /// 追加前的额外校验，失败则在任何写入发生前中止请求。
    fn validate(
        &self,
        _owner: &str,
        _upload_id: &str,
        _range: &ContentRange,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    /// 新建记录时合并的附加属性。
    fn extra_attrs(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    fn pre_save(&self, _record: &UploadRecord, _new: bool) {}

    fn post_save(&self, _record: &UploadRecord, _new: bool) {}

    /// 上传完成时可返回自定义响应载荷；None 表示使用标准状态视图。
    fn on_completion(&self, _record: &UploadRecord) -> Option<Value> {
        None
    }
}

pub struct NoopHooks;

impl UploadHooks for NoopHooks {}

/// 过期清扫结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepStats {
    /// 已删除（或 pretend 模式下将被删除）的记录数。
    pub expired: u64,
    /// 扫描到的记录总数。
    pub total: u64,
}

/// 单次上传请求的端到端编排。
pub struct UploadController<S, B, H = NoopHooks> {
    store: S,
    blobs: B,
    hooks: H,
    assembler: ChunkAssembler,
    expiry_window: Duration,
}

/// 生产环境装配：文件系统记录存取 + 文件系统 blob。
pub type AppController = UploadController<FsRecordStore, FsBlobSink, NoopHooks>;

impl<S: RecordStore, B: BlobSink, H: UploadHooks> UploadController<S, B, H> {
    pub fn new(store: S, blobs: B, hooks: H, expiry_window: Duration) -> Self {
        Self {
            store,
            blobs,
            hooks,
            assembler: ChunkAssembler::new(expiry_window),
            expiry_window,
        }
    }

    /// 处理一个分片：定位或创建记录，委托装配器，完成时校验 MD5。
    ///
    /// 返回 JSON 响应载荷：未完成时为标准状态视图，完成时为
    /// 完成钩子的载荷（默认仍是状态视图）。
    pub async fn handle_chunk(
        &self,
        owner: &str,
        upload_id: &str,
        filename: &str,
        range: &ContentRange,
        chunk: &[u8],
        supplied_md5: &str,
    ) -> Result<Value, ApiError> {
        validate_segment(owner)?;
        validate_segment(upload_id)?;
        self.hooks.validate(owner, upload_id, range)?;

        let (mut record, mut created) = match self.store.find(owner, upload_id).await? {
            Some(record) => (record, false),
            None => (self.create_record(owner, upload_id, filename).await?, true),
        };

        let mut outcome = self
            .assembler
            .append(&self.blobs, &mut record, range, chunk)
            .await?;
        if outcome == ChunkOutcome::RestartRequired {
            info!(
                owner,
                upload_id,
                old_offset = record.offset,
                "discarding upload, client restarted from zero"
            );
            self.store.delete(owner, upload_id).await?;
            record = self.create_record(owner, upload_id, filename).await?;
            created = true;
            outcome = self
                .assembler
                .append(&self.blobs, &mut record, range, chunk)
                .await?;
        }
        let final_chunk = match outcome {
            ChunkOutcome::Appended { final_chunk } => final_chunk,
            ChunkOutcome::RestartRequired => {
                return Err(ApiError::Internal("restart requested on fresh record".into()));
            }
        };

        // 记录只在追加成功后落盘：中途崩溃时偏移保持追加前的值
        self.save_record(&record, created).await?;

        if !final_chunk {
            debug!(owner, upload_id, offset = record.offset, "chunk accepted");
            return self.status_view(&record);
        }

        if record.status == UploadStatus::Complete {
            return Err(ApiError::BadRequest(
                "Upload has already been marked as \"complete\"".into(),
            ));
        }

        let digest = self.blobs.md5_hex(&record.blob_ref).await?;
        if !digest.eq_ignore_ascii_case(supplied_md5) {
            record.status = UploadStatus::Failed;
            self.save_record(&record, false).await?;
            warn!(owner, upload_id, "md5 checksum does not match");
            return Err(ApiError::BadRequest("md5 checksum does not match".into()));
        }

        record.status = UploadStatus::Complete;
        record.completed_on = Some(Utc::now());
        self.save_record(&record, false).await?;
        info!(
            owner,
            upload_id,
            size = record.offset,
            filename = record.filename,
            "upload complete"
        );

        match self.hooks.on_completion(&record) {
            Some(payload) => Ok(payload),
            None => self.status_view(&record),
        }
    }

    /// 查询已持久化的偏移。未知 upload 返回 0，客户端可在开始前探测。
    pub async fn query_offset(&self, owner: &str, upload_id: &str) -> Result<u64, ApiError> {
        validate_segment(owner)?;
        validate_segment(upload_id)?;
        let offset = self
            .store
            .find(owner, upload_id)
            .await?
            .map(|record| record.offset)
            .unwrap_or(0);
        Ok(offset)
    }

    /// 清扫过期上传。`pretend` 模式只统计不删除。
    pub async fn sweep_expired(&self, pretend: bool) -> Result<SweepStats, StorageError> {
        let records = self.store.list(None).await?;
        let total = records.len() as u64;
        let mut expired = 0u64;
        for record in records {
            if !record.is_expired(self.expiry_window) {
                continue;
            }
            if !pretend {
                // 清扫中途记录已被删除时视为空操作
                if let Err(err) = self.store.delete(&record.owner, &record.upload_id).await {
                    warn!(
                        owner = record.owner,
                        upload_id = record.upload_id,
                        error = ?err,
                        "failed to delete expired upload"
                    );
                    continue;
                }
                debug!(
                    owner = record.owner,
                    upload_id = record.upload_id,
                    "expired upload deleted"
                );
            }
            expired += 1;
        }
        Ok(SweepStats { expired, total })
    }

    async fn create_record(
        &self,
        owner: &str,
        upload_id: &str,
        filename: &str,
    ) -> Result<UploadRecord, ApiError> {
        let mut record = UploadRecord::new(owner, upload_id, filename);
        record.attrs = self.hooks.extra_attrs();
        // blob 先于元数据存在；无 meta 的目录会被列举跳过
        self.blobs.create(&record.blob_ref).await?;
        Ok(record)
    }

    async fn save_record(&self, record: &UploadRecord, new: bool) -> Result<(), ApiError> {
        self.hooks.pre_save(record, new);
        self.store.save(record).await?;
        self.hooks.post_save(record, new);
        Ok(())
    }

    fn status_view(&self, record: &UploadRecord) -> Result<Value, ApiError> {
        serde_json::to_value(UploadStatusView::from_record(record, self.expiry_window))
            .map_err(|err| ApiError::Internal(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{NoopHooks, SweepStats, UploadController};
    use crate::blob::{BlobSink, FsBlobSink};
    use crate::error::ApiError;
    use crate::range::ContentRange;
    use crate::record::{UploadRecord, UploadStatus};
    use crate::storage::Storage;
    use crate::store::{FsRecordStore, RecordStore};
    use chrono::Duration;
    use md5::{Digest, Md5};
    use tempfile::tempdir;

    type TestController = UploadController<FsRecordStore, FsBlobSink, NoopHooks>;

    fn make_controller() -> (tempfile::TempDir, TestController, FsRecordStore, FsBlobSink) {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().join("storage"));
        let store = FsRecordStore::new(storage.clone());
        let blobs = FsBlobSink::new(storage);
        let controller =
            UploadController::new(store.clone(), blobs.clone(), NoopHooks, Duration::days(1));
        (temp, controller, store, blobs)
    }

    fn md5_hex(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    fn range(header: &str) -> ContentRange {
        ContentRange::parse(header).expect("range")
    }

    #[tokio::test]
    async fn sequential_chunks_complete_with_matching_checksum() {
        let (_temp, controller, store, blobs) = make_controller();
        let digest = md5_hex(b"0123456789");

        let view = controller
            .handle_chunk("alice", &digest, "data.bin", &range("bytes 0-4/10"), b"01234", &digest)
            .await
            .expect("first chunk");
        assert_eq!(view["offset"], 5);
        assert_eq!(view["upload_id"], digest.as_str());
        assert!(view["expires"].is_string());

        let view = controller
            .handle_chunk("alice", &digest, "data.bin", &range("bytes 5-9/10"), b"56789", &digest)
            .await
            .expect("final chunk");
        assert_eq!(view["offset"], 10);

        let record = store
            .find("alice", &digest)
            .await
            .expect("find")
            .expect("record");
        assert_eq!(record.status, UploadStatus::Complete);
        assert_eq!(record.offset, 10);
        assert!(record.completed_on.is_some());
        assert_eq!(blobs.len(&record.blob_ref).await.expect("len"), 10);
    }

    #[tokio::test]
    async fn checksum_mismatch_marks_upload_failed() {
        let (_temp, controller, store, _blobs) = make_controller();
        let upload_id = md5_hex(b"0123456789");
        let wrong = md5_hex(b"something else");

        controller
            .handle_chunk("alice", &upload_id, "data.bin", &range("bytes 0-4/10"), b"01234", &wrong)
            .await
            .expect("first chunk");
        let result = controller
            .handle_chunk("alice", &upload_id, "data.bin", &range("bytes 5-9/10"), b"56789", &wrong)
            .await;
        match result {
            Err(ApiError::BadRequest(msg)) => assert_eq!(msg, "md5 checksum does not match"),
            _ => panic!("expected checksum mismatch"),
        }

        let record = store
            .find("alice", &upload_id)
            .await
            .expect("find")
            .expect("record");
        assert_eq!(record.status, UploadStatus::Failed);
        assert_eq!(record.offset, 10);
        assert!(record.completed_on.is_none());
    }

    #[tokio::test]
    async fn final_chunk_after_complete_is_rejected() {
        let (_temp, controller, _store, _blobs) = make_controller();
        let digest = md5_hex(b"0123456789");

        controller
            .handle_chunk("alice", &digest, "data.bin", &range("bytes 0-4/10"), b"01234", &digest)
            .await
            .expect("first chunk");
        controller
            .handle_chunk("alice", &digest, "data.bin", &range("bytes 5-9/10"), b"56789", &digest)
            .await
            .expect("final chunk");

        let result = controller
            .handle_chunk("alice", &digest, "data.bin", &range("bytes 5-9/10"), b"56789", &digest)
            .await;
        match result {
            Err(ApiError::BadRequest(msg)) => {
                assert!(msg.contains("\"complete\""), "message was {msg:?}")
            }
            _ => panic!("expected terminal-state rejection"),
        }
    }

    #[tokio::test]
    async fn restart_from_zero_discards_previous_record() {
        let (_temp, controller, store, blobs) = make_controller();
        let upload_id = "aaaa1111bbbb2222cccc3333dddd4444";

        controller
            .handle_chunk("alice", upload_id, "data.bin", &range("bytes 0-4/10"), b"01234", upload_id)
            .await
            .expect("first chunk");

        // 相同 upload_id 从 0 重新开始，总大小也可以不同
        let digest = md5_hex(b"abcdefgh");
        let view = controller
            .handle_chunk("alice", upload_id, "data.bin", &range("bytes 0-7/8"), b"abcdefgh", &digest)
            .await
            .expect("restarted upload");
        assert_eq!(view["offset"], 8);

        let record = store
            .find("alice", upload_id)
            .await
            .expect("find")
            .expect("record");
        assert_eq!(record.status, UploadStatus::Complete);
        assert_eq!(record.offset, 8);
        assert_eq!(blobs.len(&record.blob_ref).await.expect("len"), 8);
    }

    #[tokio::test]
    async fn offset_query_defaults_to_zero_for_unknown_upload() {
        let (_temp, controller, _store, _blobs) = make_controller();
        let offset = controller
            .query_offset("alice", "ffff0000ffff0000ffff0000ffff0000")
            .await
            .expect("query");
        assert_eq!(offset, 0);
    }

    #[tokio::test]
    async fn offset_query_returns_persisted_offset() {
        let (_temp, controller, _store, _blobs) = make_controller();
        let upload_id = "aaaa1111bbbb2222cccc3333dddd4444";
        controller
            .handle_chunk("alice", upload_id, "data.bin", &range("bytes 0-4/10"), b"01234", upload_id)
            .await
            .expect("chunk");
        let offset = controller.query_offset("alice", upload_id).await.expect("query");
        assert_eq!(offset, 5);
    }

    #[tokio::test]
    async fn expired_upload_is_gone_on_append() {
        let (_temp, controller, store, _blobs) = make_controller();
        let upload_id = "aaaa1111bbbb2222cccc3333dddd4444";
        controller
            .handle_chunk("alice", upload_id, "data.bin", &range("bytes 0-4/10"), b"01234", upload_id)
            .await
            .expect("chunk");

        let mut record = store
            .find("alice", upload_id)
            .await
            .expect("find")
            .expect("record");
        record.created_on -= Duration::days(2);
        store.save(&record).await.expect("backdate");

        let result = controller
            .handle_chunk("alice", upload_id, "data.bin", &range("bytes 5-9/10"), b"56789", upload_id)
            .await;
        assert!(matches!(result, Err(ApiError::Gone(_))));
    }

    #[tokio::test]
    async fn uploads_are_scoped_to_owner() {
        let (_temp, controller, _store, _blobs) = make_controller();
        let upload_id = "aaaa1111bbbb2222cccc3333dddd4444";
        controller
            .handle_chunk("alice", upload_id, "data.bin", &range("bytes 0-4/10"), b"01234", upload_id)
            .await
            .expect("chunk");

        // 其他 owner 查询同一 upload_id 看不到进度
        let offset = controller.query_offset("bob", upload_id).await.expect("query");
        assert_eq!(offset, 0);
    }

    #[tokio::test]
    async fn sweep_pretend_counts_without_deleting() {
        let (_temp, controller, store, _blobs) = make_controller();
        let fresh = "aaaa1111bbbb2222cccc3333dddd4444";
        let stale = "eeee5555ffff6666aaaa7777bbbb8888";
        controller
            .handle_chunk("alice", fresh, "fresh.bin", &range("bytes 0-4/10"), b"01234", fresh)
            .await
            .expect("chunk");
        controller
            .handle_chunk("alice", stale, "stale.bin", &range("bytes 0-4/10"), b"01234", stale)
            .await
            .expect("chunk");

        let mut record = store
            .find("alice", stale)
            .await
            .expect("find")
            .expect("record");
        record.created_on -= Duration::days(2);
        store.save(&record).await.expect("backdate");

        let stats = controller.sweep_expired(true).await.expect("pretend sweep");
        assert_eq!(stats, SweepStats { expired: 1, total: 2 });
        assert!(store.find("alice", stale).await.expect("find").is_some());

        let stats = controller.sweep_expired(false).await.expect("sweep");
        assert_eq!(stats, SweepStats { expired: 1, total: 2 });
        assert!(store.find("alice", stale).await.expect("find").is_none());
        assert!(store.find("alice", fresh).await.expect("find").is_some());
    }

    #[tokio::test]
    async fn sweep_removes_expired_complete_uploads_too() {
        let (_temp, controller, store, _blobs) = make_controller();
        let digest = md5_hex(b"0123456789");
        controller
            .handle_chunk("alice", &digest, "data.bin", &range("bytes 0-4/10"), b"01234", &digest)
            .await
            .expect("chunk");
        controller
            .handle_chunk("alice", &digest, "data.bin", &range("bytes 5-9/10"), b"56789", &digest)
            .await
            .expect("final");

        let mut record = store
            .find("alice", &digest)
            .await
            .expect("find")
            .expect("record");
        assert_eq!(record.status, UploadStatus::Complete);
        record.created_on -= Duration::days(2);
        store.save(&record).await.expect("backdate");

        let stats = controller.sweep_expired(false).await.expect("sweep");
        assert_eq!(stats.expired, 1);
        assert!(store.find("alice", &digest).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn invalid_identifier_is_rejected_before_any_write() {
        let (_temp, controller, store, _blobs) = make_controller();
        let result = controller
            .handle_chunk("alice", "../escape", "data.bin", &range("bytes 0-4/10"), b"01234", "x")
            .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert!(store.list(None).await.expect("list").is_empty());
    }

    struct CustomHooks;

    impl super::UploadHooks for CustomHooks {
        fn extra_attrs(&self) -> std::collections::HashMap<String, String> {
            std::collections::HashMap::from([("source".to_string(), "test".to_string())])
        }

        fn on_completion(&self, record: &UploadRecord) -> Option<serde_json::Value> {
            Some(serde_json::json!({ "done": record.upload_id }))
        }
    }

    #[tokio::test]
    async fn hooks_shape_new_records_and_completion_payload() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().join("storage"));
        let store = FsRecordStore::new(storage.clone());
        let controller = UploadController::new(
            store.clone(),
            FsBlobSink::new(storage),
            CustomHooks,
            Duration::days(1),
        );
        let digest = md5_hex(b"0123456789");

        controller
            .handle_chunk("alice", &digest, "data.bin", &range("bytes 0-4/10"), b"01234", &digest)
            .await
            .expect("chunk");
        let record = store
            .find("alice", &digest)
            .await
            .expect("find")
            .expect("record");
        assert_eq!(record.attrs.get("source").map(String::as_str), Some("test"));

        let payload = controller
            .handle_chunk("alice", &digest, "data.bin", &range("bytes 5-9/10"), b"56789", &digest)
            .await
            .expect("final");
        assert_eq!(payload["done"], digest.as_str());
    }
}
