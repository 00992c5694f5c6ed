//! 分片装配：偏移校验、追加与完成判定。

use chrono::Duration;
use tracing::debug;

use crate::blob::BlobSink;
use crate::error::ApiError;
use crate::range::ContentRange;
use crate::record::UploadRecord;

/// 一次分片追加的结论。
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// 分片已写入；`final_chunk` 表示区间已触达文件末尾。
    Appended { final_chunk: bool },
    /// 客户端从偏移 0 重新开始：调用方应丢弃旧记录并重建后重试。
    RestartRequired,
}

/// 校验并追加单个分片。完成状态的流转由调用方决定，这里只报告
/// 是否收到了最后一个分片。
#[derive(Clone, Copy, Debug)]
pub struct ChunkAssembler {
    expiry_window: Duration,
}

impl ChunkAssembler {
    pub fn new(expiry_window: Duration) -> Self {
        Self { expiry_window }
    }

    pub async fn append<B: BlobSink>(
        &self,
        blobs: &B,
        record: &mut UploadRecord,
        range: &ContentRange,
        chunk: &[u8],
    ) -> Result<ChunkOutcome, ApiError> {
        if record.is_expired(self.expiry_window) {
            return Err(ApiError::Gone("Upload has expired".into()));
        }
        if record.status.is_terminal() {
            return Err(ApiError::BadRequest(format!(
                "Upload has already been marked as \"{}\"",
                record.status.as_str()
            )));
        }
        if range.start != record.offset {
            if range.start == 0 {
                debug!(
                    upload_id = record.upload_id,
                    offset = record.offset,
                    "restart from zero requested"
                );
                return Ok(ChunkOutcome::RestartRequired);
            }
            return Err(ApiError::BadRequest(format!(
                "Offsets do not match: expected {}, got {}",
                record.offset, range.start
            )));
        }
        if chunk.len() as u64 != range.len() {
            return Err(ApiError::BadRequest(format!(
                "Chunk size {} does not match Content-Range length {}",
                chunk.len(),
                range.len()
            )));
        }

        record.offset = blobs.append(&record.blob_ref, record.offset, chunk).await?;
        Ok(ChunkOutcome::Appended {
            final_chunk: range.is_final(),
        })
    }
}
