//! 上传记录实体与状态机。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::storage::blob_ref;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    InProgress,
    Complete,
    Failed,
}

impl UploadStatus {
    /// COMPLETE 与 FAILED 为终态，不允许继续追加分片。
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Complete | UploadStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::InProgress => "in_progress",
            UploadStatus::Complete => "complete",
            UploadStatus::Failed => "failed",
        }
    }
}

/// 单个上传的持久化状态。`offset` 始终等于已写入 blob 的字节数。
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub upload_id: String,
    pub owner: String,
    pub filename: String,
    pub offset: u64,
    pub status: UploadStatus,
    pub created_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_on: Option<DateTime<Utc>>,
    pub blob_ref: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attrs: HashMap<String, String>,
}

impl UploadRecord {
    /// 创建一条空白记录，blob 引用由 (owner, upload_id) 派生。
    pub fn new(owner: &str, upload_id: &str, filename: &str) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            owner: owner.to_string(),
            filename: filename.to_string(),
            offset: 0,
            status: UploadStatus::InProgress,
            created_on: Utc::now(),
            completed_on: None,
            blob_ref: blob_ref(owner, upload_id),
            attrs: HashMap::new(),
        }
    }

    pub fn expires_on(&self, window: Duration) -> DateTime<Utc> {
        self.created_on + window
    }

    /// 过期判定对任何状态生效，过期记录不得再写入。
    pub fn is_expired(&self, window: Duration) -> bool {
        Utc::now() - self.created_on > window
    }
}

/// 标准响应视图：客户端据此续传。
#[derive(Debug, Serialize)]
pub struct UploadStatusView {
    pub upload_id: String,
    pub offset: u64,
    pub expires: DateTime<Utc>,
}

impl UploadStatusView {
    pub fn from_record(record: &UploadRecord, window: Duration) -> Self {
        Self {
            upload_id: record.upload_id.clone(),
            offset: record.offset,
            expires: record.expires_on(window),
        }
    }
}
