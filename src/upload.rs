//! 分片上传与偏移查询处理器。

use axum::extract::{Extension, Multipart, Path};
use axum::http::{HeaderMap, header};
use axum::response::Json as JsonResponse;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::auth::Principal;
use crate::controller::AppController;
use crate::error::ApiError;
use crate::range::ContentRange;

/// 上传表单字段与分片尺寸限制。
#[derive(Debug)]
pub struct UploadConfig {
    pub field_name: String,
    pub max_chunk_size: u64,
}

#[derive(Serialize)]
pub(crate) struct OffsetResponse {
    offset: u64,
}

/// 接收一个分片：multipart 携带文件分片与 `md5` 标识，
/// `Content-Range` 头声明字节区间。
pub async fn upload_chunk(
    Extension(controller): Extension<Arc<AppController>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<JsonResponse<Value>, ApiError> {
    let mut chunk: Option<(String, Vec<u8>)> = None;
    let mut upload_id: Option<String> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.to_string()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == upload.field_name {
            let filename = field.file_name().unwrap_or("").to_string();
            let mut bytes = Vec::new();
            while let Some(part) = field
                .chunk()
                .await
                .map_err(|err| ApiError::BadRequest(err.to_string()))?
            {
                bytes.extend_from_slice(&part);
                if upload.max_chunk_size > 0 && bytes.len() as u64 > upload.max_chunk_size {
                    return Err(ApiError::BadRequest("chunk too large".into()));
                }
            }
            chunk = Some((filename, bytes));
        } else if name == "md5" {
            let value = field
                .text()
                .await
                .map_err(|err| ApiError::BadRequest(err.to_string()))?;
            upload_id = Some(value.trim().to_string());
        }
    }

    let Some((filename, bytes)) = chunk else {
        return Err(ApiError::BadRequest("No chunk file was submitted".into()));
    };
    let Some(upload_id) = upload_id.filter(|id| !id.is_empty()) else {
        return Err(ApiError::BadRequest("No md5 was submitted".into()));
    };

    let content_range = headers
        .get(header::CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Content-Range header".into()))?;
    let range = ContentRange::parse(content_range).ok_or_else(|| {
        ApiError::BadRequest(format!("Wrong Content-Range header \"{content_range}\""))
    })?;

    debug!(
        owner = principal.name,
        upload_id,
        start = range.start,
        end = range.end,
        total = range.total,
        "chunk received"
    );

    // upload_id 即为客户端声明的整文件 MD5，完成时用作期望校验和
    let payload = controller
        .handle_chunk(
            &principal.name,
            &upload_id,
            &filename,
            &range,
            &bytes,
            &upload_id,
        )
        .await?;
    Ok(JsonResponse(payload))
}

/// 查询某个上传的已持久化偏移；未知上传返回 0。
pub async fn upload_offset(
    Path(upload_id): Path<String>,
    Extension(controller): Extension<Arc<AppController>>,
    Extension(principal): Extension<Principal>,
) -> Result<JsonResponse<OffsetResponse>, ApiError> {
    let offset = controller.query_offset(&principal.name, &upload_id).await?;
    Ok(JsonResponse(OffsetResponse { offset }))
}
