//! Basic 认证与请求主体解析。

use axum::extract::Extension;
use axum::http::{HeaderMap, HeaderValue, Request, header};
use axum::{body::Body as AxumBody, middleware};
use axum_extra::extract::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Basic};
use std::sync::Arc;

use crate::error::ApiError;

/// 认证配置：单一配置主体，用户名即记录的 owner。
#[derive(Debug)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

/// 已认证的请求主体；所有记录查询以其为 owner 过滤。
#[derive(Clone, Debug)]
pub struct Principal {
    pub name: String,
}

/// 认证中间件：校验 Basic 认证并注入 [`Principal`]。
pub async fn auth_middleware(
    Extension(auth): Extension<Arc<AuthConfig>>,
    auth_header: Option<TypedHeader<Authorization<Basic>>>,
    mut req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<axum::response::Response, ApiError> {
    if is_auth_exempt_path(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    if let Some(TypedHeader(credentials)) = auth_header
        && credentials.username() == auth.username
        && credentials.password() == auth.password
    {
        req.extensions_mut().insert(Principal {
            name: credentials.username().to_string(),
        });
        return Ok(next.run(req).await);
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static(r#"Basic realm="chunkwell""#),
    );
    Err(ApiError::Unauthorized(headers))
}

fn is_auth_exempt_path(path: &str) -> bool {
    if path == "/api/version" {
        return true;
    }
    !path.starts_with("/api/")
}
