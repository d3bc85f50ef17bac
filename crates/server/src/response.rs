//! 响应构建
//!
//! 错误统一输出 `{"error": {...}}` 信封；成功响应附带 `X-Provider-Name` 与 `X-Processing-Ms`。

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tollway_core::GatewayError;
use tollway_processor::DispatchOutcome;

pub const PROVIDER_HEADER: &str = "x-provider-name";
pub const PROCESSING_HEADER: &str = "x-processing-ms";

/// 处理器错误到 HTTP 响应的包装
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        if err.is_opaque() {
            // 细节只进日志
            tracing::error!("[ROUTE] 请求失败: {}", err);
        }
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(err.to_envelope())).into_response();
        if matches!(err, GatewayError::RateLimited) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// 限流响应，`Retry-After` 取剩余等待秒数向上取整，至少 1 秒
pub fn rate_limited(retry_after: Duration) -> Response {
    let mut response = ApiError(GatewayError::RateLimited).into_response();
    let secs = retry_after.as_millis().div_ceil(1000).max(1);
    if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

fn insert_header(response: &mut Response, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(name), value);
    }
}

/// 调度结果转为 HTTP 响应
pub fn outcome_response(outcome: DispatchOutcome) -> Response {
    match outcome {
        DispatchOutcome::Json {
            provider,
            body,
            processing_ms,
        } => {
            let mut response = Json(body).into_response();
            insert_header(&mut response, PROVIDER_HEADER, &provider);
            insert_header(&mut response, PROCESSING_HEADER, &processing_ms.to_string());
            response
        }
        DispatchOutcome::Binary {
            provider,
            content_type,
            body,
            processing_ms,
        } => {
            let mut response = Body::from(body).into_response();
            insert_header(&mut response, "content-type", &content_type);
            insert_header(&mut response, PROVIDER_HEADER, &provider);
            insert_header(&mut response, PROCESSING_HEADER, &processing_ms.to_string());
            response
        }
        DispatchOutcome::Stream { provider, stream } => {
            let mut response = Response::new(Body::from_stream(stream));
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/event-stream"),
            );
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
            insert_header(&mut response, PROVIDER_HEADER, &provider);
            response
        }
    }
}
