use std::fmt;

use actix_web::{HttpRequest, HttpResponse, HttpResponseBuilder};
pub use common::payloads::*;
use serde::Serialize;

/// A failed request. The variant picks the status code; the text becomes the
/// envelope's `error`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthorized(s)
            | ApiError::Forbidden(s)
            | ApiError::NotFound(s)
            | ApiError::BadRequest(s)
            | ApiError::Internal(s) => f.write_str(s),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    fn builder(&self) -> HttpResponseBuilder {
        match self {
            ApiError::Unauthorized(_) => HttpResponse::Unauthorized(),
            ApiError::Forbidden(_) => HttpResponse::Forbidden(),
            ApiError::NotFound(_) => HttpResponse::NotFound(),
            ApiError::BadRequest(_) => HttpResponse::BadRequest(),
            ApiError::Internal(_) => HttpResponse::InternalServerError(),
        }
    }
}

pub type Reply<T> = Result<ApiResponse<T>, ApiError>;

pub trait ToHttpResponse {
    /// Wraps a Reply in an HttpResponse.
    /// on_successful is the builder used for an Ok reply.
    /// For example, you can set it to HttpResponse::Created() for 201 Created.
    fn to_response(self, on_successful: HttpResponseBuilder) -> HttpResponse;
}

impl<T: Serialize> ToHttpResponse for Reply<T> {
    fn to_response(self, mut on_successful: HttpResponseBuilder) -> HttpResponse {
        match self {
            Ok(body) => on_successful.json(body),
            Err(e) => {
                let body: ApiResponse<()> = ApiResponse::err("Request failed", e.to_string());
                e.builder().json(body)
            }
        }
    }
}

/// The caller's user id. The development server trusts the bearer token to
/// be exactly that id.
pub fn current_user(req: &HttpRequest) -> Result<String, ApiError> {
    let header = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization header".to_string()))?;
    match header.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(ApiError::Unauthorized("Invalid authorization header".to_string())),
    }
}
