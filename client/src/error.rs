use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("reqwest error: {0}")]
    ReqwestError(String),
    #[error("bad status code {code}: {body}")]
    BadStatusCode { code: u16, body: String },
    #[error("json decode error: {0}")]
    JsonDecodeError(String),
    /// The backend answered with `success: false`.
    #[error("{0}")]
    Api(String),
    /// The backend answered `success: true` without the expected payload.
    #[error("bad response: {0}")]
    BadResponse(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        Self::ReqwestError(value.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(value: serde_json::Error) -> Self {
        Self::JsonDecodeError(value.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
