use serde::{Deserialize, Serialize};
use thiserror::Error;
use ustr::Ustr;

#[derive(Debug, Clone, Error, Copy, Serialize, Deserialize)]
pub enum Error {
    #[error("Generic: {0}")]
    Generic(Ustr),

    #[error("Request failed: {0}")]
    Request(Ustr),

    #[error("JSON parsing failed: {0}")]
    JsonParse(Ustr),

    #[error("Invalid header value: {0}")]
    HeaderValue(Ustr),

    #[error("WebSocket connection failed: {0}")]
    WebSocket(Ustr),

    #[error("URL parsing failed: {0}")]
    UrlParse(Ustr),

    #[error("Indicator metadata unavailable: {0}")]
    Metadata(Ustr),

    #[error("Task join failed: {0}")]
    TokioJoin(Ustr),

    #[error("Timeout: {0}")]
    Timeout(Ustr),

    #[error("Internal error: {0}")]
    Internal(Ustr),

    #[error("TradingView error: {source}")]
    TradingView {
        #[source]
        source: TradingViewError,
    },
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Request(err.to_string().into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonParse(err.to_string().into())
    }
}

impl From<reqwest::header::InvalidHeaderValue> for Error {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Error::HeaderValue(err.to_string().into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(err.to_string().into())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::TokioJoin(err.to_string().into())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::UrlParse(err.to_string().into())
    }
}

impl From<TradingViewError> for Error {
    fn from(err: TradingViewError) -> Self {
        Error::TradingView { source: err }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Hash, Copy, Serialize, Deserialize)]
pub enum TradingViewError {
    #[error("Critical error: {0}")]
    CriticalError(Ustr),
    #[error("Study error on {0}: {1}")]
    StudyError(Ustr, Ustr),
}
