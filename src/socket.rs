use crate::{Result, utils::format_packet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::{
    http::{HeaderMap, HeaderValue},
    protocol::Message,
};
use ustr::Ustr;

pub static CHART_WS_URL: &str = "wss://data.tradingview.com/socket.io/websocket?type=chart";

lazy_static::lazy_static! {
    pub static ref WEBSOCKET_HEADERS: HeaderMap<HeaderValue> = {
        let mut headers = HeaderMap::new();
        headers.insert("Origin", "https://www.tradingview.com".parse().unwrap());
        headers.insert("User-Agent", crate::UA.parse().unwrap());
        headers
    };
}

/// Classification of an inbound `m` field. Everything the engine does not
/// act on stays `Unknown` so new server methods never break the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChartEvent {
    /// `timescale_update` or `du`: an incremental data delta.
    Data,
    CriticalError,
    StudyError,
    Unknown(Ustr),
}

impl From<&str> for ChartEvent {
    fn from(m: &str) -> Self {
        match m {
            "timescale_update" | "du" => ChartEvent::Data,
            "critical_error" => ChartEvent::CriticalError,
            "study_error" => ChartEvent::StudyError,
            other => ChartEvent::Unknown(Ustr::from(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocketMessageSer {
    pub m: Value,
    pub p: Value,
}

impl SocketMessageSer {
    pub fn new<M, P>(m: M, p: P) -> Self
    where
        M: Serialize,
        P: Serialize,
    {
        let m = serde_json::to_value(m).expect("Failed to serialize Socket Message");
        let p = serde_json::to_value(p).expect("Failed to serialize Socket Message");
        SocketMessageSer { m, p }
    }

    pub fn to_message(&self) -> Result<Message> {
        let msg = format_packet(self)?;
        Ok(msg)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SocketMessageDe {
    pub m: String,
    pub p: Vec<Value>,
}

/// One decoded chunk of a WebSocket text payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFrame {
    /// A `~h~<n>` liveness probe, kept verbatim for the echo.
    Heartbeat(String),
    Message(SocketMessageDe),
    /// Valid JSON without the `{m, p}` shape (server hello and friends).
    Other(Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_event_classification() {
        assert_eq!(ChartEvent::from("timescale_update"), ChartEvent::Data);
        assert_eq!(ChartEvent::from("du"), ChartEvent::Data);
        assert_eq!(ChartEvent::from("critical_error"), ChartEvent::CriticalError);
        assert_eq!(ChartEvent::from("study_error"), ChartEvent::StudyError);
        assert_eq!(
            ChartEvent::from("series_completed"),
            ChartEvent::Unknown(Ustr::from("series_completed"))
        );
    }
}
