use crate::{
    Result,
    socket::{ParsedFrame, SocketMessageDe},
    user::Cookies,
};
use rand::Rng;
use regex::Regex;
use reqwest::header::{ACCEPT, COOKIE, HeaderMap, HeaderValue, ORIGIN, REFERER};
use serde::Serialize;
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

lazy_static::lazy_static! {
    static ref SPLITTER_REGEX: Regex = Regex::new(r"~m~\d+~m~").expect("Failed to compile regex");
}

const SESSION_ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[macro_export]
macro_rules! payload {
    ($($payload:expr),*) => {
        {
        let payload_vec = vec![$(serde_json::Value::from($payload)),*];
        payload_vec
        }
    };
}

pub fn build_request(cookies: Option<&Cookies>) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        ORIGIN,
        HeaderValue::from_static("https://www.tradingview.com"),
    );
    headers.insert(
        REFERER,
        HeaderValue::from_static("https://www.tradingview.com/"),
    );
    if let Some(header) = cookies.and_then(Cookies::header_value) {
        headers.insert(COOKIE, HeaderValue::from_str(&header)?);
    }

    let mut client = reqwest::Client::builder()
        .default_headers(headers)
        .https_only(true)
        .user_agent(crate::UA);
    if let Some(Cookies::Jar(jar)) = cookies {
        client = client.cookie_provider(jar.clone());
    }
    #[cfg(feature = "rustls-tls")]
    {
        client = client.use_rustls_tls();
    }
    #[cfg(feature = "native-tls")]
    {
        client = client.use_native_tls();
    }
    let client = client.build()?;
    Ok(client)
}

pub fn gen_session_id(session_type: &str) -> String {
    session_type.to_owned() + "_" + &gen_id()
}

#[inline]
pub fn gen_id() -> String {
    let mut rng = rand::rng();
    (0..12)
        .map(|_| SESSION_ID_CHARSET[rng.random_range(0..SESSION_ID_CHARSET.len())] as char)
        .collect()
}

/// Splits one WebSocket text payload into protocol frames. Chunks that start
/// with `~h~` are heartbeats and must be echoed verbatim; everything else is
/// JSON. Undecodable chunks are dropped with a warning.
#[inline]
pub fn parse_packet(message: &str) -> Vec<ParsedFrame> {
    if message.is_empty() {
        return vec![];
    }

    SPLITTER_REGEX
        .split(message)
        .filter(|chunk| !chunk.is_empty())
        .filter_map(|chunk| {
            if chunk.starts_with("~h~") {
                return Some(ParsedFrame::Heartbeat(chunk.to_owned()));
            }
            match serde_json::from_str::<SocketMessageDe>(chunk) {
                Ok(msg) => Some(ParsedFrame::Message(msg)),
                Err(_) => match serde_json::from_str::<Value>(chunk) {
                    Ok(value) => Some(ParsedFrame::Other(value)),
                    Err(error) => {
                        warn!("dropping malformed packet chunk: {}", error);
                        None
                    }
                },
            }
        })
        .collect()
}

#[inline]
pub fn format_packet<T: Serialize>(packet: T) -> Result<Message> {
    let json_string = serde_json::to_string(&packet)?;
    let formatted_message = format!("~m~{}~m~{}", json_string.len(), json_string);
    debug!("Formatted packet: {}", formatted_message);
    Ok(Message::Text(formatted_message.into()))
}

/// Wraps a received heartbeat token for the echo write. The payload goes back
/// exactly as it arrived, length prefix included.
#[inline]
pub fn format_heartbeat(token: &str) -> Message {
    Message::Text(format!("~m~{}~m~{}", token.len(), token).into())
}
