use crate::{
    DataLoader, Error, Result,
    chart::{graphics::ParsedGraphics, models::DataPoint, study::StudyMetadata},
    handler::queue::EventQueue,
    payload,
    socket::{CHART_WS_URL, ChartEvent, ParsedFrame, SocketMessageSer, WEBSOCKET_HEADERS},
    utils::{format_heartbeat, gen_session_id, parse_packet},
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    net::TcpStream,
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        protocol::{Message, WebSocketConfig},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;
use ustr::Ustr;

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Handshake progress. Transitions are local: sending the frame moves the
/// state forward, server acknowledgements are not awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connected,
    Authed,
    ChartOpen,
    SymbolResolved,
    SeriesActive,
    StudiesActive,
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
            SessionState::Authed => "authed",
            SessionState::ChartOpen => "chart_open",
            SessionState::SymbolResolved => "symbol_resolved",
            SessionState::SeriesActive => "series_active",
            SessionState::StudiesActive => "studies_active",
            SessionState::Terminated => "terminated",
        };
        write!(f, "{state}")
    }
}

/// One chart session on one WebSocket. The reader task is the only mutator
/// of protocol state; everything observable from outside goes through
/// snapshots or the event queue.
pub struct ChartSession {
    chart_session_id: Ustr,
    series_id: Ustr,
    auth_token: Arc<RwLock<Ustr>>,
    state: Arc<RwLock<SessionState>>,
    running: Arc<AtomicBool>,
    read: Mutex<Option<WsRead>>,
    write: Arc<Mutex<WsWrite>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    data_loader: DataLoader,
    queue: EventQueue,
    closed: CancellationToken,
    idle_timeout: Duration,
}

#[bon::bon]
impl ChartSession {
    /// Opens the WebSocket and authenticates. The session comes back in
    /// `Authed` state with a fresh `cs_…` chart session id.
    #[builder]
    pub async fn connect(
        auth_token: Option<&str>,
        #[builder(default = "s1")] series_id: &str,
        #[builder(default = 256)] event_capacity: usize,
        #[builder(default = Duration::from_secs(30))] idle_timeout: Duration,
        /// Hand the session an existing sink instead of a fresh queue.
        events: Option<EventQueue>,
    ) -> Result<Arc<Self>> {
        let auth_token = Ustr::from(auth_token.unwrap_or("unauthorized_user_token"));
        let (write, read) = Self::open_socket().await?;
        let queue = events.unwrap_or_else(|| EventQueue::bounded(event_capacity));

        let session = Arc::new(Self {
            chart_session_id: Ustr::from(&gen_session_id("cs")),
            series_id: Ustr::from(series_id),
            auth_token: Arc::new(RwLock::new(auth_token)),
            state: Arc::new(RwLock::new(SessionState::Connected)),
            running: Arc::new(AtomicBool::new(true)),
            read: Mutex::new(Some(read)),
            write: Arc::new(Mutex::new(write)),
            reader: std::sync::Mutex::new(None),
            data_loader: DataLoader::new(queue.clone()),
            queue,
            closed: CancellationToken::new(),
            idle_timeout,
        });

        session
            .send("set_auth_token", &payload!(auth_token.as_str()))
            .await?;
        session.set_state(SessionState::Authed).await;

        Ok(session)
    }
}

impl ChartSession {
    async fn open_socket() -> Result<(WsWrite, WsRead)> {
        let url = Url::parse(CHART_WS_URL)?;
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .extend(WEBSOCKET_HEADERS.clone().into_iter());

        let conf = WebSocketConfig::default()
            .read_buffer_size(1024 * 1024)
            .write_buffer_size(1024 * 1024);

        let (socket, response) = connect_async_with_config(request, Some(conf), false).await?;
        info!("WebSocket connected with status: {}", response.status());

        Ok(socket.split())
    }

    pub fn session_id(&self) -> Ustr {
        self.chart_session_id
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    async fn set_state(&self, state: SessionState) {
        trace!("session {} -> {}", self.chart_session_id, state);
        *self.state.write().await = state;
    }

    pub async fn send(&self, m: &str, p: &[Value]) -> Result<()> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(Error::Internal("session is closed".into()));
        }
        debug!("sending message: {} with payload: {:?}", m, p);
        let mut write = self.write.lock().await;
        write.send(SocketMessageSer::new(m, p).to_message()?).await?;
        Ok(())
    }

    pub async fn auth_token(&self) -> Ustr {
        *self.auth_token.read().await
    }

    pub async fn update_auth_token(&self, auth_token: &str) -> Result<()> {
        self.send("set_auth_token", &payload!(auth_token)).await?;
        *self.auth_token.write().await = Ustr::from(auth_token);
        Ok(())
    }

    // Begin chart handshake methods

    pub async fn open_chart(&self) -> Result<()> {
        self.send(
            "chart_create_session",
            &payload!(self.chart_session_id.as_str(), ""),
        )
        .await?;
        self.set_state(SessionState::ChartOpen).await;
        Ok(())
    }

    /// Example: symbol = "BINANCE:BTCUSDT"
    pub async fn resolve_symbol(&self, symbol: &str) -> Result<()> {
        let descriptor = format!("={}", json!({"symbol": symbol, "adjustment": "splits"}));
        self.send(
            "resolve_symbol",
            &payload!(
                self.chart_session_id.as_str(),
                self.series_id.as_str(),
                descriptor
            ),
        )
        .await?;
        self.set_state(SessionState::SymbolResolved).await;
        Ok(())
    }

    /// Example: timeframe = "1D", range = 300 bars.
    pub async fn create_series(&self, timeframe: &str, range: u64) -> Result<()> {
        // The series version slot is always "s1"; the server contract has
        // not been confirmed for anything else.
        self.send(
            "create_series",
            &payload!(
                self.chart_session_id.as_str(),
                "$prices",
                "s1",
                self.series_id.as_str(),
                timeframe,
                range
            ),
        )
        .await?;
        self.set_state(SessionState::SeriesActive).await;
        Ok(())
    }

    /// Attaches a study to the `$prices` series. Additive: call once per
    /// study id. `custom_inputs` overlays default input values by id.
    pub async fn add_study(
        &self,
        study_id: &str,
        metadata: StudyMetadata,
        custom_inputs: Option<&HashMap<String, Value>>,
    ) -> Result<()> {
        let inputs = metadata.to_study_inputs(custom_inputs)?;
        let payloads: Vec<Value> = vec![
            Value::from(self.chart_session_id.as_str()),
            Value::from(study_id),
            Value::from("st1"),
            Value::from("$prices"),
            Value::from(metadata.kind.wire_kind()),
            inputs,
        ];
        self.send("create_study", &payloads).await?;
        self.data_loader
            .register_study(Ustr::from(study_id), metadata);
        self.set_state(SessionState::StudiesActive).await;
        Ok(())
    }

    // End chart handshake methods

    /// Starts the dedicated reader task. One per session.
    pub fn spawn_reader_task(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if let Err(e) = session.event_loop().await {
                error!("reader task ended with error: {}", e);
            }
        });
        self.reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
    }

    async fn event_loop(&self) -> Result<()> {
        let mut read = self
            .read
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Internal("reader already running".into()))?;

        info!("chart session {} event loop started", self.chart_session_id);
        let result = self.run_reader(&mut read).await;
        self.shutdown().await;
        info!("chart session {} event loop ended", self.chart_session_id);
        result
    }

    async fn run_reader(&self, read: &mut WsRead) -> Result<()> {
        while self.running.load(Ordering::Relaxed) {
            tokio::select! {
                _ = self.closed.cancelled() => return Ok(()),
                next = timeout(self.idle_timeout, read.next()) => match next {
                    Ok(Some(Ok(message))) => self.handle_raw_message(message).await?,
                    Ok(Some(Err(e))) => {
                        error!("error reading message: {}", e);
                        return Err(e.into());
                    }
                    Ok(None) => {
                        info!("WebSocket stream ended");
                        return Ok(());
                    }
                    Err(_) => {
                        warn!(
                            "no traffic for {:?}, terminating session",
                            self.idle_timeout
                        );
                        return Err(Error::Timeout("idle connection".into()));
                    }
                },
            }
        }
        Ok(())
    }

    async fn handle_raw_message(&self, raw: Message) -> Result<()> {
        match raw {
            Message::Text(text) => self.handle_frames(parse_packet(&text)).await?,
            Message::Close(frame) => {
                warn!("connection closed by server: {:?}", frame);
                self.running.store(false, Ordering::Relaxed);
            }
            Message::Ping(data) => {
                self.write.lock().await.send(Message::Pong(data)).await?;
            }
            other => trace!("ignoring non-text message: {:?}", other),
        }
        Ok(())
    }

    async fn handle_frames(&self, frames: Vec<ParsedFrame>) -> Result<()> {
        for frame in frames {
            match frame {
                ParsedFrame::Heartbeat(token) => {
                    trace!("echoing heartbeat: {}", token);
                    self.write.lock().await.send(format_heartbeat(&token)).await?;
                }
                ParsedFrame::Message(msg) => {
                    let event = ChartEvent::from(msg.m.as_str());
                    self.data_loader.handle_events(event, &msg.p).await?;
                }
                ParsedFrame::Other(value) => {
                    debug!("unhandled server payload: {}", value);
                }
            }
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.set_state(SessionState::Terminated).await;
        if let Err(e) = self.write.lock().await.close().await {
            debug!("socket close failed: {}", e);
        }
        self.queue.close();
        self.closed.cancel();
    }

    /// Terminates the session: stops the reader, closes the socket and the
    /// event queue. In-flight events may be dropped.
    pub async fn close(&self) -> Result<()> {
        self.running.store(false, Ordering::Relaxed);
        self.closed.cancel();
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match handle {
            Some(handle) => {
                handle.await?;
            }
            None => self.shutdown().await,
        }
        Ok(())
    }

    pub async fn closed_notifier(&self) {
        self.closed.cancelled().await;
    }

    /// The consumer side of the session: clone and `recv()` events.
    pub fn events(&self) -> EventQueue {
        self.queue.clone()
    }

    /// Events lost to slow consumers since the session started.
    pub fn dropped_events(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn data_loader(&self) -> &DataLoader {
        &self.data_loader
    }

    pub async fn ohlc(&self) -> Vec<DataPoint> {
        self.data_loader.ohlc().await
    }

    pub async fn indicator_data(&self, study_id: &str) -> Vec<Vec<Value>> {
        self.data_loader.indicator_data(study_id).await
    }

    pub async fn indicator_graphics(&self, study_id: &str) -> ParsedGraphics {
        self.data_loader.indicator_graphics(study_id).await
    }

    pub fn errored_studies(&self) -> Vec<(Ustr, Ustr)> {
        self.data_loader.errored_studies()
    }
}
