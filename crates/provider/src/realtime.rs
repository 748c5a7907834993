//! Realtime (duplex) relay.
//!
//! Per session:
//! 1. Dial the upstream realtime endpoint with the provider credentials.
//! 2. Send one `session.update` text frame upstream.
//! 3. Run two pumps concurrently, client → upstream and upstream → client,
//!    forwarding frames verbatim and in order.
//! 4. When either side ends, record the reason, cancel both pumps and close
//!    both connections.
//!
//! Each write half sits behind an async mutex with an atomic closed flag, so
//! a close issued by either pump (or by teardown) is idempotent.

use http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
use promptgate_config::Config;
use promptgate_types::{
    CloseReason, DuplexConnection, Frame, FrameSink, FrameSource, GatewayError, SessionConfig,
    UpstreamDialer, traits::Result,
};
use secrecy::{ExposeSecret as _, SecretString};
use serde_json::json;
use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

/// Upstream session parameters, resolved from one configuration snapshot.
#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub url: String,
    pub model: String,
    pub api_key: SecretString,
    pub organization: Option<String>,
    pub session: SessionConfig,
    /// Tear down when either side sends nothing for this long.
    pub read_timeout: Option<Duration>,
    /// Hard cap on session lifetime.
    pub max_session: Option<Duration>,
}

impl RealtimeSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let r = &config.realtime;
        Self {
            url: r.url.clone(),
            model: r.model.clone(),
            api_key: SecretString::from(config.openai.api_key.clone()),
            organization: config.openai.organization_id.clone(),
            session: r.session(),
            read_timeout: r.read_timeout_secs.map(Duration::from_secs),
            max_session: r.max_session_secs.map(Duration::from_secs),
        }
    }

    /// Upstream URL with the model query parameter.
    #[must_use]
    pub fn upstream_url(&self) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}model={}", self.url, self.model)
    }

    /// Handshake headers: bearer credentials and the realtime beta opt-in.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if a credential is not a valid header value.
    pub fn handshake_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key.expose_secret()))
            .map_err(|_| GatewayError::Config("openai.api_key is not a valid header value".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));
        if let Some(org) = &self.organization {
            let org = HeaderValue::from_str(org).map_err(|_| {
                GatewayError::Config("openai.organization_id is not a valid header value".into())
            })?;
            headers.insert("OpenAI-Organization", org);
        }
        Ok(headers)
    }
}

/// Builds the synthetic `session.update` frame sent upstream first.
///
/// # Errors
///
/// Returns [`GatewayError::Serialization`] if the session cannot be encoded.
pub fn session_update_frame(session: &SessionConfig) -> Result<Frame> {
    let body = json!({ "type": "session.update", "session": session });
    Ok(Frame::text(serde_json::to_string(&body)?))
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub reason: CloseReason,
    /// Frames forwarded client → upstream (the injected update not included).
    pub client_frames: u64,
    /// Frames forwarded upstream → client.
    pub upstream_frames: u64,
}

/// Bridges client connections to upstream realtime sessions.
pub struct RealtimeRelay {
    settings: RealtimeSettings,
    dialer: Arc<dyn UpstreamDialer>,
}

impl RealtimeRelay {
    #[must_use]
    pub fn new(settings: RealtimeSettings, dialer: Arc<dyn UpstreamDialer>) -> Self {
        Self { settings, dialer }
    }

    /// Runs one session to completion over an already-upgraded client
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UpstreamDialFailed`] if the upstream cannot be
    /// reached (the client is closed with "failed to connect upstream"), or
    /// the send error if the initial `session.update` cannot be delivered.
    /// Disconnects after the pumps start are normal endings reported in the
    /// [`SessionSummary`].
    pub async fn handle(&self, client: Box<dyn DuplexConnection>) -> Result<SessionSummary> {
        let (client_sink, client_source) = client.split();
        let client_out = Arc::new(Outbound::new("client", client_sink));

        let upstream = match self.dial().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "upstream dial failed");
                client_out.close(CloseReason::UpstreamConnectFailed).await;
                return Err(e);
            }
        };
        let (upstream_sink, upstream_source) = upstream.split();
        let upstream_out = Arc::new(Outbound::new("upstream", upstream_sink));

        let update = session_update_frame(&self.settings.session)?;
        if let Err(e) = upstream_out.forward(update).await {
            tracing::warn!(error = %e, "failed to send session.update");
            client_out.close(CloseReason::ForwardFailed).await;
            upstream_out.close(CloseReason::ForwardFailed).await;
            return Err(e);
        }
        tracing::info!(model = %self.settings.model, "realtime session started");

        let teardown = Arc::new(Teardown::default());
        let to_upstream = tokio::spawn(
            Pump {
                direction: Direction::ClientToUpstream,
                source: client_source,
                dst: Arc::clone(&upstream_out),
                src_out: Arc::clone(&client_out),
                teardown: Arc::clone(&teardown),
                read_timeout: self.settings.read_timeout,
            }
            .run()
            .in_current_span(),
        );
        let to_client = tokio::spawn(
            Pump {
                direction: Direction::UpstreamToClient,
                source: upstream_source,
                dst: Arc::clone(&client_out),
                src_out: Arc::clone(&upstream_out),
                teardown: Arc::clone(&teardown),
                read_timeout: self.settings.read_timeout,
            }
            .run()
            .in_current_span(),
        );

        let pumps = async { tokio::join!(to_upstream, to_client) };
        tokio::pin!(pumps);
        let expiry = async {
            match self.settings.max_session {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        let finished = tokio::select! {
            joined = &mut pumps => Some(joined),
            () = expiry => None,
        };
        let (a, b) = match finished {
            Some(joined) => joined,
            None => {
                teardown.begin(CloseReason::SessionExpired);
                pumps.await
            }
        };

        let reason = teardown.reason();
        client_out.close(reason).await;
        upstream_out.close(reason).await;

        let summary = SessionSummary {
            reason,
            client_frames: joined_count(a),
            upstream_frames: joined_count(b),
        };
        tracing::info!(
            reason = %summary.reason,
            client_frames = summary.client_frames,
            upstream_frames = summary.upstream_frames,
            "realtime session ended"
        );
        Ok(summary)
    }

    async fn dial(&self) -> Result<Box<dyn DuplexConnection>> {
        let headers = self.settings.handshake_headers()?;
        self.dialer
            .dial(&self.settings.upstream_url(), &headers)
            .await
            .map_err(|e| match e {
                GatewayError::UpstreamDialFailed(_) => e,
                other => GatewayError::UpstreamDialFailed(other.to_string()),
            })
    }
}

fn joined_count(res: std::result::Result<u64, tokio::task::JoinError>) -> u64 {
    res.unwrap_or_else(|e| {
        tracing::error!(error = %e, "realtime pump task failed");
        0
    })
}

/// Longest wait for a close frame to be written.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Write half of one side, shared by both pumps and teardown.
struct Outbound {
    side: &'static str,
    sink: Mutex<Box<dyn FrameSink>>,
    closed: AtomicBool,
}

impl Outbound {
    fn new(side: &'static str, sink: Box<dyn FrameSink>) -> Self {
        Self {
            side,
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    async fn forward(&self, frame: Frame) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::Transport(format!(
                "{} connection is closed",
                self.side
            )));
        }
        self.sink.lock().await.send(frame).await
    }

    /// Sends a close frame once; later calls are no-ops.
    ///
    /// Gives up after [`CLOSE_GRACE`] so a peer that stopped reading cannot
    /// hold the session open.
    async fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let closing = async { self.sink.lock().await.close(reason).await };
        match tokio::time::timeout(CLOSE_GRACE, closing).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(side = self.side, error = %e, "close on dead connection");
            }
            Err(_) => {
                tracing::warn!(
                    side = self.side,
                    %reason,
                    "close did not complete; dropping connection"
                );
            }
        }
    }
}

/// Shared end-of-session state: the first recorded reason wins.
#[derive(Default)]
struct Teardown {
    cancel: CancellationToken,
    reason: OnceLock<CloseReason>,
}

impl Teardown {
    fn begin(&self, reason: CloseReason) {
        let _ = self.reason.set(reason);
        self.cancel.cancel();
    }

    fn reason(&self) -> CloseReason {
        self.reason
            .get()
            .copied()
            .unwrap_or(CloseReason::UpstreamDisconnected)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    /// Reason reported when this pump's source goes away.
    fn source_gone(self) -> CloseReason {
        match self {
            Self::ClientToUpstream => CloseReason::ClientDisconnected,
            Self::UpstreamToClient => CloseReason::UpstreamDisconnected,
        }
    }
}

struct Pump {
    direction: Direction,
    source: Box<dyn FrameSource>,
    /// Where frames go.
    dst: Arc<Outbound>,
    /// Write half of the side this pump reads from.
    src_out: Arc<Outbound>,
    teardown: Arc<Teardown>,
    read_timeout: Option<Duration>,
}

impl Pump {
    /// Forwards until the source ends, a write fails or the session is
    /// cancelled. Returns the number of frames forwarded.
    async fn run(mut self) -> u64 {
        let mut forwarded = 0u64;
        loop {
            let read = read_frame(self.source.as_mut(), self.read_timeout);
            let outcome = tokio::select! {
                biased;
                () = self.teardown.cancel.cancelled() => break,
                outcome = read => outcome,
            };

            let frame = match outcome {
                Read::Frame(frame) if !frame.is_close() => frame,
                Read::Frame(_) | Read::Gone => {
                    let reason = self.direction.source_gone();
                    tracing::debug!(direction = ?self.direction, %reason, "source closed");
                    self.teardown.begin(reason);
                    self.dst.close(reason).await;
                    break;
                }
                Read::Failed(e) => {
                    let reason = self.direction.source_gone();
                    tracing::debug!(direction = ?self.direction, error = %e, "read failed");
                    self.teardown.begin(reason);
                    self.dst.close(reason).await;
                    break;
                }
                Read::Idle => {
                    tracing::debug!(direction = ?self.direction, "read deadline elapsed");
                    self.teardown.begin(CloseReason::IdleTimeout);
                    self.dst.close(CloseReason::IdleTimeout).await;
                    self.src_out.close(CloseReason::IdleTimeout).await;
                    break;
                }
            };

            let written = tokio::select! {
                biased;
                () = self.teardown.cancel.cancelled() => break,
                res = self.dst.forward(frame) => res,
            };
            if let Err(e) = written {
                tracing::debug!(direction = ?self.direction, error = %e, "forward failed");
                self.teardown.begin(CloseReason::ForwardFailed);
                self.src_out.close(CloseReason::ForwardFailed).await;
                break;
            }
            forwarded += 1;
        }
        forwarded
    }
}

enum Read {
    Frame(Frame),
    Gone,
    Failed(GatewayError),
    Idle,
}

async fn read_frame(source: &mut dyn FrameSource, deadline: Option<Duration>) -> Read {
    let res = match deadline {
        Some(limit) => match tokio::time::timeout(limit, source.recv()).await {
            Ok(res) => res,
            Err(_) => return Read::Idle,
        },
        None => source.recv().await,
    };
    match res {
        Ok(Some(frame)) => Read::Frame(frame),
        Ok(None) => Read::Gone,
        Err(e) => Read::Failed(e),
    }
}
