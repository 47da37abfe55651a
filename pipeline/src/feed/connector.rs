//! Streaming connection to the depth feed.
//!
//! `FeedConnector::open` performs the handshake (fixed-delay retries), then
//! hands the socket to a background reader. The reader pushes raw frames
//! into a capacity-1 channel, so it stays parked until the consumer has
//! taken the previous frame. Its exit status, including a panic, reaches
//! the consumer through a supervisor as a typed `FeedError`.

use std::time::Duration;

use async_trait::async_trait;
use common::{Shutdown, ShutdownTrigger};
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::task::supervise;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Anything that can open a live feed. The collector depends on this seam,
/// not on the websocket client.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn open(&self, shutdown: Shutdown) -> Result<FeedHandle, FeedError>;
}

pub struct FeedConnector {
    url: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl FeedConnector {
    pub fn new(cfg: &FeedConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            max_retries: cfg.max_retries.max(1),
            retry_delay: cfg.retry_delay,
        }
    }

    /// Handshake with up to `max_retries` attempts, sleeping `retry_delay`
    /// between them. The last handshake error is returned once exhausted.
    #[instrument(skip(self), fields(url = %self.url, max_retries = self.max_retries))]
    async fn connect(&self) -> Result<WsStream, FeedError> {
        let mut attempt = 1;

        loop {
            match connect_async(self.url.as_str()).await {
                Ok((ws, response)) => {
                    info!(attempt, status = %response.status(), "feed connected");
                    return Ok(ws);
                }
                Err(e) if attempt >= self.max_retries => {
                    warn!(attempt, error = %e, "feed connection retries exhausted");
                    return Err(FeedError::Connection {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(
                        attempt,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        error = %e,
                        "feed connection attempt failed; retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl FeedSource for FeedConnector {
    async fn open(&self, shutdown: Shutdown) -> Result<FeedHandle, FeedError> {
        let ws = self.connect().await?;

        let (frames_tx, frames_rx) = mpsc::channel(1);
        let close = ShutdownTrigger::new();

        let span = info_span!("feed_reader", url = %self.url);
        let reader = tokio::spawn(
            read_loop(ws, frames_tx, close.subscribe(), shutdown).instrument(span),
        );

        Ok(FeedHandle {
            frames: frames_rx,
            faults: supervise("feed_reader", reader),
            close,
            finished: false,
        })
    }
}

#[derive(Debug)]
pub enum FeedEvent {
    Frame(Vec<u8>),
    Fault(FeedError),
    /// The reader stopped without a fault (close request, shutdown, or a
    /// closure classified as graceful).
    Closed,
}

/// Consumer side of an open feed. Dropping it stops the reader.
pub struct FeedHandle {
    frames: mpsc::Receiver<Vec<u8>>,
    faults: oneshot::Receiver<FeedError>,
    close: ShutdownTrigger,
    finished: bool,
}

impl FeedHandle {
    /// Builds a handle around an existing frame/fault pair. Lets other
    /// `FeedSource` implementations reuse the same consumer side.
    pub fn from_parts(
        frames: mpsc::Receiver<Vec<u8>>,
        faults: oneshot::Receiver<FeedError>,
    ) -> Self {
        Self {
            frames,
            faults,
            close: ShutdownTrigger::new(),
            finished: false,
        }
    }

    /// Next frame, or the way the reader ended. Frames already handed over
    /// are always drained before the end is reported.
    pub async fn next(&mut self) -> FeedEvent {
        if self.finished {
            return FeedEvent::Closed;
        }

        if let Some(frame) = self.frames.recv().await {
            return FeedEvent::Frame(frame);
        }

        self.finished = true;
        match (&mut self.faults).await {
            Ok(fault) => FeedEvent::Fault(fault),
            Err(_) => FeedEvent::Closed,
        }
    }

    /// Explicit close request; the reader releases the socket and exits.
    pub fn close(&self) {
        self.close.trigger();
    }
}

async fn read_loop(
    mut ws: WsStream,
    frames: mpsc::Sender<Vec<u8>>,
    mut close: Shutdown,
    mut shutdown: Shutdown,
) -> Result<(), FeedError> {
    debug!("feed reader started");

    loop {
        let msg = tokio::select! {
            _ = close.wait() => return release(ws, "close requested").await,
            _ = shutdown.wait() => return release(ws, "shutdown").await,
            msg = ws.next() => msg,
        };

        let payload = match msg {
            Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(Message::Binary(data))) => data.to_vec(),
            Some(Ok(Message::Close(frame))) => return classify_close(frame),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return classify_read_error(e),
            None => {
                info!("feed stream ended without a close frame");
                return Ok(());
            }
        };

        tokio::select! {
            sent = frames.send(payload) => {
                if sent.is_err() {
                    return release(ws, "frame receiver dropped").await;
                }
            }
            _ = close.wait() => return release(ws, "close requested").await,
            _ = shutdown.wait() => return release(ws, "shutdown").await,
        }
    }
}

async fn release(mut ws: WsStream, why: &'static str) -> Result<(), FeedError> {
    info!(reason = why, "closing feed connection");
    if let Err(e) = ws.close(None).await {
        debug!(error = %e, "close handshake failed; dropping socket");
    }
    Ok(())
}

/// Going-away and abnormal closures end the feed quietly; any other close
/// is surfaced as a fault.
fn classify_close(frame: Option<CloseFrame>) -> Result<(), FeedError> {
    match frame {
        Some(f) if matches!(f.code, CloseCode::Away | CloseCode::Abnormal) => {
            info!(code = u16::from(f.code), reason = f.reason.as_str(), "feed closed by peer");
            Ok(())
        }
        Some(f) => Err(FeedError::UnexpectedClose {
            code: Some(u16::from(f.code)),
            reason: f.reason.to_string(),
        }),
        None => Err(FeedError::UnexpectedClose {
            code: None,
            reason: "close frame without status".to_string(),
        }),
    }
}

/// A connection that drops without a closing handshake is an abnormal
/// closure, not a read fault.
fn classify_read_error(e: tungstenite::Error) -> Result<(), FeedError> {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => Ok(()),
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            info!("feed connection reset without closing handshake");
            Ok(())
        }
        tungstenite::Error::Io(ref io)
            if matches!(
                io.kind(),
                std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset
            ) =>
        {
            info!(error = %io, "feed connection dropped");
            Ok(())
        }
        other => Err(FeedError::Read(other)),
    }
}
