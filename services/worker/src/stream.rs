//! Job event streaming channel.
//!
//! A long-lived duplex WebSocket carries job lifecycle updates multiplexed
//! with a liveness sub-protocol. Frames use the tagged envelope from
//! [`farm_types::StreamFrame`]: an application `ping` is answered with a
//! `pong` without invoking the caller's callback; a `job_state` frame
//! invokes the callback with the decoded job.
//!
//! The receive loop is a single sequential consumer; the caller is suspended
//! for the lifetime of the subscription. The channel drives no ping interval
//! of its own (the peer owns heartbeats) but it does enforce a close
//! timeout: a peer that never completes the close handshake is force-closed.
//! Every disconnect surfaces as a terminal error; reconnection is the
//! caller's business.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use farm_types::{ControlFrame, Job, StreamFrame};

/// Default close-handshake timeout.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Terminal subscription errors.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("undecodable frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("stream closed by peer")]
    Closed,

    #[error("close handshake timed out")]
    CloseTimeout,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A subscription endpoint for one job's event stream.
pub struct JobEventChannel {
    endpoint: String,
    close_timeout: Duration,
}

impl JobEventChannel {
    pub fn new(endpoint: impl Into<String>, close_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            close_timeout,
        }
    }

    /// Subscribe and consume frames until disconnect or shutdown.
    ///
    /// Returns `Ok(())` only for a shutdown-initiated clean close; every
    /// other exit (peer close, transport failure, undecodable frame, close
    /// timeout) is a terminal error.
    pub async fn listen<F>(
        &self,
        mut shutdown: watch::Receiver<bool>,
        mut on_job: F,
    ) -> Result<(), StreamError>
    where
        F: FnMut(Job),
    {
        let (stream, _) = connect_async(self.endpoint.as_str()).await?;
        debug!(endpoint = %self.endpoint, "Job event subscription open");

        let (mut sink, mut source) = stream.split();
        // A dropped shutdown sender means shutdown can no longer be
        // requested; stop polling that branch instead of spinning on it.
        let mut shutdown_open = true;

        loop {
            tokio::select! {
                message = source.next() => {
                    match message {
                        None => return Err(StreamError::Closed),
                        Some(Err(error)) => return Err(error.into()),
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<StreamFrame>(text.as_str())? {
                                StreamFrame::Control(ControlFrame::Ping) => {
                                    let pong = serde_json::to_string(&StreamFrame::Control(
                                        ControlFrame::Pong,
                                    ))?;
                                    sink.send(Message::Text(pong.into())).await?;
                                }
                                StreamFrame::Control(ControlFrame::Pong) => {
                                    // Unsolicited; we never ping.
                                }
                                StreamFrame::JobState(job) => on_job(job),
                            }
                        }
                        Some(Ok(Message::Close(_))) => return Err(StreamError::Closed),
                        Some(Ok(_)) => {
                            // Protocol-level ping/pong and binary frames carry
                            // nothing at this layer.
                        }
                    }
                }
                changed = shutdown.changed(), if shutdown_open => {
                    match changed {
                        Ok(()) if *shutdown.borrow() => {
                            return self.close(sink, source).await;
                        }
                        Ok(()) => {}
                        Err(_) => shutdown_open = false,
                    }
                }
            }
        }
    }

    /// Initiate the close handshake, forcing the connection closed if the
    /// peer does not complete it within the timeout.
    async fn close(
        &self,
        mut sink: futures_util::stream::SplitSink<WsStream, Message>,
        mut source: futures_util::stream::SplitStream<WsStream>,
    ) -> Result<(), StreamError> {
        sink.send(Message::Close(None)).await?;

        let drained = tokio::time::timeout(self.close_timeout, async {
            while let Some(message) = source.next().await {
                if message.is_err() {
                    break;
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                debug!(endpoint = %self.endpoint, "Job event subscription closed");
                Ok(())
            }
            Err(_) => {
                warn!(endpoint = %self.endpoint, "Peer did not complete close handshake");
                Err(StreamError::CloseTimeout)
            }
        }
    }
}
