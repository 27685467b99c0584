//! Channel establishment
//!
//! A [`Connector`] turns a stream URL and an optional bearer token into a
//! [`Channel`]: an outbound queue plus an ordered event stream. The WebSocket
//! implementation runs one pump task per channel that owns the socket.

use super::connection::{ChannelEvent, ConnectError, ABNORMAL_CLOSURE, NORMAL_CLOSURE, NO_STATUS_RECEIVED};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace, warn};

const CHANNEL_CAPACITY: usize = 64;

/// Frames the session hands to the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

impl Outbound {
    pub fn normal_close() -> Self {
        Outbound::Close {
            code: NORMAL_CLOSURE,
            reason: "client shutdown".to_string(),
        }
    }
}

/// An open channel
#[derive(Debug)]
pub struct Channel {
    pub outbound: mpsc::Sender<Outbound>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Channel factory seam
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str, token: Option<&str>) -> Result<Channel, ConnectError>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

fn map_ws_error(error: WsError) -> ConnectError {
    match error {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                ConnectError::Unauthorized { status }
            } else {
                ConnectError::Rejected { status }
            }
        }
        WsError::Url(e) => ConnectError::InvalidRequest(e.to_string()),
        other => ConnectError::Network(other.to_string()),
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str, token: Option<&str>) -> Result<Channel, ConnectError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ConnectError::InvalidRequest(e.to_string()))?;

        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ConnectError::InvalidRequest(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_ws_error)?;
        debug!(url = %url, status = %response.status(), "WebSocket handshake complete");

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel::<ChannelEvent>(CHANNEL_CAPACITY);
        let (mut sink, mut source) = stream.split();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => match outbound {
                        Some(Outbound::Text(text)) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                let _ = events_tx.send(ChannelEvent::Failed(e.to_string())).await;
                                break;
                            }
                        }
                        Some(Outbound::Close { code, reason }) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            };
                            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                                trace!(error = %e, "Close frame not delivered");
                            }
                            break;
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    inbound = source.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            let _ = events_tx.send(ChannelEvent::Message(text)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.into_owned()))
                                .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                            let _ = events_tx.send(ChannelEvent::Closed { code, reason }).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket read failed");
                            let _ = events_tx.send(ChannelEvent::Failed(e.to_string())).await;
                            break;
                        }
                        None => {
                            let _ = events_tx
                                .send(ChannelEvent::Closed {
                                    code: ABNORMAL_CLOSURE,
                                    reason: "stream ended".to_string(),
                                })
                                .await;
                            break;
                        }
                    },
                }
            }
            trace!("WebSocket pump finished");
        });

        Ok(Channel {
            outbound: outbound_tx,
            events: events_rx,
        })
    }
}
