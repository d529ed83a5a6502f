//! WebSocket upgrade and the axum socket halves as hub transports.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parlor_hub::{Frame, FrameSink, FrameStream, TransportError};
use tracing::warn;

use crate::server::AppState;

/// GET `ws_path`: upgrade and run a hub session on the socket.
pub(crate) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.max_message_size(state.max_message_bytes)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            let _ = hub.connect(WsSink(sink), WsStream(stream)).await;
        })
}

pub struct WsSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.0
            .send(Message::Text(text.to_owned().into()))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.0
            .send(Message::Ping(Vec::<u8>::new().into()))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.0.close().await;
    }
}

pub struct WsStream(SplitStream<WebSocket>);

#[async_trait]
impl FrameStream for WsStream {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        let frame = match self.0.next().await? {
            Ok(Message::Text(text)) => Ok(Frame::Text(text.to_string())),
            // Browsers only send text, but JSON in a binary frame is still JSON.
            Ok(Message::Binary(bytes)) => String::from_utf8(bytes.to_vec())
                .map(Frame::Text)
                .map_err(|e| TransportError::InvalidFrame(e.to_string())),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Ok(Frame::Heartbeat),
            Ok(Message::Close(_)) => return None,
            Err(e) => Err(TransportError::Read(e.to_string())),
        };
        Some(frame)
    }
}
