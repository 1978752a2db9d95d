//! Transport abstraction.
//!
//! The driver only needs a duplex stream of text frames. [`Connector`] hides
//! how that stream is produced: production uses [`WsConnector`] over
//! `tokio-tungstenite`, tests plug in channel-backed fakes.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt as _, Stream, StreamExt as _};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;

/// Transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
}

/// Outgoing half: accepts text frames.
pub type Outgoing = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Incoming half: yields text frames until the peer closes.
pub type Incoming = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Opens duplex text transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `url` and wait for the handshake to complete.
    async fn connect(&self, url: &str) -> Result<(Outgoing, Incoming), TransportError>;
}

/// Websocket connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<(Outgoing, Incoming), TransportError> {
        tracing::debug!(url, "connecting websocket");
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!("websocket handshake completed");

        let (write, read) = stream.split();

        let outgoing: Outgoing = Box::pin(
            write
                .sink_map_err(|e| TransportError::Send(e.to_string()))
                .with(|text: String| future::ok::<_, TransportError>(Message::Text(text.into()))),
        );

        let incoming: Incoming = Box::pin(
            read.take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
                .filter_map(|message| future::ready(text_frame(message))),
        );

        Ok((outgoing, incoming))
    }
}

/// Map a websocket message to a text frame. Control frames are skipped.
fn text_frame(
    message: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<String, TransportError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(text.to_string())),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(text)),
            Err(_) => {
                tracing::warn!(len = bytes.len(), "dropping non-utf8 binary frame");
                None
            }
        },
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_) | Message::Close(_)) => None,
        Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_text_frame_passthrough() {
        let frame = text_frame(Ok(Message::Text("hello".to_string().into())));
        assert_eq!(frame, Some(Ok("hello".to_string())));
    }

    #[test]
    fn test_binary_frame_utf8() {
        let frame = text_frame(Ok(Message::Binary(b"{\"type\":\"pong\"}".to_vec().into())));
        assert_eq!(frame, Some(Ok("{\"type\":\"pong\"}".to_string())));

        let frame = text_frame(Ok(Message::Binary(vec![0xff, 0xfe].into())));
        assert_eq!(frame, None);
    }

    #[test]
    fn test_control_frames_skipped() {
        assert_eq!(text_frame(Ok(Message::Ping(vec![].into()))), None);
        assert_eq!(text_frame(Ok(Message::Pong(vec![].into()))), None);
    }

    #[test]
    fn test_read_error_surfaces() {
        let frame = text_frame(Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed));
        assert!(matches!(frame, Some(Err(TransportError::Receive(_)))));
    }
}
