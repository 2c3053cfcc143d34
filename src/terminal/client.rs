//! Browser side of a terminal session.
//!
//! The WebSocket is split into a shared writer and an owned reader. The
//! writer serializes every send through one lock because the socket does
//! not tolerate concurrent writers.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One client message after ping/pong and close handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Binary(Bytes),
}

impl From<ClientFrame> for Message {
    fn from(frame: ClientFrame) -> Self {
        match frame {
            ClientFrame::Text(text) => Message::Text(text.into()),
            ClientFrame::Binary(data) => Message::Binary(data),
        }
    }
}

pub type ClientSink = Pin<Box<dyn Sink<ClientFrame, Error = io::Error> + Send>>;
pub type ClientStream = Pin<Box<dyn Stream<Item = io::Result<ClientFrame>> + Send>>;

#[derive(Clone)]
pub struct ClientWriter {
    sink: Arc<Mutex<ClientSink>>,
}

impl ClientWriter {
    pub fn new<S>(sink: S) -> Self
    where
        S: Sink<ClientFrame, Error = io::Error> + Send + 'static,
    {
        Self {
            sink: Arc::new(Mutex::new(Box::pin(sink))),
        }
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> io::Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(ClientFrame::Binary(data.into())).await
    }

    /// Send a close to the client. Only the connection owner calls this.
    pub async fn close(&self) -> io::Result<()> {
        let mut sink = self.sink.lock().await;
        sink.close().await
    }
}

/// Split an upgraded socket into the writer/reader pair the bridge works on.
pub fn split_websocket(socket: WebSocket) -> (ClientWriter, ClientStream) {
    let (sender, receiver) = socket.split();

    let sink = sender
        .with(|frame: ClientFrame| future::ready(Ok::<Message, axum::Error>(frame.into())))
        .sink_map_err(io::Error::other);

    let stream = receiver
        .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(ClientFrame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(data)) => Some(Ok(ClientFrame::Binary(data))),
                Ok(_) => None,
                Err(err) => Some(Err(io::Error::other(err))),
            })
        });

    (ClientWriter::new(sink), Box::pin(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;

    #[tokio::test]
    async fn writer_sends_binary_frames_in_order() {
        let (tx, mut rx) = mpsc::unbounded::<ClientFrame>();
        let writer = ClientWriter::new(tx.sink_map_err(io::Error::other));

        writer.send_binary(&b"one"[..]).await.unwrap();
        writer.clone().send_binary(&b"two"[..]).await.unwrap();

        assert_eq!(
            rx.next().await,
            Some(ClientFrame::Binary(Bytes::from_static(b"one")))
        );
        assert_eq!(
            rx.next().await,
            Some(ClientFrame::Binary(Bytes::from_static(b"two")))
        );
    }

    #[tokio::test]
    async fn writer_reports_closed_peer() {
        let (tx, rx) = mpsc::unbounded::<ClientFrame>();
        drop(rx);
        let writer = ClientWriter::new(tx.sink_map_err(io::Error::other));
        assert!(writer.send_binary(&b"lost"[..]).await.is_err());
    }

    #[test]
    fn frames_convert_to_websocket_messages() {
        assert!(matches!(
            Message::from(ClientFrame::Binary(Bytes::from_static(b"x"))),
            Message::Binary(_)
        ));
        assert!(matches!(
            Message::from(ClientFrame::Text("x".into())),
            Message::Text(_)
        ));
    }
}
