//! Downstream sinks the relay writes frames into.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::errors::RelayError;

/// Header pairs announced before the first frame.
pub type Headers = &'static [(&'static str, &'static str)];

/// Writable side of the client connection.
///
/// Every method that talks to the client fails with
/// `RelayError::DownstreamDisconnected` once the client is gone.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Announces the response as a live event stream.
    async fn announce(&mut self, headers: Headers) -> Result<(), RelayError>;

    /// Writes one complete frame.
    async fn write(&mut self, frame: String) -> Result<(), RelayError>;

    /// Resolves once the client can no longer receive frames.
    ///
    /// Sinks that cannot observe this never resolve; the relay then notices a
    /// disconnect on the next failed write.
    async fn disconnected(&self) {
        futures::future::pending::<()>().await;
    }

    /// Ends the response. Further writes fail.
    async fn close(&mut self);
}

/// Sink backed by a bounded channel feeding an HTTP response body.
///
/// The announced headers travel over a oneshot so the handler can build the
/// response head before any frame exists.
#[derive(Debug)]
pub struct ChannelSink {
    head: Option<oneshot::Sender<Headers>>,
    body: Option<mpsc::Sender<Bytes>>,
}

/// Receiving half handed to the HTTP layer.
#[derive(Debug)]
pub struct ChannelSinkReceiver {
    pub head: oneshot::Receiver<Headers>,
    pub body: mpsc::Receiver<Bytes>,
}

impl ChannelSink {
    /// Creates a sink and its receiving half. `capacity` bounds the frames
    /// buffered ahead of a slow client.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, ChannelSinkReceiver) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                head: Some(head_tx),
                body: Some(body_tx),
            },
            ChannelSinkReceiver {
                head: head_rx,
                body: body_rx,
            },
        )
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn announce(&mut self, headers: Headers) -> Result<(), RelayError> {
        let head = self.head.take().ok_or(RelayError::DownstreamDisconnected)?;
        head.send(headers)
            .map_err(|_| RelayError::DownstreamDisconnected)
    }

    async fn write(&mut self, frame: String) -> Result<(), RelayError> {
        let body = self.body.as_ref().ok_or(RelayError::DownstreamDisconnected)?;
        body.send(Bytes::from(frame))
            .await
            .map_err(|_| RelayError::DownstreamDisconnected)
    }

    async fn disconnected(&self) {
        if let Some(body) = &self.body {
            body.closed().await;
        }
    }

    async fn close(&mut self) {
        self.head = None;
        self.body = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::frames::EVENT_STREAM_HEADERS;

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (mut sink, mut rx) = ChannelSink::channel(4);

        sink.announce(&EVENT_STREAM_HEADERS).await.unwrap();
        sink.write("a".to_string()).await.unwrap();
        sink.write("b".to_string()).await.unwrap();
        sink.close().await;

        assert_eq!(rx.head.await.unwrap(), &EVENT_STREAM_HEADERS);
        assert_eq!(rx.body.recv().await.unwrap(), Bytes::from("a"));
        assert_eq!(rx.body.recv().await.unwrap(), Bytes::from("b"));
        assert!(rx.body.recv().await.is_none());
    }

    #[tokio::test]
    async fn write_fails_after_receiver_dropped() {
        let (mut sink, rx) = ChannelSink::channel(4);
        drop(rx);

        let err = sink.write("a".to_string()).await.unwrap_err();
        assert!(matches!(err, RelayError::DownstreamDisconnected));
        sink.disconnected().await;
    }

    #[tokio::test]
    async fn write_fails_after_close() {
        let (mut sink, _rx) = ChannelSink::channel(1);
        sink.close().await;

        assert!(sink.write("a".to_string()).await.is_err());
        assert!(sink.announce(&EVENT_STREAM_HEADERS).await.is_err());
    }
}
