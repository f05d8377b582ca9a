//! In-process transport pair, used by tests and by embedders that bridge
//! their own socket type through channels.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{TransportError, TransportReader, TransportWriter, WireMessage};

pub struct MemoryReader {
    rx: mpsc::Receiver<WireMessage>,
}

pub struct MemoryWriter {
    tx: mpsc::Sender<WireMessage>,
    binary: bool,
}

impl MemoryWriter {
    /// Forces audio onto the base64 JSON path.
    pub fn text_only(mut self) -> Self {
        self.binary = false;
        self
    }
}

/// One side of a [`duplex`] pair.
pub struct MemoryEnd {
    pub reader: MemoryReader,
    pub writer: MemoryWriter,
}

impl MemoryEnd {
    pub fn split(self) -> (MemoryReader, MemoryWriter) {
        (self.reader, self.writer)
    }
}

/// Two connected ends; whatever one writes the other reads. Each direction
/// buffers up to `capacity` messages.
pub fn duplex(capacity: usize) -> (MemoryEnd, MemoryEnd) {
    let (left_tx, left_rx) = mpsc::channel(capacity.max(1));
    let (right_tx, right_rx) = mpsc::channel(capacity.max(1));
    (
        MemoryEnd {
            reader: MemoryReader { rx: right_rx },
            writer: MemoryWriter {
                tx: left_tx,
                binary: true,
            },
        },
        MemoryEnd {
            reader: MemoryReader { rx: left_rx },
            writer: MemoryWriter {
                tx: right_tx,
                binary: true,
            },
        },
    )
}

#[async_trait]
impl TransportReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

#[async_trait]
impl TransportWriter for MemoryWriter {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn supports_binary(&self) -> bool {
        self.binary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn messages_cross_in_both_directions() {
        let (client, server) = duplex(4);
        let (mut client_rx, mut client_tx) = client.split();
        let (mut server_rx, mut server_tx) = server.split();

        client_tx
            .send(WireMessage::Text("hello".into()))
            .await
            .expect("client send");
        server_tx
            .send(WireMessage::Binary(Bytes::from_static(&[9])))
            .await
            .expect("server send");

        assert_eq!(
            server_rx.recv().await.expect("server recv"),
            Some(WireMessage::Text("hello".into()))
        );
        assert_eq!(
            client_rx.recv().await.expect("client recv"),
            Some(WireMessage::Binary(Bytes::from_static(&[9])))
        );
    }

    #[tokio::test]
    async fn dropping_a_writer_disconnects_the_peer() {
        let (client, server) = duplex(1);
        let (_client_rx, client_tx) = client.split();
        let (mut server_rx, _server_tx) = server.split();

        drop(client_tx);
        assert_eq!(server_rx.recv().await.expect("recv"), None);
    }
}
