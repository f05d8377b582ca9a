//! Newline-delimited JSON over any byte stream. Text frames only; audio
//! travels base64 encoded.

use async_trait::async_trait;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout,
};

use super::{TransportError, TransportReader, TransportWriter, WireMessage};

pub struct LinesReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> LinesReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            lines: BufReader::new(inner).lines(),
        }
    }
}

pub struct LinesWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> LinesWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

/// JSON-lines transport over the process's stdin and stdout.
pub fn stdio() -> (LinesReader<Stdin>, LinesWriter<Stdout>) {
    (
        LinesReader::new(tokio::io::stdin()),
        LinesWriter::new(tokio::io::stdout()),
    )
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> TransportReader for LinesReader<R> {
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        // `next_line` is cancel safe, so a partially read line survives a
        // dropped `recv` future.
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if !line.is_empty() {
                return Ok(Some(WireMessage::Text(line.to_string())));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> TransportWriter for LinesWriter<W> {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        let WireMessage::Text(text) = message else {
            return Err(TransportError::Unsupported(
                "binary frames over a json lines transport",
            ));
        };
        self.inner.write_all(text.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await?;
        Ok(())
    }

    fn supports_binary(&self) -> bool {
        false
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn round_trips_lines_and_skips_blanks() {
        let (client, server) = tokio::io::duplex(256);
        let mut writer = LinesWriter::new(client);
        let mut reader = LinesReader::new(server);

        writer
            .send(WireMessage::Text(r#"{"type":"websocket_stop"}"#.into()))
            .await
            .expect("send line");
        writer
            .send(WireMessage::Text("   ".into()))
            .await
            .expect("send blank");
        writer
            .send(WireMessage::Text("second".into()))
            .await
            .expect("send line");
        drop(writer);

        assert_eq!(
            reader.recv().await.expect("recv"),
            Some(WireMessage::Text(r#"{"type":"websocket_stop"}"#.into()))
        );
        assert_eq!(
            reader.recv().await.expect("recv"),
            Some(WireMessage::Text("second".into()))
        );
        assert_eq!(reader.recv().await.expect("recv"), None);
    }

    #[tokio::test]
    async fn rejects_binary_frames() {
        let (client, _server) = tokio::io::duplex(16);
        let mut writer = LinesWriter::new(client);
        assert!(!writer.supports_binary());
        let err = writer
            .send(WireMessage::Binary(Bytes::from_static(&[1])))
            .await
            .expect_err("binary unsupported");
        assert!(matches!(err, TransportError::Unsupported(_)));
    }
}
