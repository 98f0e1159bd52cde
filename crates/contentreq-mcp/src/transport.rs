//! Transport layer for MCP JSON-RPC communication.
//!
//! MCP uses newline-delimited JSON over stdin/stdout. The reader and writer
//! halves are separate so responses can be written from concurrent tasks
//! while the read loop keeps going; the supervisor uses the same framing on
//! the other end of the pipe.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{JsonRpcNotification, JsonRpcRequest};

/// Message that can be received from the client.
#[derive(Debug)]
pub enum IncomingMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    /// Decode one frame. Frames with an `id` are requests.
    pub fn decode(line: &str) -> io::Result<Self> {
        if let Ok(request) = serde_json::from_str::<JsonRpcRequest>(line) {
            return Ok(IncomingMessage::Request(request));
        }

        if let Ok(notification) = serde_json::from_str::<JsonRpcNotification>(line) {
            return Ok(IncomingMessage::Notification(notification));
        }

        tracing::warn!(frame = line, "Failed to parse message");
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid JSON-RPC message: {}", line),
        ))
    }
}

/// Reads newline-delimited frames.
pub struct FrameReader<R> {
    reader: R,
    buffer: String,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: String::new(),
        }
    }

    /// Next non-blank line, trimmed. `None` on EOF.
    pub async fn next_frame(&mut self) -> io::Result<Option<String>> {
        loop {
            self.buffer.clear();
            if self.reader.read_line(&mut self.buffer).await? == 0 {
                return Ok(None);
            }
            let line = self.buffer.trim();
            if !line.is_empty() {
                tracing::debug!(frame = line, "Received");
                return Ok(Some(line.to_string()));
            }
        }
    }

    /// Read a single JSON-RPC message.
    ///
    /// A malformed frame is reported as `InvalidData`; the stream itself
    /// remains usable.
    pub async fn read_message(&mut self) -> io::Result<Option<IncomingMessage>> {
        match self.next_frame().await? {
            Some(line) => IncomingMessage::decode(&line).map(Some),
            None => Ok(None),
        }
    }
}

/// Writes newline-delimited frames.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `message` as one line and flush.
    pub async fn write_message<T: Serialize>(&mut self, message: &T) -> io::Result<()> {
        let mut json = serde_json::to_string(message).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Serialization error: {}", e))
        })?;

        tracing::debug!(frame = %json, "Sending");

        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await
    }
}
