//! Inbound transfers.
//!
//! A connection starts with a bounded header. `IMG <filename> <size>` is
//! acknowledged and followed by exactly `size` bytes; anything else is a
//! chat line that runs to EOF.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use lanchat_core::wire::{IMAGE_ACK, MAX_HEADER_LEN};
use lanchat_core::{EventCategory, TransferHeader};

use super::{ExchangeContext, TransferError};

/// What a completed inbound connection carried.
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    /// Peer connected and closed without sending anything.
    Empty,
    Text(String),
    Image {
        filename: String,
        size: u64,
        path: PathBuf,
    },
}

/// Handle one accepted connection and report the outcome as an event.
pub async fn serve(ctx: Arc<ExchangeContext>, stream: TcpStream, peer: SocketAddr) {
    match receive(&ctx, stream).await {
        Ok(Received::Empty) => {
            tracing::debug!(%peer, "connection closed without data");
        }
        Ok(Received::Text(text)) => {
            tracing::debug!(%peer, len = text.len(), "message received");
            ctx.events.send(EventCategory::MessageReceived, text);
        }
        Ok(Received::Image {
            filename,
            size,
            path,
        }) => {
            tracing::info!(%peer, %filename, size, path = %path.display(), "image stored");
            ctx.events.send(
                EventCategory::ImageReceived,
                format!(
                    "image {filename} ({size} bytes) from {} saved to {}",
                    peer.ip(),
                    path.display()
                ),
            );
            ctx.viewer.open(&path);
        }
        Err(TransferError::Wire(e)) => {
            tracing::warn!(%peer, error = %e, "discarding malformed transfer header");
        }
        Err(e) => {
            tracing::warn!(%peer, error = %e, "inbound transfer failed");
            ctx.events
                .error(format!("transfer from {} failed: {e}", peer.ip()));
        }
    }
}

/// Read one transfer from `stream`. The stream is closed when this returns.
pub async fn receive<S>(ctx: &ExchangeContext, mut stream: S) -> Result<Received, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut buf, newline) = read_header(&mut stream, ctx.io_timeout).await?;
    if buf.iter().all(u8::is_ascii_whitespace) {
        return Ok(Received::Empty);
    }

    // A header cut at the size limit may end inside a multi-byte character.
    let header_end = newline.unwrap_or_else(|| complete_utf8_len(&buf));
    match TransferHeader::decode(&buf[..header_end])? {
        TransferHeader::Text(_) => {
            read_to_limit(&mut stream, &mut buf, ctx.io_timeout).await?;
            buf.truncate(MAX_HEADER_LEN);
            buf.truncate(complete_utf8_len(&buf));
            let text = String::from_utf8_lossy(&buf).trim().to_string();
            Ok(Received::Text(text))
        }
        TransferHeader::Image { filename, size } => {
            ctx.store.path_for(&filename)?;
            if size > ctx.max_image_bytes {
                return Err(TransferError::TooLarge {
                    size,
                    limit: ctx.max_image_bytes,
                });
            }

            timeout(ctx.io_timeout, stream.write_all(IMAGE_ACK))
                .await
                .map_err(|_| TransferError::Timeout("sending the ack"))??;

            let leftover = buf.split_off((header_end + 1).min(buf.len()));
            let payload = read_payload(&mut stream, leftover, size, ctx.io_timeout).await?;
            let path = ctx.store.save(&filename, &payload).await?;

            Ok(Received::Image {
                filename,
                size,
                path,
            })
        }
    }
}

/// Length of `bytes` without a trailing incomplete UTF-8 sequence. Invalid
/// bytes elsewhere are left for the decoder to report.
fn complete_utf8_len(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => bytes.len(),
    }
}

/// Read until the first newline, EOF or [`MAX_HEADER_LEN`]. Returns all
/// bytes read so far and the position of the newline, if one arrived.
async fn read_header<S>(
    stream: &mut S,
    idle: Duration,
) -> Result<(BytesMut, Option<usize>), TransferError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(512);
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            return Ok((buf, Some(pos)));
        }
        if buf.len() >= MAX_HEADER_LEN {
            return Ok((buf, None));
        }
        let n = timeout(idle, stream.read_buf(&mut buf))
            .await
            .map_err(|_| TransferError::Timeout("reading the header"))??;
        if n == 0 {
            return Ok((buf, None));
        }
    }
}

/// Keep reading a chat line until EOF or the header limit.
async fn read_to_limit<S>(stream: &mut S, buf: &mut BytesMut, idle: Duration) -> Result<(), TransferError>
where
    S: AsyncRead + Unpin,
{
    while buf.len() < MAX_HEADER_LEN {
        let n = timeout(idle, stream.read_buf(buf))
            .await
            .map_err(|_| TransferError::Timeout("reading the message"))??;
        if n == 0 {
            break;
        }
    }
    Ok(())
}

/// Read exactly `size` payload bytes, starting with any already buffered.
/// Bytes beyond `size` are ignored.
async fn read_payload<S>(
    stream: &mut S,
    mut buf: BytesMut,
    size: u64,
    idle: Duration,
) -> Result<BytesMut, TransferError>
where
    S: AsyncRead + Unpin,
{
    let expected = usize::try_from(size).map_err(|_| TransferError::TooLarge {
        size,
        limit: usize::MAX as u64,
    })?;
    buf.truncate(expected);
    buf.reserve(expected - buf.len());

    while buf.len() < expected {
        let remaining = (expected - buf.len()) as u64;
        let n = timeout(idle, (&mut *stream).take(remaining).read_buf(&mut buf))
            .await
            .map_err(|_| TransferError::Timeout("reading the image"))??;
        if n == 0 {
            return Err(TransferError::Truncated {
                expected: size,
                received: buf.len() as u64,
            });
        }
    }
    Ok(buf)
}
