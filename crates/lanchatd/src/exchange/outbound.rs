//! Outbound sends. One connection per message or image; no retries.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use lanchat_core::wire::IMAGE_ACK;
use lanchat_core::{ExchangeCommand, PeerRecord, TransferHeader};

use super::{ExchangeContext, TransferError};

/// Carry out one send and report the result as a single event.
pub async fn deliver(ctx: Arc<ExchangeContext>, peer: PeerRecord, command: ExchangeCommand) {
    let addr = peer.socket_addr();
    let result = match &command {
        ExchangeCommand::Msg { text, .. } => send_text(addr, &ctx.handle, text, ctx.io_timeout)
            .await
            .map(|()| format!("message sent to {}", peer.name)),
        ExchangeCommand::ImgSend {
            filename,
            size,
            path,
            ..
        } => send_image(addr, filename, *size, path, ctx.io_timeout)
            .await
            .map(|()| format!("image sent to {}: {filename}", peer.name)),
    };

    match result {
        Ok(text) => {
            tracing::debug!(peer = %peer.name, %addr, "send complete");
            ctx.events.system(text);
        }
        Err(e) => {
            tracing::warn!(peer = %peer.name, %addr, error = %e, "send failed");
            ctx.events
                .error(format!("failed to send to {}: {e}", peer.name));
        }
    }
}

async fn connect(addr: SocketAddr, limit: Duration) -> Result<TcpStream, TransferError> {
    timeout(limit, TcpStream::connect(addr))
        .await
        .map_err(|_| TransferError::Timeout("connecting"))?
        .map_err(|source| TransferError::Connect { addr, source })
}

/// Send `<sender>: <text>` and close.
pub async fn send_text(
    addr: SocketAddr,
    sender: &str,
    text: &str,
    limit: Duration,
) -> Result<(), TransferError> {
    let mut stream = connect(addr, limit).await?;
    let payload = TransferHeader::text(sender, text).to_bytes();
    timeout(limit, stream.write_all(&payload))
        .await
        .map_err(|_| TransferError::Timeout("sending the message"))??;
    stream.shutdown().await?;
    Ok(())
}

/// Announce, wait for the ack, then stream exactly `size` bytes of `path`.
pub async fn send_image(
    addr: SocketAddr,
    filename: &str,
    size: u64,
    path: &Path,
    limit: Duration,
) -> Result<(), TransferError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| TransferError::File(path.to_path_buf(), e))?;
    let actual = file
        .metadata()
        .await
        .map_err(|e| TransferError::File(path.to_path_buf(), e))?
        .len();
    if actual != size {
        return Err(TransferError::SizeMismatch {
            path: path.to_path_buf(),
            declared: size,
            actual,
        });
    }

    let mut stream = connect(addr, limit).await?;
    let header = TransferHeader::image(filename, size).to_bytes();
    timeout(limit, stream.write_all(&header))
        .await
        .map_err(|_| TransferError::Timeout("sending the header"))??;

    let mut ack = [0u8; IMAGE_ACK.len()];
    match timeout(limit, stream.read_exact(&mut ack)).await {
        Err(_) => return Err(TransferError::Timeout("waiting for the ack")),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TransferError::Rejected)
        }
        Ok(Err(e)) => return Err(e.into()),
        Ok(Ok(_)) => {}
    }
    if ack[..] != *IMAGE_ACK {
        return Err(TransferError::Rejected);
    }

    let sent = tokio::io::copy(&mut (&mut file).take(size), &mut stream).await?;
    if sent != size {
        return Err(TransferError::SizeMismatch {
            path: path.to_path_buf(),
            declared: size,
            actual: sent,
        });
    }
    stream.shutdown().await?;
    tracing::trace!(%addr, bytes = sent, "image payload sent");
    Ok(())
}
