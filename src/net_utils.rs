// Fonctions utilitaires réseau : découpage en trames et envoi de messages

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use crate::error::{AppError, Result};
use crate::types::Message;

/// Taille maximale d'une trame acceptée en réception
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Sérialise un message en trame : longueur u32 big-endian puis le JSON
pub fn encode_frame(message: &Message) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message).map_err(AppError::from)?;
    let len = u32::try_from(body.len())
        .map_err(|_| AppError::FrameError(format!("message too large: {} bytes", body.len())))?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn decode_message(body: &[u8]) -> Result<Message> {
    serde_json::from_slice(body).map_err(AppError::from)
}

/// Écrit une trame complète ; un appel = un message
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Lit le corps d'une trame. `Ok(None)` quand le pair a fermé proprement entre deux trames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(AppError::from(e)),
    };
    if len > max_len {
        return Err(AppError::FrameError(format!("frame of {} bytes exceeds limit of {}", len, max_len)));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await
        .map_err(|e| AppError::FrameError(format!("truncated frame: {}", e)))?;
    Ok(Some(body))
}

/// Ouvre une connexion, envoie un seul message puis ferme (injection depuis l'extérieur)
pub async fn send_message(addr: &str, message: &Message, log_prefix: &str) -> Result<()> {
    let mut stream = TcpStream::connect(addr).await
        .map_err(|e| AppError::NetworkError(format!("Failed to connect to {}: {}", addr, e)))?;
    write_frame(&mut stream, message).await?;
    stream.shutdown().await?;
    log::info!("{} Message sent to {}", log_prefix, addr);
    Ok(())
}
