//! File transfer over a [`Transport`].
//!
//! Each request starts with one message holding a JSON [`FileHeader`].  File
//! bodies follow as raw messages of at most [`CHUNK_SIZE`] bytes; the
//! receiver keeps reading until `contentLength` bytes have arrived, so the
//! transport's one-send-one-receive guarantee is all the framing needed.
//!
//! ```text
//!  client                                 server
//!    │ ── PUT {fileName, contentLength} ──▶ │
//!    │ ── chunk ─▶ chunk ─▶ ... ──────────▶ │ writes base_dir/fileName
//!    │                                      │
//!    │ ── GET {fileName} ─────────────────▶ │
//!    │ ◀─ RESULT {resultCode: 200|404, contentLength}
//!    │ ◀─ chunk ◀─ chunk ◀─ ... ─────────── │ (only on 200)
//! ```

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::{ConnError, Listener, Transport};

/// Largest body chunk sent as one message.
pub const CHUNK_SIZE: usize = 2048;

pub const OK: u16 = 200;
pub const NOT_FOUND: u16 = 404;
pub const SERVER_ERROR: u16 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Put,
    Result,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHeader {
    pub method: Method,
    #[serde(default)]
    pub result_code: u16,
    pub file_name: String,
    #[serde(default)]
    pub content_length: u64,
}

impl FileHeader {
    pub fn get(file_name: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            result_code: 0,
            file_name: file_name.into(),
            content_length: 0,
        }
    }

    pub fn put(file_name: impl Into<String>, content_length: u64) -> Self {
        Self {
            method: Method::Put,
            result_code: 0,
            file_name: file_name.into(),
            content_length,
        }
    }

    /// The answer to this request.
    pub fn result(&self, result_code: u16, content_length: u64) -> Self {
        Self {
            method: Method::Result,
            result_code,
            file_name: self.file_name.clone(),
            content_length,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TransferError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransferError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Conn(#[from] ConnError),
    #[error("file I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("malformed header: {0}")]
    Header(#[from] serde_json::Error),
    #[error("server answered {0}")]
    Remote(u16),
    #[error("unexpected {0:?} header")]
    Unexpected(Method),
    #[error("invalid file name `{0}`")]
    BadName(String),
    #[error("body overran its announced length: expected {expected} bytes, got {received}")]
    Overrun { expected: u64, received: u64 },
}

/// Reduce `name` to its last path component.
fn file_name(name: &str) -> Result<&str, TransferError> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransferError::BadName(name.to_string()))
}

async fn send_body(transport: &dyn Transport, body: &[u8]) -> Result<(), TransferError> {
    for chunk in body.chunks(CHUNK_SIZE) {
        transport.send(chunk.to_vec()).await?;
    }
    Ok(())
}

async fn receive_body(transport: &dyn Transport, len: u64) -> Result<Vec<u8>, TransferError> {
    let mut body = Vec::with_capacity(len.min(1 << 20) as usize);
    while (body.len() as u64) < len {
        let chunk = transport.receive().await?;
        body.extend_from_slice(&chunk);
        log::trace!("[fts] {} of {len} bytes received", body.len());
    }
    // Chunks are whole messages, so an overrun means the peer's header lied.
    if body.len() as u64 > len {
        return Err(TransferError::Overrun {
            expected: len,
            received: body.len() as u64,
        });
    }
    Ok(body)
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Upload `path`, returning once the peer has acknowledged every byte.
pub async fn put_file(transport: &dyn Transport, path: &Path) -> Result<u64, TransferError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransferError::BadName(path.display().to_string()))?;
    let body = tokio::fs::read(path).await?;
    let len = body.len() as u64;

    transport
        .send(FileHeader::put(name, len).to_bytes()?)
        .await?;
    send_body(transport, &body).await?;
    transport.flush().await?;
    log::info!("[fts] sent {name} ({len} bytes)");
    Ok(len)
}

/// Download `name` into `dest`.
pub async fn get_file(
    transport: &dyn Transport,
    name: &str,
    dest: &Path,
) -> Result<u64, TransferError> {
    transport.send(FileHeader::get(name).to_bytes()?).await?;

    let answer = FileHeader::from_bytes(&transport.receive().await?)?;
    if answer.method != Method::Result {
        return Err(TransferError::Unexpected(answer.method));
    }
    if answer.result_code != OK {
        log::error!("[fts] server answered {} for {name}", answer.result_code);
        return Err(TransferError::Remote(answer.result_code));
    }

    let body = receive_body(transport, answer.content_length).await?;
    tokio::fs::write(dest, &body).await?;
    log::info!("[fts] received {name} ({} bytes)", body.len());
    Ok(body.len() as u64)
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// Serve files from `base_dir` to every peer of `listener`, forever.
pub async fn serve(listener: &dyn Listener, base_dir: PathBuf) -> Result<(), TransferError> {
    loop {
        let peer = listener.listen().await?;
        let base_dir = base_dir.clone();
        tokio::spawn(async move {
            loop {
                match handle_request(&*peer, &base_dir).await {
                    Ok(()) => {}
                    Err(TransferError::Conn(e)) => {
                        log::debug!("[fts] peer gone: {e}");
                        break;
                    }
                    Err(e) => log::warn!("[fts] request failed: {e}"),
                }
            }
        });
    }
}

async fn handle_request(peer: &dyn Transport, base_dir: &Path) -> Result<(), TransferError> {
    let header = FileHeader::from_bytes(&peer.receive().await?)?;
    log::info!("[fts] {:?} {}", header.method, header.file_name);

    match header.method {
        Method::Get => {
            let path = base_dir.join(file_name(&header.file_name)?);
            match tokio::fs::read(&path).await {
                Ok(body) => {
                    peer.send(header.result(OK, body.len() as u64).to_bytes()?)
                        .await?;
                    send_body(peer, &body).await?;
                    log::info!("[fts] {} sent", header.file_name);
                }
                Err(e) => {
                    let code = if e.kind() == io::ErrorKind::NotFound {
                        NOT_FOUND
                    } else {
                        SERVER_ERROR
                    };
                    log::info!("[fts] {} unavailable: {e}", header.file_name);
                    peer.send(header.result(code, 0).to_bytes()?).await?;
                }
            }
        }
        Method::Put => {
            // Read the body even if the name is bad, so the stream stays in step.
            let body = receive_body(peer, header.content_length).await?;
            let path = base_dir.join(file_name(&header.file_name)?);
            tokio::fs::write(&path, &body).await?;
            log::info!("[fts] stored {} ({} bytes)", path.display(), body.len());
        }
        Method::Result => return Err(TransferError::Unexpected(Method::Result)),
    }
    Ok(())
}
