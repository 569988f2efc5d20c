//! Wire protocol between host and executor.
//!
//! # Protocol Format
//!
//! - **Transport**: the executor's stdin (host→executor) and stdout
//!   (executor→host)
//! - **Encoding**: JSON, tag-discriminated via the `frame` field
//! - **Framing**: newline-delimited (each frame ends with `\n`; JSON string
//!   escaping keeps the delimiter unambiguous)
//!
//! Both endpoints register the same frame family by instantiating
//! [`FrameReader`]/[`FrameWriter`] with the matching message type:
//! [`Request`] flows host→executor, [`Response`] flows executor→host. A tag
//! that is not part of the registered family fails decoding and poisons the
//! stream; there is no resynchronization.
//!
//! # Exchange
//!
//! ```text
//! Host                                  Executor
//!   |  {"frame":"config",...}\n            |
//!   |------------------------------------->|   (exactly once, first)
//!   |  {"frame":"execute",...}\n           |
//!   |------------------------------------->|
//!   |            {"frame":"log",...}\n     |
//!   |<-------------------------------------|   (any number)
//!   |            {"frame":"result",...}\n  |
//!   |<-------------------------------------|   (exactly one per request)
//! ```

use std::marker::PhantomData;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::constants::MAX_FRAME_LEN;
use crate::error::{Error, Result};

// =============================================================================
// Frame Types
// =============================================================================

/// A host directory made visible inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Path on the host.
    pub host: PathBuf,
    /// Path inside the container, reinterpreted relative to the new root.
    pub container: PathBuf,
    /// Whether writes are allowed; read-only otherwise.
    #[serde(default)]
    pub writable: bool,
}

/// One-shot executor configuration, always the first frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Skip namespace mounts and only chroot into the working directory.
    #[serde(default)]
    pub chroot: bool,
    /// Host directories to bind into the new root, applied in order.
    #[serde(default)]
    pub mounts: Vec<Mount>,
}

/// Run a shell command inside the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Command passed to `/bin/sh -c`.
    pub command: String,
}

/// Copy a path recursively, preserving times and ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyRequest {
    pub src: PathBuf,
    pub dst: PathBuf,
}

/// Populate the root filesystem from a Docker Hub library image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitFromDockerRequest {
    /// Image name under `library/`, e.g. `alpine`.
    pub image: String,
    /// Image tag, e.g. `3.18`.
    pub tag: String,
}

/// Frames the host sends to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Request {
    Config(Config),
    Execute(ExecuteRequest),
    Copy(CopyRequest),
    InitFromDocker(InitFromDockerRequest),
}

impl Request {
    /// Tag name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Execute(_) => "execute",
            Self::Copy(_) => "copy",
            Self::InitFromDocker(_) => "init_from_docker",
        }
    }
}

/// Which output stream a log frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum LogStream {
    Out = 0,
    Err = 1,
}

impl From<LogStream> for u8 {
    fn from(stream: LogStream) -> u8 {
        stream as u8
    }
}

impl TryFrom<u8> for LogStream {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, String> {
        match value {
            0 => Ok(Self::Out),
            1 => Ok(Self::Err),
            other => Err(format!("unknown log stream: {other}")),
        }
    }
}

/// Completion status of a request. An empty `error` means success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(default)]
    pub error: String,
}

/// Buffered output captured from a command, interpreted as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub stream: LogStream,
    pub text: String,
}

/// Frames the executor sends to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Response {
    Result(CommandResult),
    Log(LogRecord),
}

// =============================================================================
// Codec
// =============================================================================

/// Receiving half of the codec, registered for one frame family `M`.
pub struct FrameReader<R, M> {
    reader: BufReader<R>,
    _frames: PhantomData<fn() -> M>,
}

impl<R, M> FrameReader<R, M>
where
    R: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            _frames: PhantomData,
        }
    }

    /// Blocks until a full frame arrives. Returns
    /// [`Error::ConnectionClosed`] on EOF and [`Error::MalformedFrame`] for
    /// anything outside the registered family.
    pub async fn receive(&mut self) -> Result<M> {
        let mut line = Vec::new();
        let read = self
            .reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(Error::Wire)?;
        if read == 0 {
            return Err(Error::ConnectionClosed);
        }
        if line.len() > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge {
                limit: MAX_FRAME_LEN,
            });
        }
        serde_json::from_slice(&line).map_err(|err| Error::MalformedFrame {
            reason: err.to_string(),
        })
    }
}

/// Sending half of the codec, registered for one frame family `M`.
///
/// Concurrent producers must share one writer behind a lock so frames never
/// interleave.
pub struct FrameWriter<W, M> {
    writer: W,
    _frames: PhantomData<fn() -> M>,
}

impl<W, M> FrameWriter<W, M>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            _frames: PhantomData,
        }
    }

    /// Encodes and writes one frame, flushing the underlying stream.
    pub async fn send(&mut self, frame: &M) -> Result<()> {
        let mut line = serde_json::to_vec(frame).map_err(|err| Error::EncodeFailed {
            reason: err.to_string(),
        })?;
        if line.len() > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge {
                limit: MAX_FRAME_LEN,
            });
        }
        line.push(b'\n');
        self.writer.write_all(&line).await.map_err(Error::Wire)?;
        self.writer.flush().await.map_err(Error::Wire)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tags() {
        let frame = Request::Execute(ExecuteRequest {
            command: "ls".to_string(),
        });
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"frame\":\"execute\""));
        assert_eq!(frame.kind(), "execute");

        let frame = Request::InitFromDocker(InitFromDockerRequest {
            image: "alpine".to_string(),
            tag: "3.18".to_string(),
        });
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"frame\":\"init_from_docker\""));
    }

    #[test]
    fn test_log_stream_codes() {
        assert_eq!(u8::from(LogStream::Out), 0);
        assert_eq!(u8::from(LogStream::Err), 1);
        assert_eq!(LogStream::try_from(0).unwrap(), LogStream::Out);
        assert!(LogStream::try_from(2).is_err());
    }
}
