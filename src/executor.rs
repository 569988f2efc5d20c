//! The executor server: sandbox setup, request dispatch, log streaming.
//!
//! The process reads [`Request`] frames from stdin and writes [`Response`]
//! frames to stdout. The first frame must be [`Config`]; it drives sandbox
//! construction exactly once. Every later frame is a request answered with
//! exactly one `Result` frame, in order, possibly preceded by `Log` frames.
//!
//! Shutdown paths: EOF on stdin, SIGTERM, or SIGINT all exit cleanly. Every
//! blocking point in the dispatch loop is raced against the signal streams
//! with `tokio::select!`. An in-flight shell command is killed on
//! cancellation via `kill_on_drop`; an in-flight request produces no
//! `Result`.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::Command;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::constants::{LOG_BUFFER_HIGH_WATER, LOG_FLUSH_THRESHOLD};
use crate::error::{Error, Result};
use crate::registry::RegistryClient;
use crate::wire::{
    CommandResult, CopyRequest, FrameReader, FrameWriter, LogRecord, LogStream, Request, Response,
};
use crate::{copy, image, sandbox};

/// Shared sending half of the wire. One lock serializes all producers
/// (both log transmitters and the dispatch loop's `Result` frames).
pub type ResponseSender<W> = Arc<Mutex<FrameWriter<W, Response>>>;

// =============================================================================
// Log Transmitter
// =============================================================================

/// Buffers one output stream of a command and forwards it as `Log` frames.
///
/// Bytes accumulate until the buffer reaches [`LOG_FLUSH_THRESHOLD`], then go
/// out as a single frame. [`flush`](Self::flush) drains the residue. Byte
/// order within the stream is preserved; interleaving with the other stream's
/// transmitter is not defined.
pub struct LogTransmitter<W> {
    stream: LogStream,
    sender: ResponseSender<W>,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> LogTransmitter<W> {
    pub fn new(stream: LogStream, sender: ResponseSender<W>) -> Self {
        Self {
            stream,
            sender,
            buf: Vec::new(),
        }
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.buf.len() + data.len() < LOG_FLUSH_THRESHOLD {
            self.buf.extend_from_slice(data);
            return Ok(());
        }
        self.buf.extend_from_slice(data);
        self.transmit().await
    }

    pub async fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.transmit().await
    }

    async fn transmit(&mut self) -> Result<()> {
        let text = String::from_utf8_lossy(&self.buf).into_owned();
        self.sender
            .lock()
            .await
            .send(&Response::Log(LogRecord {
                stream: self.stream,
                text,
            }))
            .await?;
        self.buf.clear();
        if self.buf.capacity() > LOG_BUFFER_HIGH_WATER {
            self.buf.shrink_to(LOG_BUFFER_HIGH_WATER);
        }
        Ok(())
    }
}

// =============================================================================
// Shell Runner
// =============================================================================

/// Runs `/bin/sh -c <command>` with stdout/stderr wired to two log
/// transmitters. All log frames are on the wire before this returns, so the
/// caller's `Result` frame always comes last.
pub async fn execute_command<W>(command: &str, sender: &ResponseSender<W>) -> Result<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal("child stdout not captured".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Internal("child stderr not captured".into()))?;

    let out_pump = tokio::spawn(pump(
        stdout,
        LogTransmitter::new(LogStream::Out, Arc::clone(sender)),
    ));
    let err_pump = tokio::spawn(pump(
        stderr,
        LogTransmitter::new(LogStream::Err, Arc::clone(sender)),
    ));

    let status = child.wait().await?;

    out_pump
        .await
        .map_err(|err| Error::Internal(format!("stdout pump failed: {err}")))??;
    err_pump
        .await
        .map_err(|err| Error::Internal(format!("stderr pump failed: {err}")))??;

    if status.success() {
        Ok(())
    } else {
        Err(Error::CommandFailed { status })
    }
}

async fn pump<R, W>(mut source: R, mut logs: LogTransmitter<W>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        let read = source.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        logs.write(&chunk[..read]).await?;
    }
    logs.flush().await
}

// =============================================================================
// Dispatch Loop
// =============================================================================

/// Runs the executor server over the process's stdin/stdout until the host
/// hangs up or a fatal protocol/sandbox error occurs.
pub async fn run() -> Result<()> {
    // The HTTP client reads CA certificates from the host trust store, which
    // is unreachable once the root is pivoted. Build it first.
    let registry = RegistryClient::docker_hub()?;

    let mut receiver: FrameReader<_, Request> = FrameReader::new(tokio::io::stdin());
    let sender: ResponseSender<tokio::io::Stdout> =
        Arc::new(Mutex::new(FrameWriter::new(tokio::io::stdout())));

    let first = receiver.receive().await?;
    let config = match first {
        Request::Config(config) => config,
        other => {
            return Err(Error::UnexpectedFrame {
                expected: "config",
                got: other.kind(),
            });
        }
    };

    let _chroot_guard = if config.chroot {
        Some(sandbox::enter_chroot(Path::new("."))?)
    } else {
        sandbox::build(&config.mounts)?;
        None
    };
    info!(
        chroot = config.chroot,
        mounts = config.mounts.len(),
        "sandbox ready"
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        let request = tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                return Ok(());
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                return Ok(());
            }
            received = receiver.receive() => match received {
                Ok(request) => request,
                Err(Error::ConnectionClosed) => {
                    info!("input closed, shutting down");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        };

        // Config is one-shot; a second one is a protocol error, not a
        // request-local failure.
        if matches!(request, Request::Config(_)) {
            return Err(Error::UnexpectedFrame {
                expected: "request",
                got: "config",
            });
        }

        let outcome = tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM mid-request, shutting down");
                return Ok(());
            }
            _ = sigint.recv() => {
                info!("received SIGINT mid-request, shutting down");
                return Ok(());
            }
            outcome = handle_request(request, &sender, &registry) => outcome,
        };

        let error = match outcome {
            Ok(()) => String::new(),
            Err(err) => {
                warn!(error = %err, "request failed");
                err.to_string()
            }
        };
        sender
            .lock()
            .await
            .send(&Response::Result(CommandResult { error }))
            .await?;
    }
}

async fn handle_request<W>(
    request: Request,
    sender: &ResponseSender<W>,
    registry: &RegistryClient,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    match request {
        Request::Execute(req) => execute_command(&req.command, sender).await,
        Request::Copy(CopyRequest { src, dst }) => {
            tokio::task::spawn_blocking(move || copy::copy_tree(&src, &dst))
                .await
                .map_err(|err| Error::Internal(format!("copy task failed: {err}")))?
        }
        Request::InitFromDocker(req) => {
            image::init_from_docker(registry, Path::new("."), &req.image, &req.tag).await
        }
        // Rejected by the caller before dispatch.
        Request::Config(_) => Err(Error::UnexpectedFrame {
            expected: "request",
            got: "config",
        }),
    }
}
