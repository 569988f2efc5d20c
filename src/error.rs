//! Error types for the executor.

use std::path::PathBuf;

/// Result type alias for executor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the executor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Wire Protocol Errors
    // =========================================================================
    /// Peer closed the stream. This is the clean-shutdown signal.
    #[error("connection closed")]
    ConnectionClosed,

    /// Frame exceeds the wire size limit.
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// Frame could not be encoded.
    #[error("frame encoding failed: {reason}")]
    EncodeFailed { reason: String },

    /// Frame could not be decoded (unknown tag, bad JSON). Fatal: the stream
    /// position is lost and no further frames can be trusted.
    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: String },

    /// A frame arrived out of protocol order.
    #[error("expected {expected} frame, got {got}")]
    UnexpectedFrame {
        expected: &'static str,
        got: &'static str,
    },

    /// I/O error on the wire streams.
    #[error("wire i/o error: {0}")]
    Wire(#[source] std::io::Error),

    // =========================================================================
    // Sandbox Errors
    // =========================================================================
    /// The sandbox can only be constructed once per process.
    #[error("sandbox already built")]
    SandboxAlreadyBuilt,

    /// A mount, pivot, or chroot step failed. The mount namespace is assumed
    /// unrecoverable after this.
    #[error("{op} failed: {reason}")]
    Sandbox { op: String, reason: String },

    /// A path escaped the new root via `..` components.
    #[error("path escapes the root filesystem: {path}")]
    PathTraversal { path: String },

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// The HTTP client could not be constructed.
    #[error("building http client failed: {0}")]
    HttpClient(String),

    /// A registry request failed at the transport level.
    #[error("registry request to {url} failed: {reason}")]
    RegistryRequest { url: String, reason: String },

    /// The registry answered with a non-200 status.
    #[error("unexpected response status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    /// The token endpoint returned neither `token` nor `access_token`.
    #[error("no token in auth response")]
    MissingToken,

    /// The downloaded blob does not hash to the manifest digest.
    #[error("layer digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    /// A layer blob exceeds the size limit.
    #[error("layer {digest} exceeds size limit: {size} > {limit} bytes")]
    LayerTooLarge {
        digest: String,
        size: usize,
        limit: usize,
    },

    // =========================================================================
    // Layer Application Errors
    // =========================================================================
    /// Applying a layer archive onto the filesystem failed.
    #[error("applying layer {digest} failed: {reason}")]
    LayerApplyFailed { digest: String, reason: String },

    /// The archive contains an entry type we do not materialize.
    #[error("unsupported tar entry type {kind} at {path}")]
    UnsupportedEntryType { path: String, kind: String },

    /// A link entry is missing its target name.
    #[error("tar entry {path} has no link target")]
    MissingLinkTarget { path: String },

    // =========================================================================
    // Request-Local Errors
    // =========================================================================
    /// The shell command exited unsuccessfully.
    #[error("command failed: {status}")]
    CommandFailed { status: std::process::ExitStatus },

    /// Recursive copy failed.
    #[error("copying {path} failed: {reason}")]
    CopyFailed { path: PathBuf, reason: String },

    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),

    /// Marker wrapper: the inner error is worth retrying. Produced at the
    /// error source, consumed by [`crate::retry::retry`].
    #[error(transparent)]
    Retryable(Box<Error>),
}

impl Error {
    /// Wraps the error in the retryable marker. Idempotent.
    pub fn retryable(self) -> Self {
        match self {
            err @ Error::Retryable(_) => err,
            err => Error::Retryable(Box::new(err)),
        }
    }

    /// Whether the retry helper should try the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Retryable(_))
    }

    /// Strips the retryable marker, surfacing the underlying error.
    pub fn into_inner(self) -> Self {
        match self {
            Error::Retryable(inner) => *inner,
            err => err,
        }
    }
}
