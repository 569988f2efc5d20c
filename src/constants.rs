//! Constants for the executor.
//!
//! All limits, timeouts, and protocol strings are defined here to ensure
//! consistency and prevent magic numbers throughout the codebase.

use std::time::Duration;

// =============================================================================
// Wire Protocol
// =============================================================================

/// Maximum encoded frame length (bytes), either direction.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Accumulated log bytes that trigger emission of a `Log` frame.
pub const LOG_FLUSH_THRESHOLD: usize = 100;

/// High-water mark for the log transmitter's buffer capacity. The buffer may
/// momentarily grow past this to hold one oversized write, but capacity is
/// clamped back after each transmit.
pub const LOG_BUFFER_HIGH_WATER: usize = 64 * 1024;

// =============================================================================
// Registry Endpoints
// =============================================================================

/// Docker Hub token endpoint base.
pub const DOCKER_AUTH_URL: &str = "https://auth.docker.io";

/// Docker Hub registry endpoint base.
pub const DOCKER_REGISTRY_URL: &str = "https://registry-1.docker.io";

/// Service name passed to the token endpoint.
pub const DOCKER_AUTH_SERVICE: &str = "registry.docker.io";

/// Accept header value for v2 image manifests.
pub const MANIFEST_V2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

// =============================================================================
// Retry Policy
// =============================================================================

/// Attempts for every registry operation.
pub const RETRY_ATTEMPTS: u32 = 10;

/// Delay between token request attempts.
pub const AUTH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Delay between manifest request attempts.
pub const MANIFEST_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Delay between layer download/apply attempts.
pub const BLOB_RETRY_DELAY: Duration = Duration::from_secs(10);

// =============================================================================
// Size Limits
// =============================================================================

/// Maximum size of a single compressed layer (512 MiB).
/// Prevents disk and memory exhaustion from malicious images.
pub const MAX_LAYER_SIZE: usize = 512 * 1024 * 1024;

// =============================================================================
// Sandbox Layout
// =============================================================================

/// Device nodes bind-mounted from the host into `dev/`.
pub const DEV_NODES: [&str; 5] = ["console", "null", "zero", "random", "urandom"];

/// Symlinks created inside `dev/`, in creation order (`fd` must exist before
/// the streams that point into it are meaningful to readers).
pub const DEV_LINKS: [(&str, &str); 4] = [
    ("fd", "/proc/self/fd"),
    ("stdin", "fd/0"),
    ("stdout", "fd/1"),
    ("stderr", "fd/2"),
];

/// Contents written to `etc/resolv.conf` after the pivot.
pub const RESOLV_CONF: &str = "nameserver 8.8.8.8\nnameserver 8.8.4.4\n";
