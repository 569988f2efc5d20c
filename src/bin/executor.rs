//! Sandbox executor process.
//!
//! Reads framed requests on stdin, writes framed responses on stdout; stderr
//! carries the executor's own diagnostics. The host is expected to start this
//! binary chrooted into the root-holding directory, inside fresh mount, PID,
//! network, UTS, and IPC namespaces.

use std::process::ExitCode;

use tracing::{Level, error};
use tracing_subscriber::FmtSubscriber;

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // stdout is the wire; diagnostics must stay on stderr.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to set tracing subscriber");
        return ExitCode::from(EXIT_FAILURE);
    }

    match cloister::executor::run().await {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(err) => {
            error!(error = %err, "executor failed");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
