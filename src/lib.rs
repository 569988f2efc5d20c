//! # cloister
//!
//! **Container-style command isolation for Linux**
//!
//! A host process spawns the `cloister-executor` binary inside fresh
//! namespaces, chrooted into a directory that holds the future root
//! filesystem. The executor prepares an isolated root (proc, tmp, dev, host
//! binds, pivot_root), then services a framed request stream on its
//! stdin/stdout: run shell commands, copy paths, or populate the root from a
//! Docker Hub image.
//!
//! ```text
//! ┌────────────┐  Config, Execute, Copy, InitFromDocker   ┌──────────────┐
//! │    host    │ ───────────────────────── stdin ───────► │   executor   │
//! │ (spawns in │                                          │  (pivoted    │
//! │ namespaces)│ ◄──────────────────────── stdout ─────── │   root)      │
//! └────────────┘            Log*, Result                  └──────────────┘
//! ```
//!
//! # Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`wire`] | Tag-discriminated, newline-delimited JSON framing |
//! | [`mounts`] | Typed wrappers over `mount(2)` / `pivot_root(2)` |
//! | [`sandbox`] | Root preparation sequence and chroot mode |
//! | [`registry`] | Anonymous Docker Hub pulls (token, manifest, blobs) |
//! | [`image`] | Layer application with whiteouts and digest checks |
//! | [`copy`] | Recursive copy preserving times and ownership |
//! | [`executor`] | Dispatch loop, shell runner, log streaming |
//! | [`retry`] | Bounded retries for operations marked retryable |
//!
//! # Scope
//!
//! Process launching, namespace creation (`CLONE_NEW*`), and network
//! interface setup belong to the host and are out of scope here. The executor
//! presumes the capabilities needed for `mount`, `pivot_root`, and `chown`.
//! Linux only.

pub mod constants;
pub mod copy;
pub mod error;
pub mod executor;
pub mod image;
pub mod mounts;
pub mod registry;
pub mod retry;
pub mod sandbox;
pub mod wire;

pub use error::{Error, Result};
pub use registry::RegistryClient;
pub use wire::{Config, Mount, Request, Response};
