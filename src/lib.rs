//! Parallel remote command and file-mirroring dispatch.
//!
//! Volley runs one shell command, or one rsync transfer, across a list of hosts. It is built from
//! these layers, leaves first:
//!
//! 1. [session]: drives one `ssh` or `rsync` process on a pseudo-terminal, answering password
//!    prompts and recovering the remote exit status.
//!
//! 1. [pool]: runs sessions on a bounded set of workers, each with a hard timeout.
//!
//! 1. [run_batch]: fans a request out over every host in waves, reports each result in host
//!    order, and decides whether the batch as a whole succeeded.
//!
//! The `volley` and `volley-rsync` binaries add argument parsing ([cli]), defaults files
//! ([config]) and logging ([logger]) around [Batch].

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logger;
pub mod pool;
pub mod run_batch;
pub mod session;

#[doc(inline)]
pub use error::{Error, Result};

#[doc(inline)]
pub use run_batch::Batch;
