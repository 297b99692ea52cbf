//! # teambot (library root)
//!
//! Core plumbing for the **teambot** chat-assistant server:
//! - Persistent Socket-Mode WebSocket transport to a team chat workspace
//!   ([`transport`]).
//! - A privacy-tiered embedding pipeline routing text to a local TF-IDF /
//!   averaged-word-vector embedder or an external embedding API
//!   ([`privacy`], [`embedder`]).
//! - A `sled`-backed vector store with an LSH approximate-search index and a
//!   metadata index for exact/range/text filters ([`store`], [`lsh`],
//!   [`metaindex`], [`vectordb`]).
//! - Bounded per-channel conversation memory ([`memory`]).
//! - An LLM chat-completion client with retry and cost tracking ([`llm`]).
//! - Response generation and action-intent parsing ([`responder`]).
//! - Event orchestration wiring all of the above together
//!   ([`orchestrator`]).
//!
//! ## Modules
//! - [`error`], [`config`], [`vecmath`], [`kvcodec`], [`store`], [`lsh`],
//!   [`text`], [`metaindex`], [`vectordb`], [`embedder`], [`privacy`],
//!   [`memory`], [`llm`], [`responder`], [`transport`], [`orchestrator`],
//!   [`stats`]

use directories::ProjectDirs;
use std::error::Error;

pub mod config;
pub mod embedder;
pub mod error;
pub mod kvcodec;
pub mod llm;
pub mod lsh;
pub mod memory;
pub mod metaindex;
pub mod orchestrator;
pub mod privacy;
pub mod responder;
pub mod stats;
pub mod store;
pub mod text;
pub mod transport;
pub mod vecmath;
pub mod vectordb;

/// Return the per-platform configuration directory used by teambot.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "awful-sec", "teambot")`, so you get the right place on each OS
/// (e.g., `~/Library/Application Support/com.awful-sec.teambot` on macOS).
///
/// The directory is **not** created by this function; callers that need it
/// should create it with `fs::create_dir_all`.
pub fn config_dir() -> Result<std::path::PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "awful-sec", "teambot")
        .ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
