//! Voxpool: shared speech model manager and STT bridge
//!
//! This library provides the core functionality for:
//! - Loading heavyweight speech backends once and sharing them between requests
//! - Pooling local whisper instances across accelerators (round-robin)
//! - Routing speech-to-text to a remote bridge or the local pool
//! - Selecting a language-model provider with ordered fallback
//! - Resolving voice profiles for speech synthesis (builtin + SQLite-backed)
//!
//! # Architecture
//!
//! ```text
//!                            ┌─────────────────────────────────────┐
//!                            │            ModelManager             │
//!                            └─────────────────────────────────────┘
//!                                            │
//!        ┌──────────────────┬────────────────┼────────────────┬──────────────────┐
//!        │                  │                │                │                  │
//!        ▼                  ▼                ▼                ▼                  ▼
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │   Registry   │  │    Loader    │  │    Router    │  │    Voices    │  │ Connections  │
//! │ (slots, one  │  │  (factory +  │  │ (remote vs   │  │ (builtin +   │  │  (counter)   │
//! │  load each)  │  │  fallbacks)  │  │   local)     │  │   SQLite)    │  │              │
//! └──────────────┘  └──────────────┘  └──────────────┘  └──────────────┘  └──────────────┘
//!                           │                 │
//!            ┌──────────────┼─────────┐       ├──────────────────┐
//!            ▼              ▼         ▼       ▼                  ▼
//!     ┌────────────┐ ┌──────────┐ ┌────────┐ ┌──────────────┐ ┌──────────────┐
//!     │ LLM client │ │ Enhancers│ │ SoVITS │ │ Remote STT   │ │ Transcriber  │
//!     │ (ureq)     │ │ (ja, en) │ │ client │ │ (multipart)  │ │ Pool         │
//!     └────────────┘ └──────────┘ └────────┘ └──────────────┘ └──────────────┘
//!                                                                     │
//!                                                          cuda:0 … cuda:N / cpu
//!                                                                     ▼
//!                                                             ┌──────────────┐
//!                                                             │   Whisper    │
//!                                                             │ (whisper-rs) │
//!                                                             └──────────────┘
//! ```
//!
//! The HTTP bridge in [`service`] exposes the manager to other processes.

pub mod cli;
pub mod config;
pub mod connections;
pub mod device;
pub mod error;
pub mod llm;
pub mod loader;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod router;
pub mod service;
pub mod store;
pub mod synthesis;
pub mod transcribe;
pub mod voice;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use error::{Result, VoxpoolError};
pub use manager::{ManagerStatus, ModelManager};
pub use registry::{Handle, ResourceHandle, ResourceKind};
pub use transcribe::{TranscribeOptions, Transcription};
