//! # LocalDB Bootstrap
//!
//! Lazily brings up the embedded LocalDB engine and shares one database
//! handle with every consumer in the process.
//!
//! This crate provides:
//! - A loading state machine (idle → dependencies → wasm → compile →
//!   initializing → ready, or error)
//! - Concurrent dependency resolution with progress reporting
//! - Streamed, progress-tracked download of the engine image
//! - Off-runtime compilation of the image with wasmtime
//! - Filesystem adapter selection (volatile or durable)
//! - A lazy facade that defers the "not initialized" check to first use
//!
//! ## Architecture
//!
//! One [`BootstrapManager`] is created at process start and passed to
//! consumers. [`BootstrapManager::initialize`] runs at most one bootstrap at
//! a time: concurrent callers share the in-flight task and its outcome.
//! A failed attempt clears the task so the next call starts fresh.
//!
//! ## Key Invariants
//!
//! - The handle is set at most once per manager
//! - Subscribers observe transitions in the order the manager made them
//! - The last progress event of each phase reports 100 and carries the
//!   elapsed time
//! - Nothing from a failed attempt is reused by the next one

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compile;
mod config;
mod download;
mod engine;
mod environment;
mod error;
mod facade;
mod handle;
mod journal;
mod manager;
mod migrate;
mod modules;
mod observer;
mod progress;
mod schema;
mod source;
mod state;

pub use compile::{compile_image, CompiledModule, WasmCompiler, WasmtimeCompiler};
pub use config::{BootstrapConfig, DEFAULT_DATABASE_NAME, DEFAULT_WASM_URL};
pub use download::{fetch_image, DownloadedImage};
pub use engine::{
    EngineBinding, EngineClient, EngineError, EngineOptions, EngineResult, Extension, Filter,
    Outcome, Row, Statement, VectorExtension,
};
pub use environment::{FsAdapterFactory, HostEnvironment, StandardAdapters, DATA_DIR_ENV};
pub use error::{BootstrapError, BootstrapResult};
pub use facade::LazyDatabase;
pub use handle::{DatabaseHandle, OrmBinding, SchemaOrm, Transaction};
pub use journal::JournalEngine;
pub use manager::{BootstrapManager, ManagerBuilder, Subscription};
pub use migrate::MigrationReport;
pub use modules::{Dependencies, ModuleKind, ModuleResolver, ResolvedModule, StaticResolver};
pub use observer::{ObservedEvent, RecordingObserver, StateCallbacks, StateObserver, SubscriptionId};
pub use progress::{Phase, PhaseProgress, ProgressEvent};
pub use schema::{Schema, TableDef};
pub use source::{
    source_for_config, ChunkStream, FileSource, HttpSource, ImageResponse, ImageSource,
    MockSource,
};
pub use state::LoadingState;

pub use localdb_fs::{AdapterKind, Durability};
