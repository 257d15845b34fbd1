//! PhotoApp
//!
//! Image storage that keeps bytes in S3, metadata in MySQL and labels from
//! Rekognition consistent enough to use, without a distributed transaction
//! coordinator.
//!
//! ## Features
//!
//! - **Ordered cross-store writes**: objects are written before the rows that
//!   reference them and rows are truncated before their objects are deleted,
//!   so the only inconsistency is an unreferenced object, which is logged
//! - **Best-effort labeling**: label detection and label storage run after
//!   the asset exists and never fail an upload
//! - **Bounded retry**: every store call is retried on transient failures
//!   with capped exponential backoff
//! - **Scoped transactions**: each database unit of work runs on its own
//!   connection and is committed or rolled back before the connection closes
//!
//! ## Architecture
//!
//! ```text
//!                        ┌──────────────┐
//!                        │ PhotoApp     │
//!                        │ upload       │
//!                        │ download     │
//!                        │ delete_all   │
//!                        │ ping         │
//!                        └──────────────┘
//!                               │
//!                               ▼
//!                        ┌──────────────┐
//!                        │ RetryPolicy  │
//!                        └──────────────┘
//!          ┌────────────────────┼────────────────────┐
//!          ▼                    ▼                    ▼
//! ┌──────────────┐       ┌──────────────┐     ┌──────────────┐
//! │ ObjectStore  │       │ Metadata     │     │ Label        │
//! │ (S3)         │       │ Store (MySQL)│     │ Detector     │
//! └──────────────┘       └──────────────┘     │ (Rekognition)│
//!                               │             └──────────────┘
//!                               ▼
//!                        ┌──────────────┐
//!                        │ Database     │
//!                        │ scoped tx    │
//!                        └──────────────┘
//! ```

pub mod app;
pub mod config;
pub mod download;
pub mod error;
pub mod health;
pub mod label_detector;
pub mod metadata_store;
pub mod models;
pub mod object_store;
pub mod purge;
pub mod retry;
pub mod transaction;
pub mod upload;

pub use app::PhotoApp;
pub use config::Config;
pub use error::{Error, ErrorKind, LabelStage, Result, Store};
pub use health::{HealthReport, ProbeResult};
pub use label_detector::{LabelDetector, RekognitionLabels};
pub use metadata_store::{MetadataStore, MySqlMetadataStore};
pub use models::{Asset, AssetLabel, AssetLocation, DetectedLabel, LabelMatch, NewAsset, User};
pub use object_store::{BatchDeleteReport, ObjectStore, S3ObjectStore};
pub use purge::DeleteSummary;
pub use retry::RetryPolicy;
pub use transaction::Database;
