//! `ledgercheck-recon`: standardize practitioner billing exports and
//! reconcile them against a reference ledger.
//!
//! Engine crate: scans source folders, normalizes and aggregates tables,
//! and compares the result with the reference. File formats live behind
//! [`TableStore`]; no CLI dependencies.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod model;
pub mod normalize;
pub mod period;
pub mod reconcile;
pub mod scan;
pub mod store;

pub use config::PipelineConfig;
pub use engine::run;
pub use error::ReconError;
pub use model::{CellValue, FileKind, RunReport, SystemReport, Table};
pub use store::TableStore;
