//! Errors that indicate that a collaborator handed the engine data
//! violating its contract. These are never turned into per-trace
//! warnings: loading a collection stops when one is encountered.

use std::path::PathBuf;

use anyhow::Error;

use crate::{stat::RunId, stat_info::StatInfo};

#[derive(thiserror::Error, Debug)]
pub enum ContractViolation {
    #[error("stat {stat:?}: run {run_id:?} was already added")]
    DuplicateRun { stat: String, run_id: RunId },

    #[error("stat {stat:?}: value from file {new:?}, but earlier values came from {old:?}")]
    FilenameMismatch {
        stat: String,
        old: String,
        new: String,
    },

    #[error("bucket {bucket:?}: stat {stat:?} comes from file {new:?}, other members from {old:?}")]
    BucketFilenameMismatch {
        bucket: String,
        stat: String,
        old: String,
        new: String,
    },

    #[error("info mismatch for {key:?}: {old:?} != {new:?}")]
    InfoMismatch {
        key: String,
        old: StatInfo,
        new: StatInfo,
    },

    #[error("unhandled tracedir_version {version:?} in {path:?}")]
    UnknownVersion { path: PathBuf, version: String },

    #[error("invalid trace key in {path:?}: {selector}")]
    InvalidKey { path: PathBuf, selector: String },

    #[error(
        "trace {selector}: statbin {statbin:?} has {runs} runs, \
         but {other_statbin:?} has {other_runs}"
    )]
    RunCountMismatch {
        selector: String,
        statbin: String,
        runs: usize,
        other_statbin: String,
        other_runs: usize,
    },
}

/// Whether `e` (or anything in its context chain) is a
/// `ContractViolation`.
pub fn is_contract_violation(e: &Error) -> bool {
    e.chain()
        .any(|cause| cause.downcast_ref::<ContractViolation>().is_some())
}
