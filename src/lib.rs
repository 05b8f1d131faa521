//! Selection, aggregation and comparison of repeated NFS performance
//! measurement runs ("traces"), as collected into a results
//! directory.

pub mod betterness;
pub mod bucket_def;
pub mod collection;
pub mod compare;
pub mod config;
pub mod config_file;
pub mod error;
pub mod fmt_util;
pub mod mountopts;
pub mod parse;
pub mod query;
pub mod selector;
pub mod stat;
pub mod stat_info;
pub mod trace_attrs;
pub mod trace_stats;
pub mod utillib;
