//! Batch ETL pipeline for multi-source prospect data.
//!
//! Source adapters stage raw records per extraction batch; the pipeline
//! resolves them against canonical entities (three-tier identity
//! matching), gates them through a configurable quality-rules engine with
//! outlier detection and quarantine, commits the surviving writes
//! atomically and refreshes derived views. A stage orchestrator sequences
//! the outer stages with retry, timeout and failure-mode policy.

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod processing;
pub mod storage;
