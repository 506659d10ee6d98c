//! Cascade Core
//!
//! Core types and abstractions for the Cascade pipeline-execution platform.
//!
//! This crate contains:
//! - Domain types: Core business entities (Job, PipelineRun, etc.)
//! - DTOs: Data transfer objects for inter-service communication
//! - Schedule handling: cron validation and next-occurrence computation
//! - Run parameter documents and pipeline parameter overlay

pub mod domain;
pub mod dto;
pub mod env;
pub mod params;
pub mod schedule;
