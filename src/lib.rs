//! Stint segmentation, tyre degradation and pace normalisation over lap series.
//!
//! Every stage is a pure function of its input: filter the laps, cut them into
//! stints, fit a degradation trend per stint, normalise pace against a reference.
//! [`analysis::run`] drives those stages over a batch of events and drivers
//! described by an [`config::AnalysisConfig`].

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod filter;
pub mod model;
pub mod pace;
pub mod report;
pub mod sector;
pub mod stint;

pub use error::{AnalysisError, Result};
