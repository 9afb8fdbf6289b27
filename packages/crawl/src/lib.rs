#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Crawl-side inputs and outputs of the batch workload.
//!
//! * [`date_list`] reads the list of crawl dates and their segment counts.
//! * [`template`] turns the per-task command template into the command for
//!   one date.
//! * [`artifacts`] counts the worker's non-empty output files, which is the
//!   only evidence of finished work that does not come from the scheduler.

pub mod artifacts;
pub mod date_list;
pub mod template;

pub use crawl_runner_crawl_models as models;
