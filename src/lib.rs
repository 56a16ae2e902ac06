// src/lib.rs

//! Source Ranker Library
//!
//! Keeps a bounded, periodically refreshed dataset of GitHub repositories
//! owned by developers in a region, and ranks them by influence.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod scoring;
pub mod services;
pub mod storage;
pub mod utils;
