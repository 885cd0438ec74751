// src/lib.rs

//! Random-record archiver library.
//!
//! Fetches random dictionary entries, drops ids already archived and files
//! each new record into a per-day view and a per-letter view.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
