// src/lib.rs

//! ticketguru: issue-tracker ticket fetcher, store and scorer

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
