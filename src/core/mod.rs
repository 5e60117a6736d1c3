//! Core types shared by the client, the store implementations and the pipeline

#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod error;
pub mod value;
