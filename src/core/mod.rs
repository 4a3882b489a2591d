//! Core translation engine module

pub mod config;
pub mod errors;
pub mod hub;
pub mod marian;
pub mod models;
pub mod registry;
pub mod tokenizer;
