//! HTTP surface: translation API and browser form

pub mod api;
pub mod page;
