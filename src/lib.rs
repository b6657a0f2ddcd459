//! docpreview - document preview conversion engine
//!
//! Converts office documents, text and images into browser-friendly previews
//! (pdf, html, images) through pluggable converter backends, with an on-disk cache
//! per previewed object.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod mime;
pub mod registry;
pub mod setup;
pub mod store;
pub mod worker;
