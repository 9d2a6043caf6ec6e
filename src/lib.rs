#![forbid(unsafe_code)]

pub mod app;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod dataset;
pub mod documents;
pub mod error;
pub mod fetch;
pub mod formats;
pub mod logging;
pub mod sanitize;
pub mod scrape;
pub mod store;
pub mod tables;
pub mod tokenizer;

pub use error::{Error, Result};
