pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod fingerprint;
pub mod http;
pub mod merge;
pub mod output;
pub mod staging;
pub mod tui;
