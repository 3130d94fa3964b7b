//! Page-level HTTP response caching over a TTL key-value store, with a small
//! cookbook site wired through it.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
