//! Offline-first caching and request routing for app-shell web apps.
//!
//! A [`worker::Worker`] receives lifecycle, fetch, sync, push and share events
//! and answers each with an outcome. Requests are classified by an ordered rule
//! table, served by one of four caching strategies over versioned cache
//! partitions, and fall back to an offline response when nothing else works.

pub mod cache;
pub mod clients;
pub mod config;
pub mod db;
pub mod event;
pub mod fallback;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod network;
pub mod push;
pub mod routing;
pub mod share;
pub mod strategy;
pub mod sync;
pub mod worker;

#[cfg(test)]
mod testing;
