//! Fork discovery on an API budget
//!
//! # Overview
//!
//! Popular repositories have thousands of forks and most of them never receive a single commit.
//! Comparing every fork against its parent costs one API call per fork, which quickly exhausts the hourly quota.
//!
//! Library lists forks of a repository and qualifies each of them from listing metadata alone.
//! A fork whose last push is not later than its creation can have no commits of its own and is skipped without
//! spending a call. Only the remaining forks are compared against the parent.
//!
//! Every call goes through a resilient transport which retries rate limited and transient failures with
//! exponential backoff and trips a circuit breaker after repeated failures.
//! Repository metadata is cached for a short time, so the parent is looked up once per run, not once per fork.
//!
//! The `api` feature exposes only the client facing types, the `discovery` feature (default) the whole pipeline.

pub mod api;
pub mod model;
pub mod qualification;

#[cfg(feature = "discovery")]
pub mod cache;
#[cfg(feature = "discovery")]
pub mod discovery;
#[cfg(feature = "discovery")]
pub mod fetcher;
#[cfg(feature = "discovery")]
pub mod gateway;
#[cfg(feature = "discovery")]
pub mod resilience;

#[cfg(all(test, feature = "discovery"))]
mod testing;
