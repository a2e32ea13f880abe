//! Riskgate - Abuse-Aware Admission Control
//!
//! This crate admits or denies requests per actor with a token bucket and a
//! sliding window, backed either by process memory or by a shared Redis
//! store. Every decision is published as an event; a risk engine scores
//! actors from the denials and tightens their limits, rejecting them
//! outright once their score reaches the configured deny score.

pub mod config;
pub mod enforce;
pub mod error;
pub mod policy;
pub mod ratelimit;
pub mod risk;
