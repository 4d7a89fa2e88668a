//! Holdgate - Access Gate and Abuse Limiter
//!
//! This crate implements an access-gate and abuse-limiter middleware that
//! sits in front of a protected request-processing pipeline. Per caller
//! identity it enforces two independent time-windowed policies: an
//! explicit-entitlement gate that opens for a fixed TTL after a "ready"
//! signal, and a sliding-window rate limiter that imposes a temporary ban
//! once a threshold is exceeded. State lives either in-process or in a
//! shared Redis store for multi-instance deployments.

pub mod config;
pub mod error;
pub mod gate;
pub mod http;
