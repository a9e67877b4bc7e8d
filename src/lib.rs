//! Quotaguard - Admission Control for API Gateways
//!
//! This crate decides whether an incoming API request may proceed. Requests
//! are grouped into buckets along a configurable dimension (source IP, user,
//! API key, HTTP method, endpoint, or one global bucket) and counted in a
//! sliding window, either in-process or in Redis so that every gateway
//! instance shares the same quota. IP-keyed traffic can additionally pass
//! through a DDoS guard that bans sources flooding the service.

pub mod access;
pub mod clock;
pub mod config;
pub mod ddos;
pub mod error;
pub mod ratelimit;
