//! Integration tests for lossy
//!
//! Socket tests drive real loopback UDP and TCP connections through the
//! impairing adapters. Statistical tests use the recording transport with
//! fixed seeds so loss and jitter can be measured without kernel buffers
//! getting in the way.

#[path = "integration/common.rs"]
mod common;

#[path = "integration/socket_impairment.rs"]
mod socket_impairment;

#[path = "integration/socket_errors.rs"]
mod socket_errors;

#[path = "integration/impairment_statistics.rs"]
mod impairment_statistics;
