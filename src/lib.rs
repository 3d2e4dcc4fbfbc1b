//! # pwrctl Library
//!
//! Host-side control of the camera power controller over its serial link.
//!
//! This library provides the framing codec, the single-outstanding-request
//! command engine, typed controller commands, the firmware update procedure
//! and the local telemetry socket service.

pub mod config;
pub mod controller;
pub mod error;
pub mod firmware;
pub mod link;
pub mod pwrcmd;
pub mod serial;
pub mod telemetry;
