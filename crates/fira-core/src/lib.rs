//! fira-core: Core library for fira
//!
//! This crate drives two FiRA UWB devices, an initiator and a responder,
//! through ranging session lifecycles and checks that they find each other.
//!
//! # Architecture
//!
//! ```text
//! Scenario → RangingPair → UwbDevice (registry) → RangingSession
//!                                 ↓                      ↓
//!                            DeviceFacade  ──events──→ EventStream
//! ```
//!
//! # Modules
//!
//! - `params`: ranging parameters, wire encodings and profiles
//! - `event` / `event_stream`: callback events and the per-key buffered stream
//! - `facade`: the device RPC surface (`DeviceFacade`)
//! - `session`: per-session lifecycle state machine
//! - `device`: per-device session registry
//! - `verifier`: peer discovery outcome
//! - `adapter`: airplane mode, UWB toggle and adapter-state callbacks
//! - `scenarios`: fixed two-party scenarios
//! - `sim`: in-process simulated radio field
//! - `config`: `fira.toml` configuration
//! - `logging`: tracing subscriber setup
//! - `wait`: bounded polling with backoff
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod adapter;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod event_stream;
pub mod facade;
pub mod logging;
pub mod params;
pub mod scenarios;
pub mod session;
pub mod sim;
pub mod verifier;
pub mod wait;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
