//! Platform Event Log daemon library
//!
//! Exposes the PEL binary codec, message-registry-driven assembler,
//! repository, host notifier, and HTTP/WebSocket bus object surface for
//! both the `pel-logd` binary and the `openapi_dump` tool.

pub mod api;
pub mod ascii_string;
pub mod bcd;
pub mod config;
pub mod data_interface;
pub mod device_callouts;
pub mod error;
pub mod event_log;
pub mod extensions;
pub mod host_notifier;
pub mod log_id;
pub mod manager;
pub mod pel;
pub mod pel_values;
pub mod registry;
pub mod repository;
pub mod sections;
pub mod service;
pub mod src_builder;
pub mod stream;
pub mod tracing_layer;
