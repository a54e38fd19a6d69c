//! Real-time field-crew tracking pipeline.
//!
//! The server binary runs the multi-tenant transport hub with its
//! HTTP/WebSocket surface; the library additionally exposes the
//! device-side ingestion agent ([`agent`]) and the viewer-side live-state
//! components ([`live`]) that consume the hub's event stream.

pub mod agent;
pub mod api;
pub mod config;
pub mod geo;
pub mod hub;
pub mod live;
pub mod models;
pub mod providers;
pub mod tracking;
