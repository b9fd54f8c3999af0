//! Network type definitions for Gateway API
//!
//! Types for generating the HTTPRoute that exposes an inference service
//! through a shared gateway.

pub mod gateway_api;
