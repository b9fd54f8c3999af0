//! AIMService reconciliation for AIM
//!
//! Each pass runs Fetch → Observe → Plan → Project:
//!
//! - **Fetch** ([`fetch`]): concurrent reads of every dependency
//! - **Observe** ([`pipeline::observe`]): pure per-domain decisions for
//!   config, model, template, caching, runtime and routing
//! - **Plan** ([`plan`]): object bodies to apply and delete
//! - **Project** ([`pipeline::project`]): conditions and phase for status
//!
//! [`controller`] wires the stages to the API server.

pub mod caching;
pub mod config;
pub mod controller;
pub mod fetch;
pub mod health;
pub mod model;
pub mod pipeline;
pub mod plan;
pub mod routing;
pub mod runtime;
pub mod selection;
pub mod template;

pub use config::ReconcilePolicy;
pub use controller::{error_policy, reconcile, AimServiceContext, AimServiceKubeClient};
