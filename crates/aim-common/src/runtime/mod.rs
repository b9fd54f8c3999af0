//! Inference runtime wire types
//!
//! The operator hands the serving workload to KServe; these are the parts
//! of the `InferenceService` resource it writes and reads back.

pub mod inference;
