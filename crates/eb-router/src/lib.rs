//! Event Bridge Router
//!
//! This crate provides the rule-driven dispatch core:
//! - template: path template placeholder counting and validation
//! - RuleRegistry: exact-match `(source, type)` rule store, immutable after startup
//! - resolve: turns a rule plus an event into a concrete backend request
//! - BackendClient / HttpBackend: performs backend calls over HTTP
//! - EventRouter: lookup, resolve, dispatch and outcome recording per event

pub mod backend;
pub mod registry;
pub mod resolve;
pub mod router;
pub mod template;

pub use backend::{BackendClient, HttpBackend, HttpBackendConfig};
pub use registry::RuleRegistry;
pub use resolve::{lookup_path, render_value, resolve_request};
pub use router::{EventRouter, RouteOutcome};
pub use template::{count_placeholders, placeholder_names, validate_path_template, TemplateMismatch};
