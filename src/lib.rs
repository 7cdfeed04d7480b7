//! # Runtime control library
//!
//! Provisions, probes, invokes and tears down serverless runtimes deployed as revisioned services on
//! a Kubernetes cluster. The `runtime-control` binary is a thin consumer of this library.

pub mod backend;
pub mod build_tool;
pub mod config;
pub mod invoker;
pub mod k8s;
pub mod logging;
pub mod metadata_store;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
