//! The cloud-batch dispatcher and background monitor (spec.md §4.3).

pub mod cloud_job;
pub mod gcp_auth;
pub mod gcp_client;
pub mod gcs_signer;
pub mod monitor;
pub mod schemas;
pub mod service;
pub mod signed_url;

pub use service::{router, DispatcherState};
