//! Pkgferry - console package inspection and resumable upload
//!
//! This library crate wires the package parsers and the upload loop to the
//! installer's HTTP API and exposes them for the binary and for integration
//! testing.

pub mod client;
pub mod config;
pub mod service;

pub use client::HttpInstaller;
pub use service::PackageUploader;
