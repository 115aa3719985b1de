//! Client for the Del Match ordering API.
//!
//! Covers the three things the CRM needs from it: validating a store domain,
//! exchanging the owner's credentials for a bearer token, and pulling order
//! objects, either the recent feed or a configured historical export. The
//! orders are handed to the core ingestion pipeline through [`DelMatchSource`],
//! which implements [`guru_core::ingest::OrderSource`].

pub mod client;
pub mod connect;
pub mod domain;
pub mod error;
pub mod source;
pub mod token;

pub use client::{AccessToken, DelMatchClient};
pub use connect::{connect_integration, ConnectRequest};
pub use domain::normalize_base_url;
pub use error::DelMatchError;
pub use source::{sync_integration, DelMatchSource};
pub use token::TokenProvider;
