//! Identity provider core library crate.
//!
//! Issues, exchanges, refreshes, validates and revokes bearer credentials
//! for registered OAuth clients. HTTP handling lives outside this crate;
//! callers drive everything through [`oauth::OAuthFlowCoordinator`].

pub mod clock;
pub mod config;
pub mod errors;
pub mod oauth;
pub mod storage;
