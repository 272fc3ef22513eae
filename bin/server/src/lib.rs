//! portcullis: an authenticating OAuth2 reverse proxy.
//!
//! Requests pass through [`app::router`]: proxy endpoints drive the OAuth2
//! sign-in flow, and everything else is forwarded to an upstream once the
//! request carries a valid session cookie (or accepted Basic-Auth
//! credentials).

#![allow(non_snake_case)]

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod pages;
pub mod signature;
pub mod upstream;
