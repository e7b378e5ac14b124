//! Keycloak session bootstrapper
//!
//! Establishes a Keycloak session on page load, mirrors the authorization
//! callback parameters into cookies, lands authenticated users on the
//! dashboard, and chains the perimeter logoff into Keycloak logout.

pub mod auth;
pub mod bootstrap;
pub mod callback;
pub mod config;
pub mod cookies;
pub mod error;
pub mod health;
pub mod logging;
pub mod logout;
pub mod page;
pub mod server;
