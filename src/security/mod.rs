//! Cross-origin request rules.
//!
//! - [`CorsCheck`]: `Origin` stamping, preflight construction, and
//!   `Access-Control-*` validation on the client side.

pub mod cors;

pub use cors::CorsCheck;
