//! Target registry access: token discovery and manifest verification

pub mod auth;
pub mod verifier;

pub use auth::{Auth, AuthChallenge, parse_auth_challenge};
pub use verifier::{ImageVerifier, RegistryVerifier};
