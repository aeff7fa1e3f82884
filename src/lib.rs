//! Client-side FIDO2 ceremony engine.
//!
//! Given a WebAuthn challenge and a user-interaction prompt, the engine
//! discovers plugged authenticators, filters them against the challenge,
//! races them for user presence, collects PIN or biometric user
//! verification, and assembles the signed WebAuthn response. Device access
//! goes through the [`transport::FidoDevice`] trait; the concrete hardware
//! bindings (and the server-side verifier) live elsewhere.

pub mod ceremony;
pub mod error;
pub mod ops;
pub mod prompt;
pub mod proto;
pub mod transport;

mod assemble;

pub use ceremony::{CancelSignal, ClientConfig, Fido2Client};
pub use error::Error;

/// Hardware key support switch, for hosts that want a single kill switch:
/// the `FIDO2` environment variable disables the engine when set to `"0"`;
/// unset or any other value leaves it enabled.
pub fn is_fido2_available() -> bool {
    match std::env::var("FIDO2") {
        Ok(value) => value != "0",
        Err(_) => true,
    }
}
