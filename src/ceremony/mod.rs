mod cancel;
mod login;
mod race;
mod register;

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{debug, instrument};

pub use cancel::CancelSignal;

use crate::error::Error;
use crate::ops::webauthn::{
    CredentialAssertion, CredentialAssertionResponse, CredentialCreation,
    CredentialCreationResponse, LoginOpts,
};
use crate::prompt::{LoginPrompt, RegisterPrompt};
use crate::transport::locator::{DeviceFactory, DeviceLocator};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Environment override for the device poll interval, in milliseconds.
/// Read once per process.
const POLL_INTERVAL_ENV: &str = "FIDO2_POLL_INTERVAL";

fn poll_interval_from_env() -> Duration {
    static INTERVAL: OnceLock<Duration> = OnceLock::new();
    *INTERVAL.get_or_init(|| {
        std::env::var(POLL_INTERVAL_ENV)
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    })
}

/// Engine configuration. The locator and device factory are explicit so that
/// tests (and alternative transports) can substitute their own; nothing here
/// is process-global state.
#[derive(Clone)]
pub struct ClientConfig {
    pub poll_interval: Duration,
    pub locator: Arc<dyn DeviceLocator>,
    pub devices: Arc<dyn DeviceFactory>,
}

impl ClientConfig {
    pub fn new(locator: Arc<dyn DeviceLocator>, devices: Arc<dyn DeviceFactory>) -> Self {
        Self {
            poll_interval: poll_interval_from_env(),
            locator,
            devices,
        }
    }
}

/// Drives plugged FIDO2 authenticators through WebAuthn registration and
/// authentication ceremonies.
pub struct Fido2Client {
    config: ClientConfig,
}

impl Fido2Client {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Runs a WebAuthn registration (credential creation) ceremony.
    ///
    /// Returns once a plugged authenticator produced an attestation, the
    /// request deadline fired, or `cancel` was triggered.
    #[instrument(skip_all, fields(rp = %request.relying_party.id))]
    pub async fn register(
        &self,
        cancel: &CancelSignal,
        origin: &str,
        request: &CredentialCreation,
        prompt: &dyn RegisterPrompt,
    ) -> Result<CredentialCreationResponse, Error> {
        register::run(&self.config, cancel, origin, request, prompt).await
    }

    /// Runs a WebAuthn authentication (assertion) ceremony.
    ///
    /// The returned string is the name of the actual user: non-empty only
    /// when more than one resident credential was eligible and one was
    /// picked, by `opts.user` or by the credential picker.
    #[instrument(skip_all, fields(rp = %request.relying_party_id))]
    pub async fn login(
        &self,
        cancel: &CancelSignal,
        origin: &str,
        request: &CredentialAssertion,
        prompt: &dyn LoginPrompt,
        opts: &LoginOpts,
    ) -> Result<(CredentialAssertionResponse, String), Error> {
        login::run(&self.config, cancel, origin, request, prompt, opts).await
    }
}

// Some authenticators report spurious UV failures (libfido2 error 63);
// retry the operation in place a bounded number of times.
const MAX_UV_ATTEMPTS: usize = 3;

/// Runs a device operation, retrying transient UV failures and translating a
/// hard UV refusal (libfido2 error 60) into its dedicated error.
pub(crate) async fn with_uv_retry<T, Fut>(mut call: impl FnMut() -> Fut) -> Result<T, Error>
where
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match call().await {
            Err(Error::Ctap(err)) if err.is_retryable_uv_error() && attempts < MAX_UV_ATTEMPTS => {
                debug!(%err, attempts, "Transient UV failure, retrying");
            }
            Err(Error::Ctap(crate::error::CtapError::UvBlocked)) => {
                return Err(Error::UserVerification);
            }
            result => return result,
        }
    }
}
