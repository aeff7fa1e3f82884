use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use async_trait::async_trait;

use crate::assemble;
use crate::ceremony::cancel::CancelSignal;
use crate::ceremony::race::{self, Candidate, Driver, RaceParams};
use crate::ceremony::{with_uv_retry, ClientConfig};
use crate::error::{CtapError, Error};
use crate::ops::webauthn::{
    CredentialAssertion, CredentialAssertionResponse, CredentialInfo, LoginOpts,
};
use crate::prompt::LoginPrompt;
use crate::transport::device::{Assertion, AssertionOpts, AssertionRequest};

/// A worker's bid in the login race.
pub(crate) enum Bid {
    /// The device produced the final assertions (MFA, or passwordless on a
    /// biometric device).
    Assertions {
        assertions: Vec<Assertion>,
        app_id_used: bool,
    },
    /// Passwordless on a PIN device: the user touched this device to select
    /// it. Resident credentials stay undisclosed until the PIN flow runs.
    Selected,
}

struct LoginDriver<'a> {
    request: &'a CredentialAssertion,
    prompt: &'a dyn LoginPrompt,
    cancel: &'a CancelSignal,
    client_data_hash: Vec<u8>,
    uv_required: bool,
    passwordless: bool,
    /// Ceremony PIN collected before the race, for MFA with UV on
    /// PIN-protected devices.
    pin: Mutex<Option<String>>,
}

#[async_trait]
impl Driver for LoginDriver<'_> {
    type Output = Bid;

    fn eligible(&self, candidate: &Candidate) -> bool {
        if self.passwordless {
            // Resident credentials plus some way to verify the user.
            candidate.info().supports_passwordless()
        } else {
            // MFA probes every device, legacy U2F-only ones included; the
            // allow-list pre-flight drops the ones that cannot match.
            true
        }
    }

    async fn prepare(&self, batch: &[Candidate]) -> Result<(), Error> {
        if !self.passwordless
            && self.uv_required
            && batch.iter().any(|c| c.info().is_pin_protected())
        {
            let pin = self.prompt.prompt_pin().await?;
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            *self.pin.lock().await = Some(pin);
        }
        self.prompt.prompt_touch().await?;
        Ok(())
    }

    async fn attempt(&self, candidate: &Candidate) -> Result<Bid, Error> {
        if !self.passwordless {
            self.attempt_mfa(candidate).await
        } else if candidate.info().is_bio() {
            self.attempt_passwordless_bio(candidate).await
        } else {
            self.attempt_selection_touch(candidate).await
        }
    }
}

impl LoginDriver<'_> {
    /// MFA: silent pre-flight against the allow list, then the real
    /// presence-gated assertion.
    async fn attempt_mfa(&self, candidate: &Candidate) -> Result<Bid, Error> {
        let allow: Vec<Vec<u8>> = self.request.allow.iter().map(|c| c.id.clone()).collect();
        let (relying_party_id, app_id_used) = self.preflight(candidate, &allow).await?;

        let pin = if self.uv_required && candidate.info().is_pin_protected() {
            self.pin.lock().await.clone().unwrap_or_default()
        } else {
            String::new()
        };
        let request = AssertionRequest {
            relying_party_id,
            client_data_hash: self.client_data_hash.clone(),
            credential_ids: allow,
            pin,
            opts: AssertionOpts {
                user_presence: Some(true),
                user_verification: self.uv_required.then_some(true),
            },
        };
        let assertions = with_uv_retry(|| candidate.device.assertion(&request)).await?;
        Ok(Bid::Assertions {
            assertions,
            app_id_used,
        })
    }

    /// Checks, without consuming a touch, whether the device can serve any
    /// allowed credential under the relying-party ID, falling back to the
    /// legacy AppID when the challenge carries one.
    async fn preflight(
        &self,
        candidate: &Candidate,
        allow: &[Vec<u8>],
    ) -> Result<(String, bool), Error> {
        let mut probe = AssertionRequest {
            relying_party_id: self.request.relying_party_id.clone(),
            client_data_hash: self.client_data_hash.clone(),
            credential_ids: allow.to_vec(),
            pin: String::new(),
            opts: AssertionOpts {
                user_presence: Some(false),
                user_verification: None,
            },
        };
        match candidate.device.assertion(&probe).await {
            Ok(_) => return Ok((probe.relying_party_id, false)),
            Err(Error::Ctap(CtapError::NoCredentials)) => {}
            Err(err) => return Err(err),
        }
        let Some(app_id) = self.request.app_id.as_deref() else {
            return Err(Error::Ctap(CtapError::NoCredentials));
        };
        trace!(path = %candidate.path, %app_id, "No credentials under RP ID, probing AppID");
        probe.relying_party_id = app_id.to_owned();
        candidate.device.assertion(&probe).await?;
        Ok((probe.relying_party_id, true))
    }

    /// Passwordless on a biometric device: the single touch satisfies both
    /// presence and verification.
    async fn attempt_passwordless_bio(&self, candidate: &Candidate) -> Result<Bid, Error> {
        let request = AssertionRequest {
            relying_party_id: self.request.relying_party_id.clone(),
            client_data_hash: self.client_data_hash.clone(),
            credential_ids: Vec::new(),
            pin: String::new(),
            opts: AssertionOpts {
                user_presence: Some(true),
                user_verification: Some(true),
            },
        };
        let assertions = with_uv_retry(|| candidate.device.assertion(&request)).await?;
        Ok(Bid::Assertions {
            assertions,
            app_id_used: false,
        })
    }

    /// Passwordless on a PIN device: learn which device the user touched.
    /// No PIN, no UV, no resident access; the expected outcome is
    /// `NoCredentials` with the touch consumed.
    async fn attempt_selection_touch(&self, candidate: &Candidate) -> Result<Bid, Error> {
        let request = AssertionRequest {
            relying_party_id: self.request.relying_party_id.clone(),
            client_data_hash: self.client_data_hash.clone(),
            credential_ids: Vec::new(),
            pin: String::new(),
            opts: AssertionOpts {
                user_presence: Some(true),
                user_verification: None,
            },
        };
        match candidate.device.assertion(&request).await {
            // Any disclosed assertion is discarded: selection only.
            Ok(_) | Err(Error::Ctap(CtapError::NoCredentials)) => Ok(Bid::Selected),
            Err(err) => Err(err),
        }
    }

    /// Second phase on the selected PIN device: collect the PIN, announce
    /// the second touch, run the verified assertion.
    async fn pin_flow(&self, winner: &Candidate) -> Result<Vec<Assertion>, Error> {
        let pin = self.prompt.prompt_pin().await?;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if pin.is_empty() {
            return Err(Error::Ctap(CtapError::PinRequired));
        }
        self.prompt.prompt_touch().await?;

        let request = AssertionRequest {
            relying_party_id: self.request.relying_party_id.clone(),
            client_data_hash: self.client_data_hash.clone(),
            credential_ids: Vec::new(),
            pin,
            opts: AssertionOpts {
                user_presence: Some(true),
                user_verification: None,
            },
        };
        with_uv_retry(|| winner.device.assertion(&request)).await
    }
}

pub(crate) async fn run(
    config: &ClientConfig,
    cancel: &CancelSignal,
    origin: &str,
    request: &CredentialAssertion,
    prompt: &dyn LoginPrompt,
    opts: &LoginOpts,
) -> Result<(CredentialAssertionResponse, String), Error> {
    request.validate(origin)?;

    let client_data = assemble::client_data_json(assemble::CEREMONY_GET, &request.challenge, origin)?;
    let driver = LoginDriver {
        request,
        prompt,
        cancel,
        client_data_hash: assemble::sha256(&client_data),
        uv_required: request.user_verification.is_required(),
        passwordless: request.is_passwordless(),
        pin: Mutex::new(None),
    };
    debug!(
        passwordless = driver.passwordless,
        allowed = request.allow.len(),
        "Starting login ceremony"
    );

    let params = RaceParams {
        locator: config.locator.as_ref(),
        devices: config.devices.as_ref(),
        poll_interval: config.poll_interval,
        deadline: Instant::now() + request.timeout,
        cancel: cancel.clone(),
    };
    let (winner, bid) = race::run(params, &driver).await?;

    let (assertions, app_id_used) = match bid {
        Bid::Assertions {
            assertions,
            app_id_used,
        } => (assertions, app_id_used),
        Bid::Selected => (driver.pin_flow(&winner).await?, false),
    };

    let (assertion, actual_user) = select_credential(assertions, opts, prompt).await?;
    let response = assemble::assertion_response(client_data, &assertion, app_id_used)?;
    Ok((response, actual_user))
}

/// Picks the credential to answer with. A single assertion is accepted as
/// returned (authenticators anonymize it, so a requested user cannot be
/// checked against it); multiple assertions are resolved by the requested
/// user name or by the credential picker.
async fn select_credential(
    mut assertions: Vec<Assertion>,
    opts: &LoginOpts,
    prompt: &dyn LoginPrompt,
) -> Result<(Assertion, String), Error> {
    if assertions.is_empty() {
        return Err(Error::Ctap(CtapError::NoCredentials));
    }
    if assertions.len() == 1 {
        let Some(assertion) = assertions.pop() else {
            return Err(Error::Internal("assertion list emptied".to_owned()));
        };
        return Ok((assertion, String::new()));
    }

    if let Some(user) = opts.user.as_deref().filter(|user| !user.is_empty()) {
        let Some(at) = assertions.iter().position(|a| a.user.name == user) else {
            return Err(Error::NoCredentialsForUser(user.to_owned()));
        };
        debug!(%user, "Selected resident credential by requested user");
        return Ok((assertions.swap_remove(at), user.to_owned()));
    }

    let credentials: Vec<CredentialInfo> = assertions
        .iter()
        .map(|a| CredentialInfo {
            id: a.credential_id.clone(),
            user: a.user.clone(),
        })
        .collect();
    let chosen = prompt.prompt_credential(&credentials).await?;
    let Some(at) = assertions
        .iter()
        .position(|a| a.credential_id == chosen.id)
    else {
        return Err(Error::Internal(
            "picked credential not among the assertions".to_owned(),
        ));
    };
    let assertion = assertions.swap_remove(at);
    let actual_user = assertion.user.name.clone();
    Ok((assertion, actual_user))
}
