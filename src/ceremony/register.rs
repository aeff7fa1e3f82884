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
    CoseAlgorithmIdentifier, CredentialCreation, CredentialCreationResponse,
};
use crate::prompt::RegisterPrompt;
use crate::transport::device::{
    AssertionOpts, AssertionRequest, Attestation, MakeCredentialOpts, MakeCredentialRequest,
};

struct RegisterDriver<'a> {
    request: &'a CredentialCreation,
    prompt: &'a dyn RegisterPrompt,
    cancel: &'a CancelSignal,
    client_data_hash: Vec<u8>,
    /// Ceremony PIN, collected before the touch prompt whenever a candidate
    /// is PIN-only. Hardware validates a configured PIN on makeCredential
    /// even without UV, so this is not tied to the UV requirement.
    pin: Mutex<Option<String>>,
}

#[async_trait]
impl Driver for RegisterDriver<'_> {
    type Output = Attestation;

    fn eligible(&self, candidate: &Candidate) -> bool {
        if self.request.resident_key {
            candidate.info().supports_passwordless()
        } else {
            // Legacy U2F-only devices register through the same adapter
            // call; capability checks happen on the device.
            true
        }
    }

    async fn prepare(&self, batch: &[Candidate]) -> Result<(), Error> {
        if batch.iter().any(|c| c.info().is_pin_protected()) {
            let pin = self.prompt.prompt_pin().await?;
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            *self.pin.lock().await = Some(pin);
        }
        self.prompt.prompt_touch().await?;
        Ok(())
    }

    async fn attempt(&self, candidate: &Candidate) -> Result<Attestation, Error> {
        if self.excluded(candidate).await? {
            return Err(Error::Ctap(CtapError::CredentialExcluded));
        }

        let info = candidate.info();
        let pin = if info.is_pin_protected() {
            self.pin.lock().await.clone().unwrap_or_default()
        } else {
            String::new()
        };
        let uv_wanted = self.request.resident_key || self.request.user_verification.is_required();
        let request = MakeCredentialRequest {
            client_data_hash: self.client_data_hash.clone(),
            relying_party: self.request.relying_party.clone(),
            user: self.request.user.clone(),
            credential_type: CoseAlgorithmIdentifier::Es256,
            pin,
            opts: MakeCredentialOpts {
                resident_key: self.request.resident_key.then_some(true),
                // UV=true is only valid on devices with built-in UV; PIN
                // devices verify through the PIN parameter instead.
                user_verification: (uv_wanted && info.is_bio()).then_some(true),
            },
        };
        with_uv_retry(|| candidate.device.make_credential(&request)).await
    }
}

impl RegisterDriver<'_> {
    /// Silent probe of the exclude list: a device that already holds one of
    /// the excluded credentials is removed from the race. The probe never
    /// consumes a touch.
    async fn excluded(&self, candidate: &Candidate) -> Result<bool, Error> {
        if self.request.exclude.is_empty() {
            return Ok(false);
        }
        let probe = AssertionRequest {
            relying_party_id: self.request.relying_party.id.clone(),
            client_data_hash: self.client_data_hash.clone(),
            credential_ids: self.request.exclude.iter().map(|c| c.id.clone()).collect(),
            pin: String::new(),
            opts: AssertionOpts {
                user_presence: Some(false),
                user_verification: None,
            },
        };
        match candidate.device.assertion(&probe).await {
            Ok(_) => {
                debug!(path = %candidate.path, "Device holds an excluded credential");
                Ok(true)
            }
            Err(Error::Ctap(CtapError::NoCredentials)) => Ok(false),
            Err(err) => {
                // Not a statement about the exclude list; keep the device.
                trace!(path = %candidate.path, %err, "Exclude probe failed, keeping device");
                Ok(false)
            }
        }
    }
}

pub(crate) async fn run(
    config: &ClientConfig,
    cancel: &CancelSignal,
    origin: &str,
    request: &CredentialCreation,
    prompt: &dyn RegisterPrompt,
) -> Result<CredentialCreationResponse, Error> {
    request.validate(origin)?;

    let client_data =
        assemble::client_data_json(assemble::CEREMONY_CREATE, &request.challenge, origin)?;
    let driver = RegisterDriver {
        request,
        prompt,
        cancel,
        client_data_hash: assemble::sha256(&client_data),
        pin: Mutex::new(None),
    };
    debug!(
        resident_key = request.resident_key,
        excluded = request.exclude.len(),
        "Starting register ceremony"
    );

    let params = RaceParams {
        locator: config.locator.as_ref(),
        devices: config.devices.as_ref(),
        poll_interval: config.poll_interval,
        deadline: Instant::now() + request.timeout,
        cancel: cancel.clone(),
    };
    let (winner, attestation) = race::run(params, &driver).await?;
    debug!(path = %winner.path, format = attestation.format.as_str(), "Assembling attestation");

    assemble::creation_response(client_data, attestation)
}
