//! Test doubles: a fake authenticator with a touch rendezvous, fake device
//! locators (metered and non-metered), and canned prompts.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use serde_bytes::ByteBuf;
use tokio::sync::Notify;

use fido2_client::error::{CtapError, Error};
use fido2_client::ops::webauthn::{CoseAlgorithmIdentifier, CredentialInfo, User};
use fido2_client::prompt::{LoginPrompt, RegisterPrompt};
use fido2_client::transport::device::{
    Assertion, AssertionRequest, Attestation, AttestationFormat, DeviceInfo, FidoDevice,
    MakeCredentialRequest,
};
use fido2_client::transport::locator::{DeviceFactory, DeviceLocator};
use fido2_client::{CancelSignal, ClientConfig};

// Fixed (but randomly generated) authenticator outputs, realistic sizes.
// Devices return authenticator data CBOR-wrapped; responses carry the raw
// bytes, so tests compare against the *_raw variants.

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

pub fn make_credential_auth_data_raw() -> &'static [u8] {
    static RAW: OnceLock<Vec<u8>> = OnceLock::new();
    RAW.get_or_init(|| random_bytes(37))
}

pub fn make_credential_sig() -> &'static [u8] {
    static SIG: OnceLock<Vec<u8>> = OnceLock::new();
    SIG.get_or_init(|| random_bytes(70))
}

pub fn assertion_auth_data_raw() -> &'static [u8] {
    static RAW: OnceLock<Vec<u8>> = OnceLock::new();
    RAW.get_or_init(|| random_bytes(37))
}

pub fn assertion_sig() -> &'static [u8] {
    static SIG: OnceLock<Vec<u8>> = OnceLock::new();
    SIG.get_or_init(|| random_bytes(70))
}

fn cbor_wrap(raw: &[u8]) -> Vec<u8> {
    serde_cbor::to_vec(&ByteBuf::from(raw.to_vec())).expect("cbor")
}

#[derive(Debug, Clone)]
pub struct FakeCredential {
    pub id: Vec<u8>,
    pub user: User,
}

impl FakeCredential {
    pub fn new(user_id: &[u8], name: &str) -> Self {
        Self {
            // Credential id assigned by the authenticator.
            id: random_bytes(16),
            user: User {
                id: user_id.to_vec(),
                name: name.to_owned(),
                display_name: String::new(),
            },
        }
    }
}

#[derive(Default)]
struct Interaction {
    up: bool,
    cancel: bool,
}

/// Fake FIDO2 authenticator. Presence-gated calls block on a rendezvous
/// until [`FakeDevice::touch`] or [`FidoDevice::cancel`] is invoked,
/// mirroring how libfido2 calls block on the hardware.
pub struct FakeDevice {
    pub path: String,
    info: Option<DeviceInfo>,
    pin: String,
    /// Non-resident "base" credential, only served when explicitly allowed.
    base_credential_id: Vec<u8>,
    certificate: Vec<u8>,
    /// Attestation format returned by make_credential.
    pub format: AttestationFormat,
    /// When set, assertions demand this exact relying-party id.
    pub want_rp_id: Option<String>,
    /// Fail UV regardless of other conditions, as some devices do.
    pub fail_uv: bool,
    /// Errors returned from `assertion`, one per call, before anything else.
    assertion_errors: Mutex<Vec<Error>>,
    credentials: Mutex<Vec<FakeCredential>>,
    state: Mutex<Interaction>,
    notify: Notify,
}

impl FakeDevice {
    pub fn new(path: &str, pin: &str, info: DeviceInfo) -> Self {
        Self::build(path, pin, Some(info))
    }

    /// Legacy U2F-only authenticator: `info` answers `NotFido2`, credential
    /// operations still work through the adapter.
    pub fn new_u2f_only(path: &str) -> Self {
        Self::build(path, "", None)
    }

    fn build(path: &str, pin: &str, info: Option<DeviceInfo>) -> Self {
        Self {
            path: path.to_owned(),
            info,
            pin: pin.to_owned(),
            base_credential_id: random_bytes(32),
            certificate: random_bytes(64),
            format: AttestationFormat::Packed,
            want_rp_id: None,
            fail_uv: false,
            assertion_errors: Mutex::new(Vec::new()),
            credentials: Mutex::new(Vec::new()),
            state: Mutex::new(Interaction::default()),
            notify: Notify::new(),
        }
    }

    pub fn with_credentials(self, credentials: Vec<FakeCredential>) -> Self {
        *self.credentials.lock().unwrap() = credentials;
        self
    }

    pub fn credential_id(&self) -> Vec<u8> {
        self.base_credential_id.clone()
    }

    pub fn certificate(&self) -> Vec<u8> {
        self.certificate.clone()
    }

    pub fn pin(&self) -> &str {
        &self.pin
    }

    pub fn credentials(&self) -> Vec<FakeCredential> {
        self.credentials.lock().unwrap().clone()
    }

    pub fn set_assertion_errors(&self, errors: Vec<Error>) {
        *self.assertion_errors.lock().unwrap() = errors;
    }

    /// Simulates the user touching this authenticator.
    pub fn touch(&self) {
        self.state.lock().unwrap().up = true;
        self.notify.notify_waiters();
    }

    fn info_or_default(&self) -> DeviceInfo {
        self.info.unwrap_or_default()
    }

    fn validate_pin(&self, pin: &str) -> Result<(), Error> {
        if self.info_or_default().is_bio() && pin.is_empty() {
            // Biometric check supersedes the PIN.
            return Ok(());
        }
        if !self.pin.is_empty() && pin.is_empty() {
            return Err(Error::Ctap(CtapError::PinRequired));
        }
        if !self.pin.is_empty() && self.pin != pin {
            return Err(Error::Ctap(CtapError::PinInvalid));
        }
        Ok(())
    }

    /// Blocks until touch or cancel when user presence is demanded.
    async fn wait_interaction(&self, up: bool) -> Result<(), Error> {
        if !up {
            return Ok(());
        }
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap();
                if state.cancel {
                    state.cancel = false;
                    state.up = false;
                    return Err(Error::Ctap(CtapError::KeepAliveCancel));
                }
                if state.up {
                    state.up = false;
                    return Ok(());
                }
            }
            notified.await;
        }
    }
}

#[async_trait]
impl FidoDevice for FakeDevice {
    async fn info(&self) -> Result<DeviceInfo, Error> {
        match self.info {
            Some(info) => Ok(info),
            None => Err(Error::NotFido2),
        }
    }

    async fn make_credential(
        &self,
        request: &MakeCredentialRequest,
    ) -> Result<Attestation, Error> {
        let info = self.info_or_default();
        if request.client_data_hash.is_empty() {
            return Err(Error::Internal("clientDataHash required".to_owned()));
        }
        if request.relying_party.id.is_empty() {
            return Err(Error::Internal("rp.ID required".to_owned()));
        }
        if request.credential_type != CoseAlgorithmIdentifier::Es256 {
            return Err(Error::Internal("bad credential type".to_owned()));
        }
        match request.opts.user_verification {
            Some(false) => return Err(Error::Ctap(CtapError::UnsupportedOption)),
            Some(true) if !info.user_verification => {
                return Err(Error::Ctap(CtapError::UnsupportedOption));
            }
            _ => {}
        }
        if request.opts.resident_key == Some(true) && !info.resident_keys {
            return Err(Error::Ctap(CtapError::UnsupportedOption));
        }

        // A configured PIN is demanded regardless of opts, in line with how
        // current hardware behaves.
        self.validate_pin(&request.pin)?;

        self.wait_interaction(true).await?;

        let (certificate, signature) = match self.format {
            AttestationFormat::None => (Vec::new(), Vec::new()),
            _ => (self.certificate.clone(), make_credential_sig().to_vec()),
        };

        // Resident credentials get a fresh id and live on the device.
        let credential_id = if request.opts.resident_key == Some(true) {
            let credential = FakeCredential {
                id: random_bytes(16),
                user: request.user.clone(),
            };
            let id = credential.id.clone();
            self.credentials.lock().unwrap().push(credential);
            id
        } else {
            self.base_credential_id.clone()
        };

        Ok(Attestation {
            credential_id,
            auth_data_cbor: cbor_wrap(make_credential_auth_data_raw()),
            public_key_cbor: vec![0xA5],
            certificate,
            signature,
            format: self.format,
        })
    }

    async fn assertion(&self, request: &AssertionRequest) -> Result<Vec<Assertion>, Error> {
        // Simulated errors take precedence.
        {
            let mut errors = self.assertion_errors.lock().unwrap();
            if !errors.is_empty() {
                return Err(errors.remove(0));
            }
        }

        if request.relying_party_id.is_empty() {
            return Err(Error::Internal("rp.ID required".to_owned()));
        }
        if let Some(want) = &self.want_rp_id {
            if want != &request.relying_party_id {
                return Err(Error::Ctap(CtapError::NoCredentials));
            }
        }
        if request.client_data_hash.is_empty() {
            return Err(Error::Internal("clientDataHash required".to_owned()));
        }

        let info = self.info_or_default();
        match request.opts.user_verification {
            None => {}
            Some(true) if self.fail_uv => return Err(Error::Ctap(CtapError::UnsupportedOption)),
            Some(true) if info.is_bio() => {}
            Some(true) if info.client_pin && !request.pin.is_empty() => {}
            _ => return Err(Error::Ctap(CtapError::UnsupportedOption)),
        }

        // A PIN (or biometrics) unlocks resident credentials.
        let mut privileged = info.is_bio();
        if !request.pin.is_empty() && request.opts.user_presence == Some(true) {
            self.validate_pin(&request.pin)?;
            privileged = true;
        }

        // Presence is settled before any credential data is disclosed.
        self.wait_interaction(request.opts.user_presence == Some(true))
            .await?;

        let mut assertions = Vec::new();
        if request
            .credential_ids
            .iter()
            .any(|id| id == &self.base_credential_id)
        {
            assertions.push(Assertion {
                credential_id: self.base_credential_id.clone(),
                auth_data_cbor: cbor_wrap(assertion_auth_data_raw()),
                signature: assertion_sig().to_vec(),
                // No user data for the base (MFA) credential.
                user: User::default(),
            });
        }
        if privileged {
            for credential in self.credentials.lock().unwrap().iter() {
                let allowed = request.credential_ids.is_empty()
                    || request.credential_ids.iter().any(|id| id == &credential.id);
                if !allowed {
                    continue;
                }
                assertions.push(Assertion {
                    credential_id: credential.id.clone(),
                    auth_data_cbor: cbor_wrap(assertion_auth_data_raw()),
                    signature: assertion_sig().to_vec(),
                    user: credential.user.clone(),
                });
            }
        }

        match assertions.len() {
            0 => Err(Error::Ctap(CtapError::NoCredentials)),
            1 => {
                // Authenticators omit user identifiers when unambiguous.
                assertions[0].user.name.clear();
                assertions[0].user.display_name.clear();
                Ok(assertions)
            }
            _ => Ok(assertions),
        }
    }

    async fn cancel(&self) {
        self.state.lock().unwrap().cancel = true;
        self.notify.notify_waiters();
    }
}

/// Fake locator + factory over a fixed device set. Metered by default: the
/// first poll comes back empty to exercise the discovery loop.
pub struct FakeFido2 {
    order: Vec<String>,
    devices: HashMap<String, Arc<FakeDevice>>,
    metered: bool,
    polls: AtomicUsize,
}

impl FakeFido2 {
    pub fn new(devices: &[&Arc<FakeDevice>]) -> Self {
        Self {
            order: devices.iter().map(|d| d.path.clone()).collect(),
            devices: devices
                .iter()
                .map(|d| (d.path.clone(), Arc::clone(d)))
                .collect(),
            metered: true,
            polls: AtomicUsize::new(0),
        }
    }

    /// Returns all known devices from the first poll on.
    pub fn non_metered(mut self) -> Self {
        self.metered = false;
        self
    }

    pub fn config(self) -> ClientConfig {
        let fake = Arc::new(self);
        ClientConfig {
            // Run fast on tests.
            poll_interval: Duration::from_millis(1),
            locator: Arc::clone(&fake) as _,
            devices: fake,
        }
    }
}

#[async_trait]
impl DeviceLocator for FakeFido2 {
    async fn current_locations(&self) -> Result<Vec<String>, Error> {
        if self.metered && self.polls.fetch_add(1, Ordering::SeqCst) < 1 {
            return Ok(Vec::new());
        }
        Ok(self.order.clone())
    }
}

#[async_trait]
impl DeviceFactory for FakeFido2 {
    async fn open(&self, path: &str) -> Result<Arc<dyn FidoDevice>, Error> {
        self.devices
            .get(path)
            .cloned()
            .map(|device| device as Arc<dyn FidoDevice>)
            .ok_or_else(|| Error::Internal(format!("device not found: {}", path)))
    }
}

/// Prompt backed by the fake device itself: a touch prompt touches the key,
/// the PIN prompt answers with the device PIN, the picker takes the first
/// credential.
pub struct DevicePrompt(pub Arc<FakeDevice>);

#[async_trait]
impl RegisterPrompt for DevicePrompt {
    async fn prompt_touch(&self) -> Result<(), Error> {
        self.0.touch();
        Ok(())
    }

    async fn prompt_pin(&self) -> Result<String, Error> {
        Ok(self.0.pin().to_owned())
    }
}

#[async_trait]
impl LoginPrompt for DevicePrompt {
    async fn prompt_credential(
        &self,
        credentials: &[CredentialInfo],
    ) -> Result<CredentialInfo, Error> {
        Ok(credentials[0].clone())
    }
}

/// Does nothing: no touches, an empty PIN, the first credential.
pub struct NoopPrompt;

#[async_trait]
impl RegisterPrompt for NoopPrompt {
    async fn prompt_touch(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn prompt_pin(&self) -> Result<String, Error> {
        Ok(String::new())
    }
}

#[async_trait]
impl LoginPrompt for NoopPrompt {
    async fn prompt_credential(
        &self,
        credentials: &[CredentialInfo],
    ) -> Result<CredentialInfo, Error> {
        Ok(credentials[0].clone())
    }
}

/// Counts touch prompts, delegating everything to the wrapped prompt.
pub struct CountingPrompt<'a> {
    inner: &'a dyn LoginPrompt,
    touches: AtomicUsize,
}

impl<'a> CountingPrompt<'a> {
    pub fn new(inner: &'a dyn LoginPrompt) -> Self {
        Self {
            inner,
            touches: AtomicUsize::new(0),
        }
    }

    pub fn touches(&self) -> usize {
        self.touches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegisterPrompt for CountingPrompt<'_> {
    async fn prompt_touch(&self) -> Result<(), Error> {
        self.touches.fetch_add(1, Ordering::SeqCst);
        self.inner.prompt_touch().await
    }

    async fn prompt_pin(&self) -> Result<String, Error> {
        self.inner.prompt_pin().await
    }
}

#[async_trait]
impl LoginPrompt for CountingPrompt<'_> {
    async fn prompt_credential(
        &self,
        credentials: &[CredentialInfo],
    ) -> Result<CredentialInfo, Error> {
        self.inner.prompt_credential(credentials).await
    }
}

/// Cancels the ceremony from inside the PIN prompt, then answers with the
/// PIN anyway. The second touch must never be requested.
pub struct PinCancelPrompt {
    pub pin: String,
    pub cancel: CancelSignal,
}

#[async_trait]
impl RegisterPrompt for PinCancelPrompt {
    async fn prompt_touch(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn prompt_pin(&self) -> Result<String, Error> {
        self.cancel.cancel();
        Ok(self.pin.clone())
    }
}

#[async_trait]
impl LoginPrompt for PinCancelPrompt {
    async fn prompt_credential(
        &self,
        credentials: &[CredentialInfo],
    ) -> Result<CredentialInfo, Error> {
        Ok(credentials[0].clone())
    }
}

// Device option sets mirroring common authenticator models.

/// FIDO2 key with no PIN configured.
pub fn auth_opts() -> DeviceInfo {
    DeviceInfo {
        resident_keys: true,
        ..Default::default()
    }
}

/// FIDO2 key with a configured PIN.
pub fn pin_opts() -> DeviceInfo {
    DeviceInfo {
        resident_keys: true,
        client_pin: true,
        ..Default::default()
    }
}

/// Biometric key (fingerprint enrolled, PIN also configured).
pub fn bio_opts() -> DeviceInfo {
    DeviceInfo {
        resident_keys: true,
        user_verification: true,
        client_pin: true,
        bio_enroll: true,
        always_uv: true,
        ..Default::default()
    }
}
