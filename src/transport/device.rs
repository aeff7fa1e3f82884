use async_trait::async_trait;

use crate::error::Error;
use crate::ops::webauthn::{CoseAlgorithmIdentifier, RelyingParty, User};

/// Authenticator options as reported by authenticatorGetInfo, reduced to the
/// capabilities the ceremonies dispatch on.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// rk: discoverable (resident) credentials.
    pub resident_keys: bool,
    /// uv: built-in user verification.
    pub user_verification: bool,
    /// clientPin: a PIN is configured.
    pub client_pin: bool,
    /// bioEnroll: biometric sensor enrolled.
    pub bio_enroll: bool,
    /// plat: platform (non-removable) authenticator.
    pub platform_device: bool,
    /// alwaysUv
    pub always_uv: bool,
}

impl DeviceInfo {
    /// Biometric authenticators satisfy UV with the presence touch itself.
    pub fn is_bio(&self) -> bool {
        self.bio_enroll
    }

    /// PIN-protected and nothing better: UV requires collecting the PIN.
    pub fn is_pin_protected(&self) -> bool {
        self.client_pin && !self.bio_enroll
    }

    /// Neither UV nor a PIN: a plain MFA key.
    pub fn is_plain_mfa(&self) -> bool {
        !self.user_verification && !self.client_pin
    }

    /// Eligible for passwordless ceremonies: holds resident credentials and
    /// can verify the user.
    pub fn supports_passwordless(&self) -> bool {
        self.resident_keys && (self.bio_enroll || self.client_pin)
    }
}

/// Raw attestation as returned by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    pub credential_id: Vec<u8>,
    /// Authenticator data, CBOR-wrapped as devices return it.
    pub auth_data_cbor: Vec<u8>,
    pub public_key_cbor: Vec<u8>,
    /// Attestation certificate; empty for format `none`.
    pub certificate: Vec<u8>,
    /// Attestation signature; empty for format `none`.
    pub signature: Vec<u8>,
    pub format: AttestationFormat,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum AttestationFormat {
    #[default]
    Packed,
    FidoU2f,
    None,
}

impl AttestationFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Packed => "packed",
            Self::FidoU2f => "fido-u2f",
            Self::None => "none",
        }
    }
}

/// Raw assertion as returned by the authenticator. With a single eligible
/// credential, authenticators omit the user name and display name; the
/// engine preserves the record as returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub credential_id: Vec<u8>,
    /// Authenticator data, CBOR-wrapped as devices return it.
    pub auth_data_cbor: Vec<u8>,
    pub signature: Vec<u8>,
    pub user: User,
}

/// makeCredential parameters, mirroring the libfido2 call shape.
#[derive(Debug, Clone)]
pub struct MakeCredentialRequest {
    pub client_data_hash: Vec<u8>,
    pub relying_party: RelyingParty,
    pub user: User,
    pub credential_type: CoseAlgorithmIdentifier,
    /// Empty when no PIN is supplied.
    pub pin: String,
    pub opts: MakeCredentialOpts,
}

/// Tri-state booleans: `None` leaves the decision to the device.
#[derive(Debug, Copy, Clone, Default)]
pub struct MakeCredentialOpts {
    pub resident_key: Option<bool>,
    pub user_verification: Option<bool>,
}

/// getAssertion parameters, mirroring the libfido2 call shape.
#[derive(Debug, Clone)]
pub struct AssertionRequest {
    pub relying_party_id: String,
    pub client_data_hash: Vec<u8>,
    /// Allowed credential ids; empty grants resident-credential access once
    /// the user is verified.
    pub credential_ids: Vec<Vec<u8>>,
    /// Empty when no PIN is supplied.
    pub pin: String,
    pub opts: AssertionOpts,
}

#[derive(Debug, Copy, Clone, Default)]
pub struct AssertionOpts {
    pub user_presence: Option<bool>,
    pub user_verification: Option<bool>,
}

/// One physical authenticator.
///
/// Implementations wrap the blocking hardware library; every call is
/// cancellable out-of-band through [`FidoDevice::cancel`], which unblocks the
/// in-flight call with `CtapError::KeepAliveCancel` within bounded time.
/// Handles are owned by a single worker task; only `cancel` may be invoked
/// from outside it.
#[async_trait]
pub trait FidoDevice: Send + Sync {
    /// Probes the device. U2F-only authenticators answer `Error::NotFido2`
    /// and are served through the legacy fallback path.
    async fn info(&self) -> Result<DeviceInfo, Error>;

    async fn make_credential(&self, request: &MakeCredentialRequest)
        -> Result<Attestation, Error>;

    /// Produces one assertion per credential the device holds that matches
    /// the request. `CtapError::NoCredentials` when nothing matches.
    async fn assertion(&self, request: &AssertionRequest) -> Result<Vec<Assertion>, Error>;

    /// Interrupts the in-flight call on this device, if any.
    async fn cancel(&self);
}
