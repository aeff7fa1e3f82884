use std::time::Duration;

use crate::error::Error;

/// COSE algorithm identifiers the engine understands.
///
/// https://www.iana.org/assignments/cose/cose.xhtml#algorithms
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i32)]
pub enum CoseAlgorithmIdentifier {
    Es256 = -7,
    EdDsa = -8,
    Rs256 = -257,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum UserVerificationRequirement {
    #[default]
    Discouraged,
    Preferred,
    Required,
}

impl UserVerificationRequirement {
    pub fn is_required(&self) -> bool {
        matches!(self, Self::Required)
    }

    pub fn is_preferred(&self) -> bool {
        matches!(self, Self::Preferred | Self::Required)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum AttestationPreference {
    #[default]
    None,
    Indirect,
    Direct,
}

/// rpEntity
#[derive(Debug, Clone, Default)]
pub struct RelyingParty {
    pub id: String,
    pub name: String,
}

/// userEntity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub id: Vec<u8>,
    pub name: String,
    pub display_name: String,
}

/// An entry of an allowList or excludeCredentialDescriptorList. The
/// credential type is always `public-key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialDescriptor {
    pub id: Vec<u8>,
}

/// A resident credential as offered to the credential picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialInfo {
    pub id: Vec<u8>,
    pub user: User,
}

/// WebAuthn credential creation challenge (registration).
#[derive(Debug, Clone)]
pub struct CredentialCreation {
    pub challenge: Vec<u8>,
    pub relying_party: RelyingParty,
    pub user: User,
    /// credTypesAndPubKeyAlgs; ES256 must be present.
    pub algorithms: Vec<CoseAlgorithmIdentifier>,
    /// excludeCredentialDescriptorList
    pub exclude: Vec<CredentialDescriptor>,
    pub attestation: AttestationPreference,
    /// Demand a discoverable (resident) credential: the passwordless flow.
    pub resident_key: bool,
    pub user_verification: UserVerificationRequirement,
    /// Overall ceremony deadline, supplied by the caller.
    pub timeout: Duration,
}

impl CredentialCreation {
    pub(crate) fn validate(&self, origin: &str) -> Result<(), Error> {
        if origin.is_empty() {
            return Err(Error::InvalidArgument("origin".to_owned()));
        }
        if self.challenge.is_empty() {
            return Err(Error::InvalidArgument("challenge".to_owned()));
        }
        if self.relying_party.id.is_empty() {
            return Err(Error::InvalidArgument("relying party ID".to_owned()));
        }
        if !self
            .algorithms
            .contains(&CoseAlgorithmIdentifier::Es256)
        {
            return Err(Error::InvalidArgument(
                "credential parameters: ES256".to_owned(),
            ));
        }
        if self.resident_key {
            // Resident credentials carry the user entity on the device, so
            // the whole record has to be present.
            if self.relying_party.name.is_empty() {
                return Err(Error::InvalidArgument("relying party name".to_owned()));
            }
            if self.user.name.is_empty() {
                return Err(Error::InvalidArgument("user name".to_owned()));
            }
            if self.user.display_name.is_empty() {
                return Err(Error::InvalidArgument("user display name".to_owned()));
            }
            if self.user.id.is_empty() {
                return Err(Error::InvalidArgument("user ID".to_owned()));
            }
        }
        Ok(())
    }
}

/// WebAuthn credential request challenge (authentication).
///
/// An empty `allow` list means passwordless: the credential is discovered on
/// the device after user verification.
#[derive(Debug, Clone)]
pub struct CredentialAssertion {
    pub challenge: Vec<u8>,
    pub relying_party_id: String,
    pub allow: Vec<CredentialDescriptor>,
    pub user_verification: UserVerificationRequirement,
    /// Legacy U2F AppID extension; enables the fallback for credentials
    /// registered under the AppID instead of the RP ID.
    pub app_id: Option<String>,
    /// Overall ceremony deadline, supplied by the caller.
    pub timeout: Duration,
}

impl CredentialAssertion {
    pub(crate) fn validate(&self, origin: &str) -> Result<(), Error> {
        if origin.is_empty() {
            return Err(Error::InvalidArgument("origin".to_owned()));
        }
        if self.challenge.is_empty() {
            return Err(Error::InvalidArgument("challenge".to_owned()));
        }
        if self.relying_party_id.is_empty() {
            return Err(Error::InvalidArgument("relying party ID".to_owned()));
        }
        Ok(())
    }

    pub fn is_passwordless(&self) -> bool {
        self.allow.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoginOpts {
    /// Preferred user for passwordless logins with multiple resident
    /// credentials. Ignored when the authenticator returns a single,
    /// anonymized credential.
    pub user: Option<String>,
}

/// Register output: attestation object plus the client data that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialCreationResponse {
    pub raw_id: Vec<u8>,
    pub attestation_object: Vec<u8>,
    pub client_data_json: Vec<u8>,
}

/// Login output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialAssertionResponse {
    pub raw_id: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub signature: Vec<u8>,
    /// User handle of the signing credential; empty in MFA ceremonies.
    pub user_handle: Vec<u8>,
    pub client_data_json: Vec<u8>,
    /// True when the assertion was produced under the legacy AppID rather
    /// than the relying-party ID.
    pub app_id: bool,
}
