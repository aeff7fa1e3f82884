pub use crate::proto::CtapError;

/// Errors surfaced by the ceremony engine.
///
/// Device-originated failures carry their CTAP/libfido2 code in
/// [`Error::Ctap`]; everything the engine decides on its own has a dedicated
/// variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A challenge, origin, or prompt failed validation before any device
    /// was touched. The message names the offending field.
    InvalidArgument(String),
    /// The caller's deadline fired.
    DeadlineExceeded,
    /// The caller or the prompt cancelled the ceremony.
    Cancelled,
    /// The device refused user verification outright (libfido2 error 60).
    UserVerification,
    /// Passwordless selection: none of the resident credentials belongs to
    /// the requested user.
    NoCredentialsForUser(String),
    /// The device is not a FIDO2 authenticator (legacy U2F-only).
    NotFido2,
    /// CTAP-level failure reported by the authenticator.
    Ctap(CtapError),
    /// Unexpected adapter failure.
    Internal(String),
}

impl Error {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::Cancelled)
    }

    /// Precedence used when every racing worker failed: lower ranks are more
    /// specific and win. `NoCredentials` beats PIN errors, which beat
    /// unsupported options, which beat everything else.
    pub(crate) fn specificity(&self) -> u8 {
        match self {
            Self::Ctap(CtapError::NoCredentials) => 0,
            Self::NoCredentialsForUser(_) => 0,
            Self::Ctap(CtapError::PinInvalid)
            | Self::Ctap(CtapError::PinRequired)
            | Self::Ctap(CtapError::PinBlocked) => 1,
            Self::Ctap(CtapError::UnsupportedOption) => 2,
            Self::Ctap(_) => 3,
            Self::UserVerification => 3,
            Self::NotFido2 => 4,
            _ => 5,
        }
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(what) => write!(f, "{} required", what),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::UserVerification => write!(f, "user verification function failed"),
            Self::NoCredentialsForUser(user) => {
                write!(f, "no credentials for user {:?}", user)
            }
            Self::NotFido2 => write!(f, "device is not a FIDO2 authenticator"),
            Self::Ctap(err) => err.fmt(f),
            Self::Internal(msg) => write!(f, "internal: {}", msg),
        }
    }
}

impl From<CtapError> for Error {
    fn from(error: CtapError) -> Self {
        Error::Ctap(error)
    }
}

/// Picks the most specific error out of a failed race, per the precedence
/// above. Returns `DeadlineExceeded` when nothing was collected at all.
pub(crate) fn most_specific(errors: Vec<Error>) -> Error {
    errors
        .into_iter()
        .min_by_key(Error::specificity)
        .unwrap_or(Error::DeadlineExceeded)
}
