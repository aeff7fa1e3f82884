use num_enum::{IntoPrimitive, TryFromPrimitive};

// https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#error-responses
//
// The numeric values double as libfido2 error codes; Display follows
// libfido2's rendering so callers can match on the usual messages.

#[derive(Debug, IntoPrimitive, TryFromPrimitive, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum CtapError {
    Ok = 0x00,                   // CTAP1_ERR_SUCCESS, CTAP2_OK
    InvalidCommand = 0x01,       // CTAP1_ERR_INVALID_COMMAND
    InvalidParameter = 0x02,     // CTAP1_ERR_INVALID_PARAMETER
    InvalidLength = 0x03,        // CTAP1_ERR_INVALID_LENGTH
    Timeout = 0x05,              // CTAP1_ERR_TIMEOUT
    ChannelBusy = 0x06,          // CTAP1_ERR_CHANNEL_BUSY
    InvalidCbor = 0x12,          // CTAP2_ERR_INVALID_CBOR
    MissingParameter = 0x14,     // CTAP2_ERR_MISSING_PARAMETER
    CredentialExcluded = 0x19,   // CTAP2_ERR_CREDENTIAL_EXCLUDED
    UnsupportedAlgorithm = 0x26, // CTAP2_ERR_UNSUPPORTED_ALGORITHM
    OperationDenied = 0x27,      // CTAP2_ERR_OPERATION_DENIED
    KeyStoreFull = 0x28,         // CTAP2_ERR_KEY_STORE_FULL
    UnsupportedOption = 0x2B,    // CTAP2_ERR_UNSUPPORTED_OPTION
    InvalidOption = 0x2C,        // CTAP2_ERR_INVALID_OPTION
    KeepAliveCancel = 0x2D,      // CTAP2_ERR_KEEPALIVE_CANCEL
    NoCredentials = 0x2E,        // CTAP2_ERR_NO_CREDENTIALS
    UserActionTimeout = 0x2F,    // CTAP2_ERR_USER_ACTION_TIMEOUT
    NotAllowed = 0x30,           // CTAP2_ERR_NOT_ALLOWED
    PinInvalid = 0x31,           // CTAP2_ERR_PIN_INVALID
    PinBlocked = 0x32,           // CTAP2_ERR_PIN_BLOCKED
    PinAuthInvalid = 0x33,       // CTAP2_ERR_PIN_AUTH_INVALID
    PinAuthBlocked = 0x34,       // CTAP2_ERR_PIN_AUTH_BLOCKED
    PinNotSet = 0x35,            // CTAP2_ERR_PIN_NOT_SET
    PinRequired = 0x36,          // CTAP2_ERR_PIN_REQUIRED
    PinPolicyViolation = 0x37,   // CTAP2_ERR_PIN_POLICY_VIOLATION
    RequestTooLarge = 0x39,      // CTAP2_ERR_REQUEST_TOO_LARGE
    ActionTimeout = 0x3A,        // CTAP2_ERR_ACTION_TIMEOUT
    UserPresenceRequired = 0x3B, // CTAP2_ERR_UP_REQUIRED
    UvBlocked = 0x3C,            // CTAP2_ERR_UV_BLOCKED
    UvInvalid = 0x3F,            // CTAP2_ERR_UV_INVALID
    Other = 0x7F,                // CTAP1_ERR_OTHER
}

impl CtapError {
    /// UV failures some authenticators report spuriously; callers retry a
    /// bounded number of times before surfacing them.
    pub fn is_retryable_uv_error(&self) -> bool {
        matches!(self, Self::UvInvalid)
    }
}

impl std::error::Error for CtapError {}

impl std::fmt::Display for CtapError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // Match libfido2: a handful of codes have well-known messages, the
        // rest render as the bare code.
        match self {
            Self::NoCredentials => write!(f, "no credentials"),
            Self::PinRequired => write!(f, "pin required"),
            Self::PinInvalid => write!(f, "pin invalid"),
            Self::PinBlocked => write!(f, "pin blocked"),
            Self::UnsupportedOption => write!(f, "unsupported option"),
            Self::KeepAliveCancel => write!(f, "keep alive cancelled"),
            Self::UserActionTimeout => write!(f, "user action timeout"),
            _ => write!(f, "libfido2 error {}", u8::from(*self)),
        }
    }
}
