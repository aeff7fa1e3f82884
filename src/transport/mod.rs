pub mod device;
pub mod locator;

pub use device::{
    Assertion, AssertionOpts, AssertionRequest, Attestation, AttestationFormat, DeviceInfo,
    FidoDevice, MakeCredentialOpts, MakeCredentialRequest,
};
pub use locator::{DeviceFactory, DeviceLocator, UsbHidLocator};
