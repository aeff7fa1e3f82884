use std::sync::Arc;

use async_trait::async_trait;
use hidapi::HidApi;
use tracing::{debug, info};

use crate::error::Error;
use crate::transport::device::FidoDevice;

/// Enumerates the paths of currently plugged authenticators.
///
/// The ceremony polls this repeatedly; implementations may be "metered" and
/// answer with an incomplete (even empty) set for the first few polls.
/// Enumeration never opens a device; transient failures surface as an empty
/// set on the next poll.
#[async_trait]
pub trait DeviceLocator: Send + Sync {
    async fn current_locations(&self) -> Result<Vec<String>, Error>;
}

/// Opens a device handle for a located path.
#[async_trait]
pub trait DeviceFactory: Send + Sync {
    async fn open(&self, path: &str) -> Result<Arc<dyn FidoDevice>, Error>;
}

/// USB HID enumeration, filtered to the FIDO usage page.
pub struct UsbHidLocator;

const FIDO_USAGE_PAGE: u16 = 0xF1D0;
const FIDO_USAGE_CTAPHID: u16 = 0x0001;

#[async_trait]
impl DeviceLocator for UsbHidLocator {
    async fn current_locations(&self) -> Result<Vec<String>, Error> {
        let hidapi = HidApi::new()
            .map_err(|err| Error::Internal(format!("hidapi unavailable: {}", err)))?;
        let locations: Vec<String> = hidapi
            .device_list()
            .filter(|device| device.usage_page() == FIDO_USAGE_PAGE)
            .filter(|device| device.usage() == FIDO_USAGE_CTAPHID)
            .map(|device| device.path().to_string_lossy().into_owned())
            .collect();
        info!({ count = locations.len() }, "Enumerated HID authenticators");
        debug!(?locations);
        Ok(locations)
    }
}
