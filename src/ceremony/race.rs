use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, trace, warn};

use crate::ceremony::cancel::CancelSignal;
use crate::error::{most_specific, CtapError, Error};
use crate::transport::device::{DeviceInfo, FidoDevice};
use crate::transport::locator::{DeviceFactory, DeviceLocator};

/// A plugged authenticator retained for the race. `info` is `None` for
/// legacy U2F-only devices, which only the fallback paths may use.
#[derive(Clone)]
pub(crate) struct Candidate {
    pub path: String,
    pub device: Arc<dyn FidoDevice>,
    pub info: Option<DeviceInfo>,
}

impl Candidate {
    /// Capability flags; a legacy device reports none.
    pub fn info(&self) -> DeviceInfo {
        self.info.unwrap_or_default()
    }
}

/// Ceremony-specific behavior plugged into the device race.
#[async_trait]
pub(crate) trait Driver: Sync {
    type Output: Send;

    /// Whether a probed device takes part in the race.
    fn eligible(&self, candidate: &Candidate) -> bool;

    /// Runs once, before the first batch of workers spawns: collect the
    /// ceremony PIN if the batch demands one, then announce the touch.
    async fn prepare(&self, batch: &[Candidate]) -> Result<(), Error>;

    /// One device's bid for the ceremony; the first success wins.
    async fn attempt(&self, candidate: &Candidate) -> Result<Self::Output, Error>;
}

pub(crate) struct RaceParams<'a> {
    pub locator: &'a dyn DeviceLocator,
    pub devices: &'a dyn DeviceFactory,
    pub poll_interval: Duration,
    pub deadline: Instant,
    pub cancel: CancelSignal,
}

// Polls without new devices tolerated after every spawned worker has failed,
// before the race gives up early instead of waiting out the deadline.
const IDLE_POLLS_BEFORE_GIVE_UP: u32 = 2;

/// Discovers devices at the configured poll interval, races one worker per
/// eligible device, and resolves the first success. Losing workers are
/// cancelled through their device handles and drained before returning, so
/// no handle sees another interaction after the winner transition.
pub(crate) async fn run<D: Driver>(
    params: RaceParams<'_>,
    driver: &D,
) -> Result<(Candidate, D::Output), Error> {
    let mut known: HashSet<String> = HashSet::new();
    let mut handles: Vec<Candidate> = Vec::new();
    let mut workers: FuturesUnordered<BoxFuture<'_, (Candidate, Result<D::Output, Error>)>> =
        FuturesUnordered::new();
    let mut errors: Vec<Error> = Vec::new();
    let mut prepared = false;
    let mut idle_polls = 0u32;

    loop {
        if Instant::now() >= params.deadline {
            finish(&handles, None, &mut workers).await;
            return Err(Error::DeadlineExceeded);
        }
        if params.cancel.is_cancelled() {
            finish(&handles, None, &mut workers).await;
            return Err(Error::Cancelled);
        }

        let batch = discover(&params, driver, &mut known).await;
        if batch.is_empty() {
            idle_polls = idle_polls.saturating_add(1);
        } else {
            if !prepared {
                if let Err(err) = driver.prepare(&batch).await {
                    finish(&handles, None, &mut workers).await;
                    return Err(err);
                }
                prepared = true;
            }
            idle_polls = 0;
            for candidate in batch {
                handles.push(candidate.clone());
                workers.push(Box::pin(async move {
                    let result = driver.attempt(&candidate).await;
                    (candidate, result)
                }));
            }
        }

        // Every plugged device already failed and nothing new showed up:
        // surface the most specific collected error rather than idling
        // until the deadline.
        if workers.is_empty() && !errors.is_empty() && idle_polls >= IDLE_POLLS_BEFORE_GIVE_UP {
            return Err(most_specific(errors));
        }

        tokio::select! {
            biased;

            Some((winner, result)) = workers.next(), if !workers.is_empty() => {
                match result {
                    Ok(output) => {
                        debug!(path = %winner.path, "Device won the ceremony race");
                        finish(&handles, Some(&winner.path), &mut workers).await;
                        return Ok((winner, output));
                    }
                    Err(Error::UserVerification) | Err(Error::Ctap(CtapError::UvBlocked)) => {
                        // The authenticator refused user verification; this
                        // is not recoverable on any sibling either.
                        finish(&handles, None, &mut workers).await;
                        return Err(Error::UserVerification);
                    }
                    Err(err) if err.is_terminal() => {
                        finish(&handles, None, &mut workers).await;
                        return Err(err);
                    }
                    Err(err) => {
                        debug!(path = %winner.path, %err, "Device dropped out of the race");
                        errors.push(err);
                    }
                }
            }
            _ = params.cancel.cancelled() => {
                finish(&handles, None, &mut workers).await;
                return Err(Error::Cancelled);
            }
            _ = sleep_until(params.deadline) => {
                finish(&handles, None, &mut workers).await;
                return Err(Error::DeadlineExceeded);
            }
            _ = sleep(params.poll_interval) => {}
        }
    }
}

/// Diffs the locator's current set against the paths already seen, opens and
/// probes every new one, and returns the eligible candidates. Probe failures
/// are discarded silently; enumeration failures count as "no devices yet".
async fn discover<D: Driver>(
    params: &RaceParams<'_>,
    driver: &D,
    known: &mut HashSet<String>,
) -> Vec<Candidate> {
    let locations = match params.locator.current_locations().await {
        Ok(locations) => locations,
        Err(err) => {
            trace!(%err, "Device enumeration failed, retrying on the next tick");
            return Vec::new();
        }
    };

    let mut batch = Vec::new();
    for path in locations {
        if !known.insert(path.clone()) {
            continue;
        }
        let device = match params.devices.open(&path).await {
            Ok(device) => device,
            Err(err) => {
                debug!(%path, %err, "Failed to open device, ignoring");
                continue;
            }
        };
        let info = match device.info().await {
            Ok(info) => Some(info),
            Err(Error::NotFido2) => {
                debug!(%path, "U2F-only device retained for legacy fallback");
                None
            }
            Err(err) => {
                debug!(%path, %err, "Device probe failed, ignoring");
                continue;
            }
        };
        let candidate = Candidate { path, device, info };
        if driver.eligible(&candidate) {
            batch.push(candidate);
        } else {
            trace!(path = %candidate.path, "Device not eligible for this ceremony");
        }
    }
    batch
}

/// Cancels every open handle except the winner's and waits for the losing
/// workers to unblock. Their cancellation errors are discarded.
async fn finish<T>(
    handles: &[Candidate],
    winner: Option<&str>,
    workers: &mut FuturesUnordered<BoxFuture<'_, (Candidate, Result<T, Error>)>>,
) {
    for candidate in handles {
        if Some(candidate.path.as_str()) != winner {
            candidate.device.cancel().await;
        }
    }
    while let Some((candidate, result)) = workers.next().await {
        if let Err(err) = result {
            trace!(path = %candidate.path, %err, "Cancelled worker unblocked");
        } else {
            warn!(path = %candidate.path, "Worker finished after the race was decided");
        }
    }
}
