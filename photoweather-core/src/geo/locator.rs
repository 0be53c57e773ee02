//! Bridges a callback-style location source into a single bounded await.

use std::{fmt::Debug, time::Duration};

use tokio::sync::oneshot;

use crate::model::Location;

/// Invoked at most once with the last known fix, or `None` if there is none.
pub type LocationCallback = Box<dyn FnOnce(Option<Location>) + Send + 'static>;

/// A platform location service that answers through a callback.
///
/// Implementations may call back on any thread, later, or never.
pub trait LocationProvider: Send + Sync + Debug {
    fn request_last_location(&self, callback: LocationCallback);
}

/// Awaits one answer from a [`LocationProvider`] with a deadline.
#[derive(Debug)]
pub struct OneShotLocator<P> {
    provider: P,
    timeout: Duration,
}

impl<P: LocationProvider> OneShotLocator<P> {
    pub fn new(provider: P, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// `None` when the provider reports no fix, drops the callback, or misses the deadline.
    pub async fn locate(&self) -> Option<Location> {
        let (tx, rx) = oneshot::channel();
        self.provider.request_last_location(Box::new(move |location| {
            // The receiver is gone once the deadline passed.
            let _ = tx.send(location);
        }));

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(location)) => location,
            Ok(Err(_)) => {
                tracing::warn!("location provider dropped the request without answering");
                None
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "timed out waiting for a location fix");
                None
            }
        }
    }
}

/// Answers with a fixed last known fix, e.g. from configuration or flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredLocation {
    fix: Option<Location>,
}

impl ConfiguredLocation {
    pub fn new(fix: Option<Location>) -> Self {
        Self { fix }
    }
}

impl LocationProvider for ConfiguredLocation {
    fn request_last_location(&self, callback: LocationCallback) {
        let fix = self.fix;
        // Deliver asynchronously, as a platform service would.
        tokio::spawn(async move { callback(fix) });
    }
}
