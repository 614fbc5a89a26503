//! ICMP reachability checks.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::ExecError;
use crate::retry;
use crate::tlw::Access;

#[derive(Clone)]
pub struct Pinger {
    access: Arc<dyn Access>,
    resource: String,
    cancel: CancellationToken,
}

impl Pinger {
    pub fn new(access: Arc<dyn Access>, resource: impl Into<String>) -> Self {
        Self {
            access,
            resource: resource.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Send `count` echo requests; succeeds if any reply arrived.
    pub async fn ping(&self, count: u32) -> Result<(), ExecError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ExecError::cancelled(format!(
                "ping {:?}: cancelled",
                self.resource
            ))),
            res = self.access.ping(&self.resource, count) => res
                .map_err(|e| ExecError::from(e).annotate(format!("ping {:?}", self.resource))),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Ping until the resource answers or `timeout` elapses.
pub async fn wait_until_pingable(
    pinger: &Pinger,
    timeout: Duration,
    interval: Duration,
    count: u32,
) -> Result<(), ExecError> {
    let label = format!("wait to ping {}", pinger.resource());
    retry::with_timeout(pinger.cancel_token(), interval, timeout, &label, || {
        pinger.ping(count)
    })
    .await
}

/// Ping until the resource stops answering or `timeout` elapses.
pub async fn wait_until_not_pingable(
    pinger: &Pinger,
    timeout: Duration,
    interval: Duration,
    count: u32,
) -> Result<(), ExecError> {
    let label = format!("wait to drop {}", pinger.resource());
    retry::with_timeout(pinger.cancel_token(), interval, timeout, &label, || async {
        match pinger.ping(count).await {
            Ok(()) => Err(ExecError::new(format!(
                "{:?} is still pingable",
                pinger.resource()
            ))),
            Err(e) if e.is_fatal() => Err(e),
            Err(_) => Ok(()),
        }
    })
    .await
}
