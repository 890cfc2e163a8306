/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use super::IcapSessionState;
use crate::{IcapFutureError, IcapScanError, IcapScanResult};

pub(super) type ScanOutcome = Result<IcapScanResult, IcapScanError>;

const BLOCKING_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pending result of one scan.
///
/// It can be awaited in async code, or waited on with [`blocking_get`]
/// from outside of the runtime. Dropping it does not cancel the scan.
///
/// [`blocking_get`]: IcapScanFuture::blocking_get
pub struct IcapScanFuture {
    receiver: Option<oneshot::Receiver<ScanOutcome>>,
    outcome: Option<ScanOutcome>,
}

impl IcapScanFuture {
    pub(super) fn new(receiver: oneshot::Receiver<ScanOutcome>) -> Self {
        IcapScanFuture {
            receiver: Some(receiver),
            outcome: None,
        }
    }

    pub(super) fn ready(outcome: ScanOutcome) -> Self {
        IcapScanFuture {
            receiver: None,
            outcome: Some(outcome),
        }
    }

    fn dropped() -> IcapScanError {
        IcapScanError::Disconnected(IcapSessionState::Disconnected)
    }

    fn take_outcome(&mut self) -> ScanOutcome {
        self.outcome
            .take()
            .unwrap_or(Err(IcapScanError::InternalError("scan result already taken")))
    }

    pub fn is_done(&mut self) -> bool {
        if self.outcome.is_some() {
            return true;
        }
        let Some(receiver) = &mut self.receiver else {
            return true;
        };
        match receiver.try_recv() {
            Ok(outcome) => {
                self.outcome = Some(outcome);
                self.receiver = None;
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                self.outcome = Some(Err(Self::dropped()));
                self.receiver = None;
                true
            }
        }
    }

    /// Wait at most `timeout` for the result, the future can be waited again on timeout
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<IcapScanResult, IcapFutureError> {
        match tokio::time::timeout(timeout, &mut *self).await {
            Ok(r) => r.map_err(IcapFutureError::Failed),
            Err(_) => Err(IcapFutureError::WaitTimeout),
        }
    }

    /// Wait for the result from a thread that is not driving the async runtime.
    ///
    /// With a timeout the future is polled every 10ms until it is done.
    pub fn blocking_get(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<IcapScanResult, IcapFutureError> {
        let Some(timeout) = timeout else {
            if let Some(receiver) = self.receiver.take() {
                let outcome = receiver.blocking_recv().unwrap_or(Err(Self::dropped()));
                self.outcome = Some(outcome);
            }
            return self.take_outcome().map_err(IcapFutureError::Failed);
        };

        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.is_done() {
                return self.take_outcome().map_err(IcapFutureError::Failed);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Err(IcapFutureError::WaitTimeout);
            }
            std::thread::sleep(BLOCKING_POLL_INTERVAL.min(deadline - now));
        }
    }
}

impl Future for IcapScanFuture {
    type Output = ScanOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.outcome.take() {
            return Poll::Ready(outcome);
        }
        let Some(receiver) = &mut self.receiver else {
            return Poll::Ready(Err(IcapScanError::InternalError(
                "scan result already taken",
            )));
        };
        match Pin::new(receiver).poll(cx) {
            Poll::Ready(r) => {
                self.receiver = None;
                Poll::Ready(r.unwrap_or(Err(Self::dropped())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for IcapScanFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcapScanFuture")
            .field("ready", &self.outcome.is_some())
            .finish_non_exhaustive()
    }
}
