/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::future::ScanOutcome;
use super::{
    BoxIcapStream, IcapSessionContext, IcapSessionState, ScanRequest, SessionCommand,
    SessionShared,
};
use crate::{IcapResponseMessage, IcapScanError};

const READ_BUFFER_SIZE: usize = 8192;

pub(super) struct IcapSessionTask {
    shared: Arc<SessionShared>,
    stream: BoxIcapStream,
    cmd_receiver: mpsc::UnboundedReceiver<SessionCommand>,
    ctx: Arc<IcapSessionContext>,
    read_buf: BytesMut,
    message: IcapResponseMessage,
    pending: Option<ScanRequest>,
    chunk_end_left: &'static [u8],
    handles_dropped: bool,
}

impl IcapSessionTask {
    pub(super) fn new(
        shared: Arc<SessionShared>,
        stream: BoxIcapStream,
        cmd_receiver: mpsc::UnboundedReceiver<SessionCommand>,
        ctx: Arc<IcapSessionContext>,
    ) -> Self {
        let message = IcapResponseMessage::new(ctx.config.max_header_size);
        IcapSessionTask {
            shared,
            stream,
            cmd_receiver,
            ctx,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            message,
            pending: None,
            chunk_end_left: &[],
            handles_dropped: false,
        }
    }

    #[inline]
    fn id(&self) -> u64 {
        self.shared.id
    }

    pub(super) async fn into_running(mut self) {
        let idle_timeout = self.ctx.config.inactivity_timeout;
        let idle_sleep = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle_sleep);

        loop {
            let keep_running = tokio::select! {
                r = self.cmd_receiver.recv(), if !self.handles_dropped => {
                    match r {
                        Some(SessionCommand::Scan(req)) => self.start_scan(req).await,
                        Some(SessionCommand::Close) => {
                            debug!("icap session {}: closed by user", self.id());
                            self.close().await;
                            false
                        }
                        None => {
                            self.handles_dropped = true;
                            if self.pending.is_none() {
                                self.close().await;
                                false
                            } else {
                                true
                            }
                        }
                    }
                }
                r = self.stream.read_buf(&mut self.read_buf) => {
                    match r {
                        Ok(0) => {
                            self.on_disconnect(None);
                            false
                        }
                        Ok(_) => self.handle_inbound().await,
                        Err(e) => {
                            self.on_disconnect(Some(e));
                            false
                        }
                    }
                }
                _ = &mut idle_sleep => {
                    self.on_timeout().await;
                    false
                }
            };
            if !keep_running {
                break;
            }
            idle_sleep.as_mut().reset(Instant::now() + idle_timeout);
        }
    }

    async fn start_scan(&mut self, req: ScanRequest) -> bool {
        if self.shared.state() != IcapSessionState::AwaitingOptions {
            // closed after the scan has been claimed
            let _ = req
                .result_sender
                .send(Err(IcapScanError::Disconnected(self.shared.state())));
            self.close().await;
            return false;
        }

        self.message.reset();
        self.read_buf.clear();
        self.pending = Some(req);

        let options = self.ctx.producer.build_options(&self.shared.route);
        debug!("icap session {}: sending OPTIONS request", self.id());
        if let Err(e) = self.write_request(&options, &[], &[]).await {
            self.fail_and_close(IcapScanError::ScanRequestFailed(e))
                .await;
            return false;
        }
        true
    }

    async fn send_respmod(&mut self) -> io::Result<()> {
        let Some(req) = &self.pending else {
            return Ok(());
        };
        let respmod = self.ctx.producer.build_respmod(
            &self.shared.route,
            &req.filename,
            req.data.clone(),
            self.shared.reuse_session,
        );
        debug!(
            "icap session {}: sending RESPMOD request of {} bytes",
            self.id(),
            respmod.encoded_len()
        );
        self.write_request(&respmod.header, &respmod.payload, respmod.trailer)
            .await
    }

    async fn write_request(&mut self, header: &[u8], payload: &[u8], trailer: &[u8]) -> io::Result<()> {
        let timeout = self.ctx.config.inactivity_timeout;
        let stream = &mut self.stream;
        let write = async {
            stream.write_all(header).await?;
            if !payload.is_empty() {
                stream.write_all(payload).await?;
            }
            if !trailer.is_empty() {
                stream.write_all(trailer).await?;
            }
            stream.flush().await
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(r) => r,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "write to icap server timed out",
            )),
        }
    }

    /// Drop the rest of the last response that arrived after it was done
    fn skip_chunk_end(&mut self) {
        let left = self.chunk_end_left;
        let n = left
            .iter()
            .zip(self.read_buf.iter())
            .take_while(|(a, b)| a == b)
            .count();
        self.read_buf.advance(n);
        self.chunk_end_left = if self.read_buf.is_empty() {
            &left[n..]
        } else {
            &[]
        };
    }

    async fn handle_inbound(&mut self) -> bool {
        self.skip_chunk_end();
        if self.read_buf.is_empty() {
            return true;
        }
        if self.pending.is_none() {
            debug!(
                "icap session {}: discard {} unexpected bytes in state {}",
                self.id(),
                self.read_buf.len(),
                self.shared.state()
            );
            self.read_buf.clear();
            return true;
        }

        self.message
            .parse(&mut self.read_buf, self.ctx.consumer.as_ref());
        if !self.message.is_parsing_done() {
            return true;
        }
        debug!(
            "icap session {}: response received in state {}: {}",
            self.id(),
            self.shared.state(),
            self.message
        );

        match self.shared.state() {
            IcapSessionState::AwaitingOptions => {
                if let Err(e) = self.message.take_outcome() {
                    self.fail_and_close(e).await;
                    return false;
                }
                self.message.reset();
                self.shared.set_state(IcapSessionState::AwaitingScan);
                if let Err(e) = self.send_respmod().await {
                    self.fail_and_close(IcapScanError::ScanRequestFailed(e))
                        .await;
                    return false;
                }
                true
            }
            IcapSessionState::AwaitingScan => {
                let outcome = self.message.take_outcome();
                self.chunk_end_left = self.message.chunk_end_left();
                self.message.reset();
                if self.shared.reuse_session && outcome.is_ok() && !self.handles_dropped {
                    self.shared.set_state(IcapSessionState::Connected);
                    self.finish(outcome);
                    true
                } else {
                    self.shared.set_state(IcapSessionState::Disconnected);
                    self.finish(outcome);
                    self.close().await;
                    false
                }
            }
            state => {
                // closed by the user while waiting for the response
                self.fail_and_close(IcapScanError::Disconnected(state))
                    .await;
                false
            }
        }
    }

    fn finish(&mut self, outcome: ScanOutcome) {
        if let Some(req) = self.pending.take() {
            let _ = req.result_sender.send(outcome);
        }
    }

    async fn fail_and_close(&mut self, e: IcapScanError) {
        debug!("icap session {}: scan failed: {e}", self.id());
        self.shared.set_state(IcapSessionState::Disconnected);
        self.finish(Err(e));
        self.close().await;
    }

    async fn on_timeout(&mut self) {
        debug!(
            "icap session {}: inactivity timeout in state {}",
            self.id(),
            self.shared.state()
        );
        self.shared.set_state(IcapSessionState::Disconnected);
        self.finish(Err(IcapScanError::InactivityTimeout));
        self.close().await;
    }

    fn on_disconnect(&mut self, e: Option<io::Error>) {
        let prev_state = self.shared.state();
        match e {
            Some(e) => debug!(
                "icap session {}: read failed in state {prev_state}: {e}",
                self.id()
            ),
            None => debug!(
                "icap session {}: closed by server in state {prev_state}",
                self.id()
            ),
        }
        self.shared.set_state(IcapSessionState::Disconnected);
        if self.pending.is_none() {
            return;
        }
        let e = if self.message.set_truncated() {
            match self.message.take_outcome() {
                Err(e) => e,
                Ok(_) => IcapScanError::Disconnected(prev_state),
            }
        } else {
            IcapScanError::Disconnected(prev_state)
        };
        self.finish(Err(e));
    }

    async fn close(&mut self) {
        self.shared.set_state(IcapSessionState::Disconnected);
        self.pending = None;
        self.read_buf.clear();
        let _ = tokio::time::timeout(Duration::from_secs(1), self.stream.shutdown()).await;
    }
}
