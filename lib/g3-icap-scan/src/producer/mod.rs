/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Serialization of the ICAP requests sent for one scan.

use bytes::Bytes;

use crate::IcapRoute;

mod respmod;
pub use respmod::{DefaultRequestProducer, RESPMOD_TRAILER};

/// A RESPMOD request split so that the payload is written without copy
pub struct RespmodRequest {
    pub header: Vec<u8>,
    pub payload: Bytes,
    pub trailer: &'static [u8],
}

impl RespmodRequest {
    pub fn encoded_len(&self) -> usize {
        self.header.len() + self.payload.len() + self.trailer.len()
    }
}

pub trait IcapRequestProducer: Send + Sync {
    fn build_options(&self, route: &IcapRoute) -> Vec<u8>;

    fn build_respmod(
        &self,
        route: &IcapRoute,
        filename: &str,
        payload: Bytes,
        keep_alive: bool,
    ) -> RespmodRequest;
}
