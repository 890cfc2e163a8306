/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod parse;
pub use parse::IcapLineParseError;

mod error;
pub use error::{IcapFutureError, IcapParseError, IcapScanError};

mod result;
pub use result::{IcapScanResult, ScanDisposition};

mod route;
pub use route::{ICAP_DEFAULT_PORT, IcapRoute};

mod message;
pub use message::{IcapResponseMessage, ParseStage};

pub mod consumer;
pub mod producer;

mod config;
pub use config::{IcapScanConfig, IcapVendorStyle};

mod session;
pub use session::{
    BoxIcapStream, IcapConnector, IcapScanFuture, IcapSession, IcapSessionState, IcapStream,
    TcpConnector,
};

mod pool;
pub use pool::{IcapPoolSession, IcapRouteSessionPool, IcapSessionCreator};

mod client;
pub use client::{IcapScanClient, IcapSessionConnector};

#[cfg(test)]
mod testing;
