/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;

use crate::IcapScanError;
use crate::consumer::{IcapResponseConsumer, ResponseInfoConsumer, ViolationsResponseConsumer};
use crate::producer::{DefaultRequestProducer, IcapRequestProducer};

#[cfg(feature = "yaml")]
mod yaml;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_SESSIONS_PER_ROUTE: usize = 128;
const DEFAULT_MAX_ROUTES: usize = 64;
const DEFAULT_MAX_SESSION_TIME: Duration = Duration::from_secs(5 * 60 * 60);
const DEFAULT_MAX_COMMAND_COUNT: u64 = i32::MAX as u64;
const DEFAULT_MAX_HEADER_SIZE: usize = 64 * 1024;

/// How scan verdicts are reported in the server responses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IcapVendorStyle {
    /// `X-Violations-Found` with violation records
    #[default]
    Violations,
    /// `X-Response-Info` with `Clean` or another verdict
    ResponseInfo,
}

impl FromStr for IcapVendorStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "violations" | "x_violations_found" | "symantec" => Ok(IcapVendorStyle::Violations),
            "response_info" | "x_response_info" | "avira" => Ok(IcapVendorStyle::ResponseInfo),
            _ => Err(anyhow!("unsupported icap vendor style {s}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IcapScanConfig {
    pub(crate) connect_timeout: Duration,
    pub(crate) inactivity_timeout: Duration,
    pub(crate) max_sessions_per_route: usize,
    pub(crate) reuse_session: bool,
    pub(crate) max_routes: usize,
    pub(crate) max_session_time: Duration,
    pub(crate) max_command_count: u64,
    pub(crate) max_header_size: usize,
    pub(crate) user_agent: String,
    pub(crate) default_service: String,
    pub(crate) vendor: IcapVendorStyle,
}

impl Default for IcapScanConfig {
    fn default() -> Self {
        IcapScanConfig {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            max_sessions_per_route: DEFAULT_MAX_SESSIONS_PER_ROUTE,
            reuse_session: true,
            max_routes: DEFAULT_MAX_ROUTES,
            max_session_time: DEFAULT_MAX_SESSION_TIME,
            max_command_count: DEFAULT_MAX_COMMAND_COUNT,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            user_agent: format!("G3 ICAP Scan Client/{}", env!("CARGO_PKG_VERSION")),
            default_service: DefaultRequestProducer::DEFAULT_SERVICE.to_string(),
            vendor: IcapVendorStyle::default(),
        }
    }
}

impl IcapScanConfig {
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    pub fn set_inactivity_timeout(&mut self, timeout: Duration) {
        self.inactivity_timeout = timeout;
    }

    /// Set the max number of sessions for each route, 0 means no limit
    pub fn set_max_sessions_per_route(&mut self, max: usize) {
        self.max_sessions_per_route = max;
    }

    pub fn set_reuse_session(&mut self, reuse: bool) {
        self.reuse_session = reuse;
    }

    pub fn set_max_routes(&mut self, max: usize) {
        self.max_routes = max;
    }

    pub fn set_max_session_time(&mut self, time: Duration) {
        self.max_session_time = time;
    }

    pub fn set_max_command_count(&mut self, count: u64) {
        self.max_command_count = count;
    }

    pub fn set_max_header_size(&mut self, size: usize) {
        self.max_header_size = size;
    }

    pub fn set_user_agent(&mut self, user_agent: String) {
        self.user_agent = user_agent;
    }

    pub fn set_default_service(&mut self, service: String) {
        self.default_service = service;
    }

    pub fn set_vendor(&mut self, vendor: IcapVendorStyle) {
        self.vendor = vendor;
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[inline]
    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity_timeout
    }

    #[inline]
    pub fn reuse_session(&self) -> bool {
        self.reuse_session
    }

    #[inline]
    pub fn max_sessions_per_route(&self) -> usize {
        self.max_sessions_per_route
    }

    #[inline]
    pub fn max_routes(&self) -> usize {
        self.max_routes
    }

    #[inline]
    pub fn vendor(&self) -> IcapVendorStyle {
        self.vendor
    }

    pub(crate) fn check(&self) -> Result<(), IcapScanError> {
        if self.reuse_session && self.max_sessions_per_route == 0 {
            return Err(IcapScanError::ConnectionReuseNotImplemented);
        }
        Ok(())
    }

    pub(crate) fn build_producer(&self) -> Arc<dyn IcapRequestProducer> {
        let mut producer = DefaultRequestProducer::new(&self.user_agent);
        producer.set_default_service(&self.default_service);
        Arc::new(producer)
    }

    pub(crate) fn build_consumer(&self) -> Arc<dyn IcapResponseConsumer> {
        match self.vendor {
            IcapVendorStyle::Violations => Arc::new(ViolationsResponseConsumer::default()),
            IcapVendorStyle::ResponseInfo => Arc::new(ResponseInfoConsumer::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default() {
        let config = IcapScanConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_routes(), 64);
        assert_eq!(config.max_command_count, i32::MAX as u64);
        assert!(config.reuse_session());
        assert!(config.check().is_ok());
    }

    #[test]
    fn reuse_without_limit() {
        let mut config = IcapScanConfig::default();
        config.set_max_sessions_per_route(0);
        assert!(matches!(
            config.check(),
            Err(IcapScanError::ConnectionReuseNotImplemented)
        ));

        config.set_reuse_session(false);
        assert!(config.check().is_ok());
    }

    #[test]
    fn vendor_style() {
        assert_eq!(
            IcapVendorStyle::from_str("response-info").unwrap(),
            IcapVendorStyle::ResponseInfo
        );
        assert_eq!(
            IcapVendorStyle::from_str("Violations").unwrap(),
            IcapVendorStyle::Violations
        );
        assert!(IcapVendorStyle::from_str("unknown").is_err());
    }
}
