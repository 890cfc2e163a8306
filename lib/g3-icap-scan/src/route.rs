/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use url::{Host, Url};

pub const ICAP_DEFAULT_PORT: u16 = 1344;

/// The (host, port, service) triple that identifies an ICAP server endpoint
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IcapRoute {
    host: String,
    port: u16,
    service: String,
}

impl IcapRoute {
    pub fn new(host: &str, port: u16, service: &str) -> Self {
        IcapRoute {
            host: host.trim_matches(['[', ']']).to_string(),
            port,
            service: service.trim_start_matches('/').to_string(),
        }
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The service name without the leading '/', may be empty
    #[inline]
    pub fn service(&self) -> &str {
        &self.service
    }

    pub(crate) fn uri_host(&self) -> UriHost<'_> {
        UriHost(&self.host)
    }
}

/// Host formatted for use inside an URI, with brackets around ipv6 addresses
pub(crate) struct UriHost<'a>(&'a str);

impl fmt::Display for UriHost<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.contains(':') {
            write!(f, "[{}]", self.0)
        } else {
            f.write_str(self.0)
        }
    }
}

impl fmt::Display for IcapRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "icap://{}:{}/{}",
            self.uri_host(),
            self.port,
            self.service
        )
    }
}

impl TryFrom<&Url> for IcapRoute {
    type Error = anyhow::Error;

    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !url.scheme().eq_ignore_ascii_case("icap") {
            return Err(anyhow!("unsupported url scheme {}", url.scheme()));
        }
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(anyhow!("no host found in url {url}")),
        };
        let port = url.port().unwrap_or(ICAP_DEFAULT_PORT);
        Ok(IcapRoute::new(&host, port, url.path()))
    }
}

impl FromStr for IcapRoute {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s).map_err(|e| anyhow!("invalid url {s}: {e}"))?;
        IcapRoute::try_from(&url)
    }
}
