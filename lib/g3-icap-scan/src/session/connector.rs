/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::IcapRoute;

pub trait IcapStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> IcapStream for T {}

pub type BoxIcapStream = Box<dyn IcapStream>;

/// Transport used by sessions to reach the ICAP server of a route
#[async_trait]
pub trait IcapConnector: Send + Sync {
    async fn connect(&self, route: &IcapRoute) -> io::Result<BoxIcapStream>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector {}

impl TcpConnector {
    async fn select_peer_addr(route: &IcapRoute) -> io::Result<SocketAddr> {
        if let Ok(ip) = IpAddr::from_str(route.host()) {
            return Ok(SocketAddr::new(ip, route.port()));
        }

        let mut addrs = tokio::net::lookup_host((route.host(), route.port())).await?;
        addrs
            .next()
            .ok_or_else(|| io::Error::other("no resolved socket address"))
    }
}

#[async_trait]
impl IcapConnector for TcpConnector {
    async fn connect(&self, route: &IcapRoute) -> io::Result<BoxIcapStream> {
        let peer = Self::select_peer_addr(route).await?;
        let stream = TcpStream::connect(peer).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
