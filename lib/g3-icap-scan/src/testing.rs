/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::producer::RESPMOD_TRAILER;
use crate::session::IcapSessionContext;
use crate::{BoxIcapStream, IcapConnector, IcapRoute, IcapScanConfig};

pub(crate) const OPTIONS_RESPONSE: &[u8] = b"ICAP/1.0 200 OK\r\n\
    Methods: RESPMOD\r\n\
    ISTag: \"CE2CECDA7FA257776EC1E8B63060EB49\"\r\n\
    Service-ID: SYMCSCANRESP-AV\r\n\
    Encapsulated: null-body=0\r\n\
    \r\n";

pub(crate) const INFECTED_RESPONSE: &[u8] = b"ICAP/1.0 201 Created\r\n\
    ISTag: \"CE2CECDA7FA257776EC1E8B63060EB49\"\r\n\
    X-Violations-Found: 1\r\n\
    test.txt\r\n\
    EICAR Test String\r\n\
    11101\r\n\
    0\r\n\
    Encapsulated: res-hdr=0, res-body=59\r\n\
    \r\n\
    HTTP/1.1 200 OK\r\n\
    Via: 1.1 Symantec Scan Engine (ICAP)\r\n\
    \r\n\
    6\r\n\
    Virus!\r\n\
    0\r\n\
    \r\n";

pub(crate) const CLEAN_RESPONSE: &[u8] = b"ICAP/1.0 200 OK\r\n\
    ISTag: \"CE2CECDA7FA257776EC1E8B63060EB49\"\r\n\
    Encapsulated: res-hdr=0, res-body=57\r\n\
    \r\n\
    HTTP/1.1 200 OK\r\n\
    Via: 1.1 Symantec Scan Engine (ICAP)\r\n\
    \r\n\
    4\r\n\
    abcd\r\n\
    0\r\n\
    \r\n";

/// Connector handing the server side of an in-memory stream to the test
pub(crate) struct DuplexConnector {
    server_sender: mpsc::UnboundedSender<DuplexStream>,
    pub(crate) connects: AtomicUsize,
}

impl DuplexConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (server_sender, server_receiver) = mpsc::unbounded_channel();
        let connector = DuplexConnector {
            server_sender,
            connects: AtomicUsize::new(0),
        };
        (Arc::new(connector), server_receiver)
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl IcapConnector for DuplexConnector {
    async fn connect(&self, _route: &IcapRoute) -> io::Result<BoxIcapStream> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.server_sender
            .send(server)
            .map_err(|_| io::Error::other("test server has gone"))?;
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(client))
    }
}

pub(crate) fn new_context(
    config: IcapScanConfig,
    connector: Arc<dyn IcapConnector>,
) -> Arc<IcapSessionContext> {
    Arc::new(IcapSessionContext {
        producer: config.build_producer(),
        consumer: config.build_consumer(),
        config: Arc::new(config),
        connector,
    })
}

pub(crate) fn test_route() -> IcapRoute {
    IcapRoute::new("127.0.0.1", 1344, "SYMCScanResp-AV")
}

/// Read until the received data ends with `suffix`, None on EOF
pub(crate) async fn read_until(stream: &mut DuplexStream, suffix: &[u8]) -> Option<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if data.ends_with(suffix) {
            return Some(data);
        }
    }
}

/// Serve one OPTIONS and RESPMOD exchange, returning the RESPMOD request
pub(crate) async fn serve_scan(stream: &mut DuplexStream, response: &[u8]) -> Option<Vec<u8>> {
    read_until(stream, b"\r\n\r\n").await?;
    stream.write_all(OPTIONS_RESPONSE).await.ok()?;
    let req = read_until(stream, RESPMOD_TRAILER).await?;
    stream.write_all(response).await.ok()?;
    Some(req)
}

pub(crate) fn spawn_server(
    mut server_receiver: mpsc::UnboundedReceiver<DuplexStream>,
    response: &'static [u8],
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(mut stream) = server_receiver.recv().await {
            tokio::spawn(async move {
                while serve_scan(&mut stream, response).await.is_some() {}
            });
        }
    })
}
