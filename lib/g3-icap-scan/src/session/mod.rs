/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use log::debug;
use tokio::sync::{mpsc, oneshot};

use crate::consumer::IcapResponseConsumer;
use crate::producer::IcapRequestProducer;
use crate::{IcapRoute, IcapScanConfig, IcapScanError, IcapScanResult};

mod connector;
pub use connector::{BoxIcapStream, IcapConnector, IcapStream, TcpConnector};

mod future;
pub use future::IcapScanFuture;
use future::ScanOutcome;

mod task;
use task::IcapSessionTask;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum IcapSessionState {
    Disconnected = 0,
    Connected = 1,
    AwaitingOptions = 2,
    AwaitingScan = 3,
}

impl IcapSessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => IcapSessionState::Connected,
            2 => IcapSessionState::AwaitingOptions,
            3 => IcapSessionState::AwaitingScan,
            _ => IcapSessionState::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IcapSessionState::Disconnected => "Disconnected",
            IcapSessionState::Connected => "Connected",
            IcapSessionState::AwaitingOptions => "AwaitingOptions",
            IcapSessionState::AwaitingScan => "AwaitingScan",
        }
    }
}

impl fmt::Display for IcapSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a session needs besides its own connection
pub(crate) struct IcapSessionContext {
    pub(crate) config: Arc<IcapScanConfig>,
    pub(crate) connector: Arc<dyn IcapConnector>,
    pub(crate) producer: Arc<dyn IcapRequestProducer>,
    pub(crate) consumer: Arc<dyn IcapResponseConsumer>,
}

struct SessionShared {
    id: u64,
    route: IcapRoute,
    state: AtomicU8,
    created_at: Instant,
    command_count: AtomicU64,
    reuse_session: bool,
}

impl SessionShared {
    fn state(&self) -> IcapSessionState {
        IcapSessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: IcapSessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn claim(&self) -> Result<(), IcapSessionState> {
        self.state
            .compare_exchange(
                IcapSessionState::Connected as u8,
                IcapSessionState::AwaitingOptions as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(IcapSessionState::from_u8)
    }
}

struct ScanRequest {
    filename: String,
    data: Bytes,
    result_sender: oneshot::Sender<ScanOutcome>,
}

enum SessionCommand {
    Scan(ScanRequest),
    Close,
}

/// Handle to one ICAP connection.
///
/// The connection itself is driven by a spawned task, which is stopped when
/// the session is closed or the connection is lost. The task also stops once
/// all handles are dropped and no scan is in progress.
#[derive(Clone)]
pub struct IcapSession {
    shared: Arc<SessionShared>,
    cmd_sender: mpsc::UnboundedSender<SessionCommand>,
}

impl IcapSession {
    pub(crate) async fn connect(
        id: u64,
        route: IcapRoute,
        reuse_session: bool,
        ctx: &Arc<IcapSessionContext>,
    ) -> Result<Self, IcapScanError> {
        let stream = match tokio::time::timeout(
            ctx.config.connect_timeout,
            ctx.connector.connect(&route),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("icap session {id}: failed to connect to {route}: {e}");
                return Err(IcapScanError::NotConnected);
            }
            Err(_) => {
                debug!("icap session {id}: timed out to connect to {route}");
                return Err(IcapScanError::NotConnected);
            }
        };
        debug!("icap session {id}: connected to {route}");

        let shared = Arc::new(SessionShared {
            id,
            route,
            state: AtomicU8::new(IcapSessionState::Connected as u8),
            created_at: Instant::now(),
            command_count: AtomicU64::new(0),
            reuse_session,
        });
        let (cmd_sender, cmd_receiver) = mpsc::unbounded_channel();
        let task = IcapSessionTask::new(shared.clone(), stream, cmd_receiver, ctx.clone());
        tokio::spawn(task.into_running());

        Ok(IcapSession { shared, cmd_sender })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    #[inline]
    pub fn route(&self) -> &IcapRoute {
        &self.shared.route
    }

    #[inline]
    pub fn state(&self) -> IcapSessionState {
        self.shared.state()
    }

    #[inline]
    pub fn created_at(&self) -> Instant {
        self.shared.created_at
    }

    #[inline]
    pub fn command_count(&self) -> u64 {
        self.shared.command_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn reuse_session(&self) -> bool {
        self.shared.reuse_session
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.state() == IcapSessionState::Disconnected
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        self.state() == IcapSessionState::Connected
    }

    /// Start scanning `data` on this session.
    ///
    /// The session must be idle. Empty data is reported as clean at once,
    /// without any request sent to the server.
    pub fn scan_file(&self, filename: &str, data: Bytes) -> Result<IcapScanFuture, IcapScanError> {
        let busy_error = |state: IcapSessionState| match state {
            IcapSessionState::Disconnected => IcapScanError::NotConnected,
            _ => IcapScanError::SessionInUse,
        };

        let state = self.state();
        if state != IcapSessionState::Connected {
            return Err(busy_error(state));
        }
        if data.is_empty() {
            let mut result = IcapScanResult::clean();
            result.set_cleaned_bytes(data);
            return Ok(IcapScanFuture::ready(Ok(result)));
        }

        self.shared.claim().map_err(busy_error)?;
        self.shared.command_count.fetch_add(1, Ordering::Relaxed);

        let (result_sender, result_receiver) = oneshot::channel();
        let req = ScanRequest {
            filename: filename.to_string(),
            data,
            result_sender,
        };
        if self.cmd_sender.send(SessionCommand::Scan(req)).is_err() {
            self.shared.set_state(IcapSessionState::Disconnected);
            return Err(IcapScanError::ScanRequestFailed(io::Error::new(
                io::ErrorKind::NotConnected,
                "session task has quit",
            )));
        }
        debug!("icap session {}: scan of {filename} started", self.shared.id);
        Ok(IcapScanFuture::new(result_receiver))
    }

    /// Close the connection, a pending scan will fail
    pub fn close(&self) {
        self.shared.set_state(IcapSessionState::Disconnected);
        let _ = self.cmd_sender.send(SessionCommand::Close);
    }
}

impl fmt::Debug for IcapSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcapSession")
            .field("id", &self.shared.id)
            .field("route", &self.shared.route)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScanDisposition;
    use crate::producer::{DefaultRequestProducer, IcapRequestProducer, RESPMOD_TRAILER};
    use crate::testing::*;
    use crate::{IcapParseError, IcapRoute};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    async fn new_session(
        config: IcapScanConfig,
    ) -> (IcapSession, DuplexStream, Arc<DuplexConnector>) {
        let reuse = config.reuse_session;
        let (connector, mut server_receiver) = DuplexConnector::new();
        let ctx = new_context(config, connector.clone());
        let session = IcapSession::connect(1, test_route(), reuse, &ctx)
            .await
            .unwrap();
        let server = server_receiver.recv().await.unwrap();
        (session, server, connector)
    }

    #[tokio::test]
    async fn scan_reuse() {
        let (session, mut server, _) = new_session(IcapScanConfig::default()).await;
        assert_eq!(session.state(), IcapSessionState::Connected);

        let f = session
            .scan_file("test.txt", Bytes::from_static(b"X5O!P%@AP"))
            .unwrap();
        let req = serve_scan(&mut server, INFECTED_RESPONSE).await.unwrap();
        let req = String::from_utf8(req).unwrap();
        assert!(req.starts_with("RESPMOD icap://127.0.0.1:1344/SYMCScanResp-AV ICAP/1.0\r\n"));
        assert!(req.contains("Connection: keep-alive\r\n"));
        assert!(req.contains("GET /test.txt HTTP/1.1\r\n"));

        let result = f.await.unwrap();
        assert_eq!(
            result.disposition(),
            Some(ScanDisposition::InfectedUnrepaired)
        );
        assert_eq!(result.num_violations(), 1);
        assert_eq!(result.violation_name(), Some("EICAR Test String"));
        assert_eq!(result.cleaned_bytes().unwrap().as_ref(), b"Virus!");
        assert_eq!(session.state(), IcapSessionState::Connected);
        assert_eq!(session.command_count(), 1);

        let f = session
            .scan_file("clean.txt", Bytes::from_static(b"hello"))
            .unwrap();
        serve_scan(&mut server, CLEAN_RESPONSE).await.unwrap();
        let result = f.await.unwrap();
        assert_eq!(result.disposition(), Some(ScanDisposition::Clean));
        assert_eq!(session.command_count(), 2);
        assert!(session.is_available());
    }

    #[tokio::test]
    async fn scan_reuse_late_chunk_end() {
        let (session, mut server, _) = new_session(IcapScanConfig::default()).await;
        let (response, chunk_end) = CLEAN_RESPONSE.split_at(CLEAN_RESPONSE.len() - 7);

        let f = session
            .scan_file("a.txt", Bytes::from_static(b"hello"))
            .unwrap();
        read_until(&mut server, b"\r\n\r\n").await.unwrap();
        server.write_all(OPTIONS_RESPONSE).await.unwrap();
        read_until(&mut server, RESPMOD_TRAILER).await.unwrap();
        server.write_all(response).await.unwrap();
        let result = f.await.unwrap();
        assert_eq!(result.disposition(), Some(ScanDisposition::Clean));
        assert_eq!(session.state(), IcapSessionState::Connected);

        let f = session
            .scan_file("b.txt", Bytes::from_static(b"hello"))
            .unwrap();
        read_until(&mut server, b"\r\n\r\n").await.unwrap();
        let mut data = chunk_end.to_vec();
        data.extend_from_slice(OPTIONS_RESPONSE);
        server.write_all(&data).await.unwrap();
        read_until(&mut server, RESPMOD_TRAILER).await.unwrap();
        server.write_all(CLEAN_RESPONSE).await.unwrap();
        let result = f.await.unwrap();
        assert_eq!(result.disposition(), Some(ScanDisposition::Clean));
        assert_eq!(result.cleaned_bytes().unwrap().as_ref(), b"abcd");
        assert!(session.is_available());
    }

    #[tokio::test]
    async fn scan_no_reuse() {
        let mut config = IcapScanConfig::default();
        config.set_reuse_session(false);
        let (session, mut server, _) = new_session(config).await;

        let f = session
            .scan_file("clean.txt", Bytes::from_static(b"hello"))
            .unwrap();
        let req = serve_scan(&mut server, CLEAN_RESPONSE).await.unwrap();
        assert!(String::from_utf8(req).unwrap().contains("Connection: close\r\n"));

        let result = f.await.unwrap();
        assert_eq!(result.disposition(), Some(ScanDisposition::Clean));
        assert!(session.is_dead());

        let mut buf = [0u8; 16];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
        assert!(matches!(
            session.scan_file("clean.txt", Bytes::from_static(b"hello")),
            Err(IcapScanError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn zero_length() {
        let (session, mut server, _) = new_session(IcapScanConfig::default()).await;
        let mut f = session.scan_file("empty.txt", Bytes::new()).unwrap();
        assert!(f.is_done());
        let result = f.await.unwrap();
        assert_eq!(result.disposition(), Some(ScanDisposition::Clean));
        assert_eq!(result.num_violations(), 0);
        assert!(result.cleaned_bytes().unwrap().is_empty());
        assert_eq!(session.state(), IcapSessionState::Connected);
        assert_eq!(session.command_count(), 0);

        let mut buf = [0u8; 16];
        assert!(
            tokio::time::timeout(Duration::from_millis(50), server.read(&mut buf))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn session_in_use() {
        let (session, mut server, _) = new_session(IcapScanConfig::default()).await;
        let f = session
            .scan_file("a.txt", Bytes::from_static(b"hello"))
            .unwrap();
        assert!(matches!(
            session.scan_file("b.txt", Bytes::from_static(b"hello")),
            Err(IcapScanError::SessionInUse)
        ));
        assert!(!session.is_available());
        assert!(!session.is_dead());

        serve_scan(&mut server, CLEAN_RESPONSE).await.unwrap();
        f.await.unwrap();
    }

    #[tokio::test]
    async fn inactivity_timeout() {
        let mut config = IcapScanConfig::default();
        config.set_inactivity_timeout(Duration::from_millis(100));
        let (session, mut server, _) = new_session(config).await;

        let f = session
            .scan_file("a.txt", Bytes::from_static(b"hello"))
            .unwrap();
        read_until(&mut server, b"\r\n\r\n").await.unwrap();
        assert!(matches!(f.await, Err(IcapScanError::InactivityTimeout)));
        assert!(session.is_dead());
    }

    #[tokio::test]
    async fn idle_timeout() {
        let mut config = IcapScanConfig::default();
        config.set_inactivity_timeout(Duration::from_millis(50));
        let (session, mut server, _) = new_session(config).await;

        let mut buf = [0u8; 16];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
        assert!(session.is_dead());
    }

    #[tokio::test]
    async fn server_closed() {
        let (session, mut server, _) = new_session(IcapScanConfig::default()).await;
        let f = session
            .scan_file("a.txt", Bytes::from_static(b"hello"))
            .unwrap();
        read_until(&mut server, b"\r\n\r\n").await.unwrap();
        drop(server);

        assert!(matches!(
            f.await,
            Err(IcapScanError::Disconnected(
                IcapSessionState::AwaitingOptions
            ))
        ));
        assert!(session.is_dead());
    }

    #[tokio::test]
    async fn truncated_response() {
        let (session, mut server, _) = new_session(IcapScanConfig::default()).await;
        let f = session
            .scan_file("a.txt", Bytes::from_static(b"hello"))
            .unwrap();
        read_until(&mut server, b"\r\n\r\n").await.unwrap();
        server.write_all(&OPTIONS_RESPONSE[..20]).await.unwrap();
        drop(server);

        assert!(matches!(
            f.await,
            Err(IcapScanError::ParseError(IcapParseError::NotLongEnough))
        ));
    }

    #[tokio::test]
    async fn options_server_error() {
        let (session, mut server, _) = new_session(IcapScanConfig::default()).await;
        let f = session
            .scan_file("a.txt", Bytes::from_static(b"hello"))
            .unwrap();
        read_until(&mut server, b"\r\n\r\n").await.unwrap();
        server
            .write_all(b"ICAP/1.0 500 Server Error\r\nEncapsulated: null-body=0\r\n\r\n")
            .await
            .unwrap();

        assert!(matches!(f.await, Err(IcapScanError::ServerError)));
        assert!(session.is_dead());
        let mut buf = [0u8; 16];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn close() {
        let (session, mut server, _) = new_session(IcapScanConfig::default()).await;
        let f = session
            .scan_file("a.txt", Bytes::from_static(b"hello"))
            .unwrap();
        read_until(&mut server, b"\r\n\r\n").await.unwrap();

        session.close();
        assert!(session.is_dead());
        assert!(f.await.is_err());
        assert!(matches!(
            session.scan_file("a.txt", Bytes::from_static(b"hello")),
            Err(IcapScanError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn handle_dropped_during_scan() {
        let (session, mut server, _) = new_session(IcapScanConfig::default()).await;
        let f = session
            .scan_file("a.txt", Bytes::from_static(b"hello"))
            .unwrap();
        drop(session);

        serve_scan(&mut server, CLEAN_RESPONSE).await.unwrap();
        let result = f.await.unwrap();
        assert_eq!(result.disposition(), Some(ScanDisposition::Clean));

        let mut buf = [0u8; 16];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn connect_failed() {
        let (connector, server_receiver) = DuplexConnector::new();
        drop(server_receiver);
        let ctx = new_context(IcapScanConfig::default(), connector);
        assert!(matches!(
            IcapSession::connect(1, test_route(), true, &ctx).await,
            Err(IcapScanError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn mock_stream() {
        let route = IcapRoute::new("127.0.0.1", 1344, "avscan");
        let mut config = IcapScanConfig::default();
        config.set_reuse_session(false);
        config.set_user_agent("test".to_string());
        let producer = DefaultRequestProducer::new("test");
        let options = producer.build_options(&route);
        let respmod =
            producer.build_respmod(&route, "test.txt", Bytes::from_static(b"hello"), false);

        let stream = tokio_test::io::Builder::new()
            .write(&options)
            .read(OPTIONS_RESPONSE)
            .write(&respmod.header)
            .write(&respmod.payload)
            .write(respmod.trailer)
            .read(CLEAN_RESPONSE)
            .build();

        struct MockConnector(std::sync::Mutex<Option<tokio_test::io::Mock>>);

        #[async_trait::async_trait]
        impl IcapConnector for MockConnector {
            async fn connect(&self, _route: &IcapRoute) -> io::Result<BoxIcapStream> {
                let mock = self.0.lock().unwrap().take();
                mock.map(|m| Box::new(m) as BoxIcapStream)
                    .ok_or_else(|| io::Error::other("already connected"))
            }
        }

        let connector = Arc::new(MockConnector(std::sync::Mutex::new(Some(stream))));
        let ctx = new_context(config, connector);
        let session = IcapSession::connect(1, route, false, &ctx).await.unwrap();
        let result = session
            .scan_file("test.txt", Bytes::from_static(b"hello"))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result.disposition(), Some(ScanDisposition::Clean));
        assert_eq!(result.cleaned_bytes().unwrap().as_ref(), b"abcd");
    }
}
