/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use tokio::sync::Mutex;

use crate::consumer::IcapResponseConsumer;
use crate::producer::IcapRequestProducer;
use crate::session::IcapSessionContext;
use crate::{
    IcapConnector, IcapRoute, IcapRouteSessionPool, IcapScanConfig, IcapScanError,
    IcapScanFuture, IcapSession, IcapSessionCreator, TcpConnector,
};

/// Creates sessions with increasing ids, shared by all route pools of a client
pub struct IcapSessionConnector {
    ctx: Arc<IcapSessionContext>,
    next_session_id: AtomicU64,
}

impl IcapSessionConnector {
    async fn connect(&self, route: &IcapRoute, reuse: bool) -> Result<IcapSession, IcapScanError> {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1;
        IcapSession::connect(id, route.clone(), reuse, &self.ctx).await
    }
}

#[async_trait]
impl IcapSessionCreator for IcapSessionConnector {
    type Session = IcapSession;

    async fn create_session(&self, route: &IcapRoute) -> Result<IcapSession, IcapScanError> {
        self.connect(route, self.ctx.config.reuse_session).await
    }
}

type RoutePool = IcapRouteSessionPool<IcapSessionConnector>;

pub struct IcapScanClient {
    config: Arc<IcapScanConfig>,
    connector: Arc<IcapSessionConnector>,
    pools: Mutex<HashMap<IcapRoute, Arc<RoutePool>>>,
}

impl IcapScanClient {
    pub fn new(config: IcapScanConfig) -> Result<Self, IcapScanError> {
        Self::with_connector(config, Arc::new(TcpConnector::default()))
    }

    pub fn with_connector(
        config: IcapScanConfig,
        connector: Arc<dyn IcapConnector>,
    ) -> Result<Self, IcapScanError> {
        let producer = config.build_producer();
        let consumer = config.build_consumer();
        Self::with_parts(config, connector, producer, consumer)
    }

    pub fn with_parts(
        config: IcapScanConfig,
        connector: Arc<dyn IcapConnector>,
        producer: Arc<dyn IcapRequestProducer>,
        consumer: Arc<dyn IcapResponseConsumer>,
    ) -> Result<Self, IcapScanError> {
        config.check()?;

        let config = Arc::new(config);
        let ctx = Arc::new(IcapSessionContext {
            config: config.clone(),
            connector,
            producer,
            consumer,
        });
        Ok(IcapScanClient {
            config,
            connector: Arc::new(IcapSessionConnector {
                ctx,
                next_session_id: AtomicU64::new(0),
            }),
            pools: Mutex::new(HashMap::new()),
        })
    }

    #[inline]
    pub fn config(&self) -> &IcapScanConfig {
        &self.config
    }

    /// Open a new session that is not managed by any pool
    pub async fn connect(&self, route: &IcapRoute) -> Result<IcapSession, IcapScanError> {
        self.connector
            .connect(route, self.config.reuse_session)
            .await
    }

    /// Scan with a session leased from the pool of `route`
    pub async fn scan_file(
        &self,
        route: &IcapRoute,
        filename: &str,
        data: Bytes,
    ) -> Result<IcapScanFuture, IcapScanError> {
        let pool = self.fetch_pool(route).await?;
        match pool
            .lease_with(self.config.connect_timeout, |session| {
                session.scan_file(filename, data)
            })
            .await
        {
            Err(IcapScanError::Timeout) => {
                debug!("icap client: timed out to lease a session for {route}");
                Err(IcapScanError::NotConnected)
            }
            r => r,
        }
    }

    /// Scan on a dedicated connection which is closed after the scan
    pub async fn scan_file_once(
        &self,
        route: &IcapRoute,
        filename: &str,
        data: Bytes,
    ) -> Result<IcapScanFuture, IcapScanError> {
        let session = self.connector.connect(route, false).await?;
        session.scan_file(filename, data)
    }

    pub async fn route_count(&self) -> usize {
        self.pools.lock().await.len()
    }

    pub async fn pool(&self, route: &IcapRoute) -> Option<Arc<RoutePool>> {
        self.pools.lock().await.get(route).cloned()
    }

    async fn fetch_pool(&self, route: &IcapRoute) -> Result<Arc<RoutePool>, IcapScanError> {
        let mut pools = tokio::time::timeout(self.config.connect_timeout, self.pools.lock())
            .await
            .map_err(|_| IcapScanError::InternalError("timed out to lock the route table"))?;

        if let Some(pool) = pools.get(route) {
            return Ok(pool.clone());
        }
        if pools.len() >= self.config.max_routes {
            return Err(IcapScanError::NoMoreRoutes);
        }

        debug!("icap client: new session pool for {route}");
        let pool = Arc::new(IcapRouteSessionPool::new(
            route.clone(),
            self.connector.clone(),
            &self.config,
        ));
        pools.insert(route.clone(), pool.clone());
        Ok(pool)
    }
}
