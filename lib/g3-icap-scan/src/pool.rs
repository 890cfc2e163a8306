/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use tokio::sync::{Mutex, MutexGuard};

use crate::{IcapRoute, IcapScanConfig, IcapScanError, IcapSession};

/// What the pool needs to know about a session
pub trait IcapPoolSession: Clone + Send + Sync + 'static {
    fn id(&self) -> u64;
    /// The connection is gone and the session can never be used again
    fn is_dead(&self) -> bool;
    /// The session is idle and can take a new scan
    fn is_available(&self) -> bool;
    fn created_at(&self) -> Instant;
    fn command_count(&self) -> u64;
    fn close(&self);
}

impl IcapPoolSession for IcapSession {
    fn id(&self) -> u64 {
        IcapSession::id(self)
    }

    fn is_dead(&self) -> bool {
        IcapSession::is_dead(self)
    }

    fn is_available(&self) -> bool {
        IcapSession::is_available(self)
    }

    fn created_at(&self) -> Instant {
        IcapSession::created_at(self)
    }

    fn command_count(&self) -> u64 {
        IcapSession::command_count(self)
    }

    fn close(&self) {
        IcapSession::close(self)
    }
}

#[async_trait]
pub trait IcapSessionCreator: Send + Sync {
    type Session: IcapPoolSession;

    async fn create_session(&self, route: &IcapRoute) -> Result<Self::Session, IcapScanError>;
}

struct LeasedSession<S> {
    session: S,
    command_count: u64,
}

impl<S: IcapPoolSession> LeasedSession<S> {
    fn new(session: S) -> Self {
        let command_count = session.command_count();
        LeasedSession {
            session,
            command_count,
        }
    }

    /// A command was started after the lease and the session is idle again
    fn is_released(&self) -> bool {
        self.session.is_available() && self.session.command_count() != self.command_count
    }
}

struct IcapRouteSessionPoolUnlocked<S> {
    available: VecDeque<S>,
    leased: Vec<LeasedSession<S>>,
}

impl<S> IcapRouteSessionPoolUnlocked<S> {
    fn size(&self) -> usize {
        self.available.len() + self.leased.len()
    }
}

/// Sessions to a single route.
///
/// Sessions handed out are tracked as leased until a scan has been started
/// on them and they are found idle again by a later lease. Sessions that are dead, too old or have run too many
/// commands are dropped when a lease comes across them.
pub struct IcapRouteSessionPool<C: IcapSessionCreator> {
    route: IcapRoute,
    creator: Arc<C>,
    max_sessions: usize,
    max_session_time: Duration,
    max_command_count: u64,
    inner: Mutex<IcapRouteSessionPoolUnlocked<C::Session>>,
}

impl<C: IcapSessionCreator> IcapRouteSessionPool<C> {
    pub fn new(route: IcapRoute, creator: Arc<C>, config: &IcapScanConfig) -> Self {
        IcapRouteSessionPool {
            route,
            creator,
            max_sessions: config.max_sessions_per_route,
            max_session_time: config.max_session_time,
            max_command_count: config.max_command_count,
            inner: Mutex::new(IcapRouteSessionPoolUnlocked {
                available: VecDeque::new(),
                leased: Vec::new(),
            }),
        }
    }

    #[inline]
    pub fn route(&self) -> &IcapRoute {
        &self.route
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.size()
    }

    pub async fn leased_size(&self) -> usize {
        self.inner.lock().await.leased.len()
    }

    pub async fn available_size(&self) -> usize {
        self.inner.lock().await.available.len()
    }

    /// Get a session for exclusive use, all within `timeout`.
    ///
    /// The session is not handed out again before a scan has been run on it,
    /// or before it is dead.
    pub async fn lease(&self, timeout: Duration) -> Result<C::Session, IcapScanError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock_inner(timeout).await?;
        self.lease_locked(&mut inner, deadline).await
    }

    /// Lease a session and run `f` on it before other leases can see it.
    ///
    /// If `f` started no command, the session is given back at once.
    pub(crate) async fn lease_with<F, T>(&self, timeout: Duration, f: F) -> Result<T, IcapScanError>
    where
        F: FnOnce(&C::Session) -> Result<T, IcapScanError>,
    {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock_inner(timeout).await?;
        let session = self.lease_locked(&mut inner, deadline).await?;
        let command_count = session.command_count();
        let r = f(&session);
        if session.command_count() == command_count {
            Self::release_locked(&mut inner, session.id());
        }
        r
    }

    fn release_locked(inner: &mut IcapRouteSessionPoolUnlocked<C::Session>, id: u64) {
        let Some(i) = inner
            .leased
            .iter()
            .position(|l| l.session.id() == id && l.session.is_available())
        else {
            return;
        };
        let leased = inner.leased.swap_remove(i);
        inner.available.push_front(leased.session);
    }

    async fn lock_inner(
        &self,
        timeout: Duration,
    ) -> Result<MutexGuard<'_, IcapRouteSessionPoolUnlocked<C::Session>>, IcapScanError> {
        tokio::time::timeout(timeout, self.inner.lock())
            .await
            .map_err(|_| IcapScanError::Timeout)
    }

    async fn lease_locked(
        &self,
        inner: &mut IcapRouteSessionPoolUnlocked<C::Session>,
        deadline: Instant,
    ) -> Result<C::Session, IcapScanError> {
        let mut i = 0;
        while i < inner.leased.len() {
            let leased = &inner.leased[i];
            if leased.session.is_dead() {
                debug!(
                    "icap pool {}: drop dead session {}",
                    self.route,
                    leased.session.id()
                );
                inner.leased.swap_remove(i);
                continue;
            }
            if leased.is_released() {
                let leased = inner.leased.swap_remove(i);
                inner.available.push_back(leased.session);
                continue;
            }
            if Instant::now() >= deadline {
                return Err(IcapScanError::Timeout);
            }
            i += 1;
        }

        let mut found = None;
        while let Some(session) = inner.available.pop_front() {
            if self.is_usable(&session) {
                found = Some(session);
                break;
            }
            debug!("icap pool {}: evict session {}", self.route, session.id());
            session.close();
            if Instant::now() >= deadline {
                return Err(IcapScanError::Timeout);
            }
        }

        let session = match found {
            Some(session) => session,
            None => {
                if self.max_sessions > 0 && inner.size() >= self.max_sessions {
                    return Err(IcapScanError::NoFreeConnection);
                }
                let session = self.creator.create_session(&self.route).await?;
                debug!("icap pool {}: new session {}", self.route, session.id());
                session
            }
        };
        inner.leased.push(LeasedSession::new(session.clone()));
        Ok(session)
    }

    fn is_usable(&self, session: &C::Session) -> bool {
        !session.is_dead()
            && session.created_at().elapsed() < self.max_session_time
            && session.command_count().saturating_add(1) < self.max_command_count
    }
}

#[cfg(test)]
impl<C: IcapSessionCreator> IcapRouteSessionPool<C> {
    pub(crate) async fn hold_lock(&self) -> impl Sized + '_ {
        self.inner.lock().await
    }
}
