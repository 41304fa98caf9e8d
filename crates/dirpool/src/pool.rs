//! Directory connection pool manager.
//!
//! Hands out bound connectors for an (identity, credential) pair, reusing
//! idle connectors when possible and bounding the number of pooled
//! connectors.
//!
//! # Architecture
//!
//! ```text
//! Caller calls connection(identity, credential)
//!   → match: newest-first scan of idle connectors (under the pool lock)
//!     → expired connector → unbind, remove, keep scanning
//!     → exact identity/credential → mark active → return guard
//!     → otherwise rebind the first idle candidate that accepts the bind
//!   → nothing matched and pool full → sleep, then retry the match, evicting
//!     one idle connector under the same lock if the retry still finds the
//!     pool full
//!   → nothing matched and room left → connect + bind across endpoints
//! Guard dropped
//!   → connection dead → remove from pool
//!   → otherwise → mark idle, keep bound for reuse
//! ```
//!
//! All pool state lives behind one mutex. Creating a connector reserves a
//! slot under the lock and then talks to the network unlocked, so slow
//! servers do not serialize the whole pool while capacity is still honored.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::connector::{Connector, ConnectorInfo};
use crate::directory::{ConnectOptions, ConnectionFactory, split_endpoints};
use crate::error::{DirectoryError, PoolError, PoolResult};

/// State guarded by the pool lock.
#[derive(Debug, Default)]
struct PoolState {
    /// Pooled connectors in insertion order.
    members: Vec<Arc<Connector>>,
    /// Creations in flight outside the lock, counted against capacity.
    pending: usize,
}

impl PoolState {
    fn remove(&mut self, connector: &Arc<Connector>) -> bool {
        let before = self.members.len();
        self.members.retain(|member| !Arc::ptr_eq(member, connector));
        self.members.len() != before
    }

    /// Members plus in-flight creations have reached `capacity`.
    fn is_full(&self, capacity: usize) -> bool {
        self.members.len() + self.pending >= capacity
    }

    /// Take out the first idle connector found scanning from the newest end.
    fn evict_idle(&mut self) -> Option<Arc<Connector>> {
        let index = self.members.iter().rposition(|connector| !connector.is_active())?;
        Some(self.members.remove(index))
    }
}

/// A capacity slot reserved for a creation running outside the lock.
///
/// Dropping it without [`Reservation::settle`] (a panicking factory) gives
/// the slot back.
struct Reservation<'a> {
    state: &'a Mutex<PoolState>,
}

impl<'a> Reservation<'a> {
    /// Reserve under the already held lock.
    fn new(state: &'a Mutex<PoolState>, locked: &mut PoolState) -> Self {
        locked.pending += 1;
        Self { state }
    }

    /// Release the slot while the caller holds the pool lock.
    fn settle(self, locked: &mut PoolState) {
        locked.pending -= 1;
        std::mem::forget(self);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.state.lock().pending -= 1;
    }
}

/// A failed connect+bind attempt and whatever connector got built.
type AttemptError = (DirectoryError, Option<ConnectorInfo>);

/// Bounded pool of bound directory connectors shared across threads.
pub struct ConnectionManager {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    state: Mutex<PoolState>,
    /// When false, every acquisition creates a fresh connector and every
    /// release unbinds it.
    pooling: AtomicBool,
    next_id: AtomicU64,
}

impl ConnectionManager {
    /// Create a new `ConnectionManager` with the given configuration and factory.
    pub fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            pooling: AtomicBool::new(config.pooling),
            config,
            factory,
            state: Mutex::new(PoolState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_pooling(&self) -> bool {
        self.pooling.load(Ordering::Acquire)
    }

    /// Switch reuse on or off. Connectors already pooled stay where they are
    /// until released, evicted or purged.
    pub fn set_pooling(&self, pooling: bool) {
        self.pooling.store(pooling, Ordering::Release);
    }

    /// Number of pooled connectors, active and idle.
    pub fn size(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn len(&self) -> usize {
        self.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Point-in-time view of every pooled connector, in insertion order.
    ///
    /// Connectors are read after the pool lock is released: an active
    /// connector blocks `info` until its in-flight operation returns.
    pub fn snapshot(&self) -> Vec<ConnectorInfo> {
        let members = self.state.lock().members.clone();
        members
            .iter()
            .enumerate()
            .map(|(index, connector)| ConnectorInfo {
                slot: index + 1,
                ..connector.info()
            })
            .collect()
    }

    /// Check out a connector bound as `identity`, falling back to the
    /// configured defaults for whichever of the two is `None`.
    ///
    /// When the pool is full the call sleeps briefly and tries again, up to
    /// `retry_max` attempts in total. Retries first look for an idle match
    /// and only then evict one idle connector to make room. The returned
    /// guard gives the connector back when dropped.
    pub fn connection(
        &self,
        identity: Option<&str>,
        credential: Option<&[u8]>,
    ) -> PoolResult<PooledConnection<'_>> {
        let identity = identity.unwrap_or(&self.config.default_identity);
        let credential = credential.unwrap_or(&self.config.default_credential);

        let retry_max = self.config.retry_max;
        for attempt in 1..=retry_max {
            match self.get_connector(identity, credential, attempt > 1) {
                Ok(connector) => {
                    return Ok(PooledConnection {
                        manager: self,
                        connector,
                    });
                }
                Err(PoolError::Exhausted { .. }) if attempt < retry_max => {
                    tracing::debug!(
                        attempt = attempt,
                        backoff = ?self.config.exhausted_backoff,
                        "connection pool full, waiting for an idle connector"
                    );
                    thread::sleep(self.config.exhausted_backoff);
                }
                Err(PoolError::Exhausted { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        tracing::warn!(
            endpoints = %self.config.endpoints,
            capacity = self.config.capacity,
            "connection pool exhausted"
        );
        Err(self.exhausted())
    }

    /// Unbind and drop pooled connectors bound as `identity` whose credential
    /// differs from `credential` (or all of them when `credential` is `None`).
    ///
    /// Only applies while pooling is disabled; returns how many were removed.
    /// Checked-out connectors are left alone.
    pub fn purge(&self, identity: &str, credential: Option<&[u8]>) -> usize {
        if self.is_pooling() {
            return 0;
        }

        let purged: Vec<Arc<Connector>> = {
            let mut state = self.state.lock();
            let (purged, kept) = state.members.drain(..).partition(|connector| {
                !connector.is_active()
                    && connector.identity() == identity
                    && credential.is_none_or(|cred| !connector.credential_matches(cred))
            });
            state.members = kept;
            purged
        };

        for connector in &purged {
            connector.unbind();
        }

        if !purged.is_empty() {
            tracing::debug!(
                identity = %identity,
                purged = purged.len(),
                "purged connectors"
            );
        }
        purged.len()
    }

    fn exhausted(&self) -> PoolError {
        PoolError::Exhausted {
            endpoints: self.config.endpoints.clone(),
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            timeout: self.config.timeout,
            retry_max: self.config.retry_max,
            retry_delay: self.config.retry_delay,
        }
    }

    /// One match-or-create round.
    ///
    /// With `make_room`, a full pool gives up one idle connector, but only
    /// after matching found nothing, and under the same lock as the match,
    /// so a connector released for this very pair is reused, not evicted.
    fn get_connector(
        &self,
        identity: &str,
        credential: &[u8],
        make_room: bool,
    ) -> PoolResult<Arc<Connector>> {
        if !self.is_pooling() {
            let connector = self.create_connector(identity, credential)?;
            connector.set_active(true);
            return Ok(connector);
        }

        let (reservation, evicted) = {
            let mut state = self.state.lock();
            if let Some(connector) = self.match_connector(&mut state, identity, credential) {
                return Ok(connector);
            }
            let capacity = self.config.capacity;
            let evicted = if make_room && state.is_full(capacity) {
                state.evict_idle()
            } else {
                None
            };
            let reservation = if state.is_full(capacity) {
                None
            } else {
                Some(Reservation::new(&self.state, &mut state))
            };
            (reservation, evicted)
        };

        if let Some(connector) = evicted {
            tracing::debug!(
                connector = connector.id(),
                endpoint = %connector.endpoint(),
                "evicted idle connector to make room"
            );
            connector.unbind();
        }
        let Some(reservation) = reservation else {
            return Err(self.exhausted());
        };

        let created = self.create_connector(identity, credential);

        let mut state = self.state.lock();
        reservation.settle(&mut state);
        let connector = created?;
        connector.set_active(true);
        state.members.push(Arc::clone(&connector));
        tracing::debug!(
            connector = connector.id(),
            endpoint = %connector.endpoint(),
            size = state.members.len(),
            "added connector to pool"
        );
        Ok(connector)
    }

    /// Find an idle connector for the pair, rebinding one if needed.
    ///
    /// Runs under the pool lock: `state` is the locked pool.
    fn match_connector(
        &self,
        state: &mut PoolState,
        identity: &str,
        credential: &[u8],
    ) -> Option<Arc<Connector>> {
        let mut expired = Vec::new();
        let mut candidates = Vec::new();
        let mut found = None;

        for connector in state.members.iter().rev() {
            if connector.is_active() {
                continue;
            }
            if connector.age() > self.config.max_lifetime {
                expired.push(Arc::clone(connector));
                continue;
            }
            if connector.is_bound_as(identity, credential) {
                found = Some(Arc::clone(connector));
                break;
            }
            candidates.push(Arc::clone(connector));
        }

        for connector in &expired {
            tracing::debug!(
                connector = connector.id(),
                age = ?connector.age(),
                max_lifetime = ?self.config.max_lifetime,
                "retiring connector past its lifetime"
            );
            connector.unbind();
            state.remove(connector);
        }

        if let Some(connector) = found {
            connector.set_active(true);
            tracing::trace!(connector = connector.id(), "reused idle connector");
            return Some(connector);
        }

        for connector in candidates {
            match connector.bind(identity, credential) {
                Ok(()) => {
                    connector.set_active(true);
                    tracing::debug!(
                        connector = connector.id(),
                        identity = %identity,
                        "rebound idle connector"
                    );
                    return Some(connector);
                }
                Err(err) => {
                    tracing::debug!(
                        connector = connector.id(),
                        error = %err,
                        "removing connector from pool after failure to rebind"
                    );
                    state.remove(&connector);
                }
            }
        }

        None
    }

    /// Connect and bind a fresh connector, walking the endpoint list.
    fn create_connector(&self, identity: &str, credential: &[u8]) -> PoolResult<Arc<Connector>> {
        let endpoints = split_endpoints(&self.config.endpoints);
        if endpoints.is_empty() {
            return Err(PoolError::Backend {
                message: "no endpoints configured".to_string(),
                backend: None,
            });
        }

        let options = self.connect_options();
        let retry_max = self.config.retry_max;
        let mut last_error = None;
        let mut last_backend = None;

        for endpoint in endpoints {
            for attempt in 1..=retry_max {
                tracing::debug!(
                    endpoint = %endpoint,
                    attempt = attempt,
                    "attempting to create a new connector"
                );

                match self.open(endpoint, &options, identity, credential) {
                    Ok(connector) => return Ok(connector),
                    Err((DirectoryError::InvalidCredentials, _)) => {
                        // No retry and no failover: repeated bad binds lock
                        // accounts and replicas share the same credentials.
                        tracing::error!(
                            endpoint = %endpoint,
                            identity = %identity,
                            "invalid credentials, cancelling retry"
                        );
                        return Err(DirectoryError::InvalidCredentials.into());
                    }
                    Err((err, backend)) => {
                        if attempt < retry_max {
                            tracing::info!(
                                endpoint = %endpoint,
                                attempt = attempt,
                                error = %err,
                                retry_delay = ?self.config.retry_delay,
                                "failed to create and bind connector, will retry"
                            );
                            thread::sleep(self.config.retry_delay);
                        } else {
                            tracing::error!(
                                endpoint = %endpoint,
                                attempts = attempt,
                                error = %err,
                                "failed to create and bind connector"
                            );
                        }
                        last_error = Some(err);
                        last_backend = backend;
                    }
                }
            }
        }

        match last_error {
            Some(err) if err.is_transient() => Err(PoolError::Directory(err)),
            Some(err) => Err(PoolError::Backend {
                message: err.to_string(),
                backend: last_backend,
            }),
            None => Err(PoolError::Backend {
                message: "no connection attempts were made".to_string(),
                backend: None,
            }),
        }
    }

    fn open(
        &self,
        endpoint: &str,
        options: &ConnectOptions,
        identity: &str,
        credential: &[u8],
    ) -> Result<Arc<Connector>, AttemptError> {
        let conn = self
            .factory
            .connect(endpoint, options)
            .map_err(|err| (err, None))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connector = Arc::new(Connector::new(id, endpoint, self.config.use_tls, conn));

        match connector.bind(identity, credential) {
            Ok(()) => {
                tracing::debug!(
                    connector = id,
                    endpoint = %endpoint,
                    "created new connector"
                );
                Ok(connector)
            }
            Err(err) => Err((err, Some(connector.info()))),
        }
    }

    fn release(&self, connector: &Arc<Connector>) {
        if !self.is_pooling() {
            {
                let mut state = self.state.lock();
                connector.set_active(false);
                state.remove(connector);
            }
            connector.unbind();
            return;
        }

        let dropped = {
            let mut state = self.state.lock();
            connector.set_active(false);
            if connector.is_connected() {
                false
            } else {
                state.remove(connector);
                true
            }
        };

        if dropped {
            tracing::debug!(
                connector = connector.id(),
                endpoint = %connector.endpoint(),
                "dropping disconnected connector on release"
            );
            connector.unbind();
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("pooling", &self.is_pooling())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

/// A checked-out connector, returned to its pool on drop.
pub struct PooledConnection<'a> {
    manager: &'a ConnectionManager,
    connector: Arc<Connector>,
}

impl PooledConnection<'_> {
    /// Whether two guards hold the very same connector.
    pub fn same_connector(&self, other: &PooledConnection<'_>) -> bool {
        Arc::ptr_eq(&self.connector, &other.connector)
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connector;

    fn deref(&self) -> &Connector {
        &self.connector
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.connector);
    }
}

impl fmt::Debug for PooledConnection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledConnection")
            .field(&self.connector)
            .finish()
    }
}
