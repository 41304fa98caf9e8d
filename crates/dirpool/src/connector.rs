//! Stateful wrapper around one directory connection.
//!
//! A [`Connector`] remembers who it is bound as, when it was first bound and
//! whether a caller currently has it checked out. The pool reads that state
//! to decide whether a connector can be reused, rebound or retired.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::directory::{DirectoryConnection, Entry, Modification, Operation, Response, Scope};
use crate::error::DirectoryError;

/// Mutable per-connection state, guarded by the connector's own lock.
struct ConnectorState {
    conn: Box<dyn DirectoryConnection>,
    identity: String,
    credential: Vec<u8>,
    bound: bool,
    bound_at: Option<Instant>,
    tls_started: bool,
}

/// A pooled directory connection plus its bind bookkeeping.
///
/// `active` is only flipped by the pool while it holds the pool lock, so no
/// connector is ever checked out to two callers at once.
pub struct Connector {
    id: u64,
    endpoint: String,
    use_tls: bool,
    active: AtomicBool,
    state: Mutex<ConnectorState>,
}

impl Connector {
    pub(crate) fn new(
        id: u64,
        endpoint: &str,
        use_tls: bool,
        conn: Box<dyn DirectoryConnection>,
    ) -> Self {
        Self {
            id,
            endpoint: endpoint.to_string(),
            use_tls,
            active: AtomicBool::new(false),
            state: Mutex::new(ConnectorState {
                conn,
                identity: String::new(),
                credential: Vec::new(),
                bound: false,
                bound_at: None,
                tls_started: false,
            }),
        }
    }

    /// Identifier unique within the owning pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The server address this connector talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether a caller currently has this connector checked out.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Whether the last bind succeeded and has not been undone by `unbind`.
    pub fn is_bound(&self) -> bool {
        self.state.lock().bound
    }

    /// Whether the underlying transport still reports itself connected.
    pub fn is_connected(&self) -> bool {
        self.state.lock().conn.is_connected()
    }

    /// The currently bound identity; empty when anonymous or unbound.
    pub fn identity(&self) -> String {
        self.state.lock().identity.clone()
    }

    /// Time since the first successful bind, zero if never bound.
    pub fn age(&self) -> Duration {
        self.state
            .lock()
            .bound_at
            .map(|at| at.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    pub(crate) fn is_bound_as(&self, identity: &str, credential: &[u8]) -> bool {
        let state = self.state.lock();
        state.identity == identity && state.credential == credential
    }

    pub(crate) fn credential_matches(&self, credential: &[u8]) -> bool {
        self.state.lock().credential == credential
    }

    /// Upgrade the transport to TLS. Only one upgrade per connector is allowed.
    pub fn start_tls(&self) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        Self::start_tls_locked(&mut state, &self.endpoint)
    }

    fn start_tls_locked(state: &mut ConnectorState, endpoint: &str) -> Result<(), DirectoryError> {
        if state.tls_started {
            return Err(DirectoryError::LocalState(format!(
                "TLS already started on connection to {endpoint}"
            )));
        }
        state.conn.start_tls()?;
        state.tls_started = true;
        Ok(())
    }

    /// Bind as `identity`, upgrading to TLS first when configured.
    ///
    /// A failed bind leaves the connector unbound: the server no longer
    /// considers the previous identity authenticated.
    pub fn bind(&self, identity: &str, credential: &[u8]) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();

        let upgraded = if self.use_tls && !state.tls_started {
            Self::start_tls_locked(&mut state, &self.endpoint)
        } else {
            Ok(())
        };

        if let Err(err) = upgraded.and_then(|()| state.conn.bind(identity, credential)) {
            state.bound = false;
            state.identity.clear();
            state.credential.clear();
            return Err(err);
        }

        state.bound = true;
        state.identity = identity.to_string();
        state.credential = credential.to_vec();
        state.bound_at.get_or_insert_with(Instant::now);

        tracing::debug!(
            connector = self.id,
            endpoint = %self.endpoint,
            identity = %identity,
            "bound connector"
        );
        Ok(())
    }

    /// Best-effort unbind. Bookkeeping is cleared even if the server call fails.
    pub fn unbind(&self) {
        let mut state = self.state.lock();
        let result = state.conn.unbind();
        state.bound = false;
        state.identity.clear();
        state.credential.clear();

        if let Err(err) = result {
            tracing::debug!(
                connector = self.id,
                endpoint = %self.endpoint,
                error = %err,
                "unbind failed; should be harmless"
            );
        }
    }

    /// Pass an operation straight to the underlying connection.
    pub fn execute(&self, operation: &Operation) -> Result<Response, DirectoryError> {
        tracing::trace!(
            connector = self.id,
            operation = operation.kind(),
            "executing directory operation"
        );
        self.state.lock().conn.execute(operation)
    }

    pub fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<Entry>, DirectoryError> {
        let operation = Operation::Search {
            base: base.to_string(),
            scope,
            filter: filter.to_string(),
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
        };
        Ok(self.execute(&operation)?.into_entries())
    }

    pub fn add(
        &self,
        dn: &str,
        attributes: Vec<(String, Vec<Vec<u8>>)>,
    ) -> Result<(), DirectoryError> {
        self.execute(&Operation::Add {
            dn: dn.to_string(),
            attributes,
        })
        .map(|_| ())
    }

    pub fn modify(&self, dn: &str, changes: Vec<Modification>) -> Result<(), DirectoryError> {
        self.execute(&Operation::Modify {
            dn: dn.to_string(),
            changes,
        })
        .map(|_| ())
    }

    pub fn delete(&self, dn: &str) -> Result<(), DirectoryError> {
        self.execute(&Operation::Delete { dn: dn.to_string() })
            .map(|_| ())
    }

    /// Point-in-time view of this connector for diagnostics.
    pub fn info(&self) -> ConnectorInfo {
        let state = self.state.lock();
        ConnectorInfo {
            slot: 0,
            id: self.id,
            endpoint: self.endpoint.clone(),
            connected: state.conn.is_connected(),
            bound: state.bound,
            active: self.is_active(),
            age: state.bound_at.map(|at| at.elapsed()).unwrap_or(Duration::ZERO),
            identity: state.identity.clone(),
        }
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("use_tls", &self.use_tls)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (bound, identity) = {
            let state = self.state.lock();
            (state.bound, state.identity.clone())
        };
        write!(f, "directory connector")?;
        if bound {
            write!(f, " (connected)")?;
        } else {
            write!(f, " (disconnected)")?;
        }
        if !identity.is_empty() {
            write!(f, " - identity: {identity:?}")?;
        }
        if !self.endpoint.is_empty() {
            write!(f, " - endpoint: {:?}", self.endpoint)?;
        }
        Ok(())
    }
}

/// Snapshot of one pool slot. Never carries the credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectorInfo {
    /// 1-based position in the pool, 0 when the connector is not pooled.
    pub slot: usize,
    pub id: u64,
    pub endpoint: String,
    pub connected: bool,
    pub bound: bool,
    pub active: bool,
    pub age: Duration,
    pub identity: String,
}
