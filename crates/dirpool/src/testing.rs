//! In-memory directory mocks shared by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::directory::{
    ConnectOptions, ConnectionFactory, DirectoryConnection, Entry, Operation, Response,
};
use crate::error::DirectoryError;

/// Scripted behavior and call counters shared by a factory and its connections.
#[derive(Debug, Default)]
pub struct Script {
    connects: AtomicUsize,
    binds: AtomicUsize,
    unbinds: AtomicUsize,
    tls_upgrades: AtomicUsize,
    executes: AtomicUsize,
    unbind_fails: AtomicBool,
    tls_fails: AtomicBool,
    connect_panics: AtomicBool,
    execute_delay: Mutex<Option<Duration>>,
    connect_failures: Mutex<HashMap<String, DirectoryError>>,
    bind_failure: Mutex<Option<DirectoryError>>,
    execute_failure: Mutex<Option<DirectoryError>>,
    rejected: Mutex<Vec<Vec<u8>>>,
    attempts: Mutex<Vec<String>>,
    links: Mutex<Vec<Arc<AtomicBool>>>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn binds(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn unbinds(&self) -> usize {
        self.unbinds.load(Ordering::SeqCst)
    }

    pub fn tls_upgrades(&self) -> usize {
        self.tls_upgrades.load(Ordering::SeqCst)
    }

    pub fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    /// Endpoints passed to `connect`, in call order, failures included.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }

    pub fn fail_connect(&self, endpoint: &str, err: DirectoryError) {
        self.connect_failures.lock().insert(endpoint.to_string(), err);
    }

    pub fn fail_binds(&self, err: DirectoryError) {
        *self.bind_failure.lock() = Some(err);
    }

    pub fn fail_executes(&self, err: DirectoryError) {
        *self.execute_failure.lock() = Some(err);
    }

    pub fn fail_unbinds(&self) {
        self.unbind_fails.store(true, Ordering::SeqCst);
    }

    /// Every `start_tls` fails until [`Script::allow_tls`] is called.
    pub fn fail_tls(&self) {
        self.tls_fails.store(true, Ordering::SeqCst);
    }

    pub fn allow_tls(&self) {
        self.tls_fails.store(false, Ordering::SeqCst);
    }

    /// The next `connect` panics instead of returning.
    pub fn panic_next_connect(&self) {
        self.connect_panics.store(true, Ordering::SeqCst);
    }

    /// Every `execute` sleeps this long before answering.
    pub fn slow_executes(&self, delay: Duration) {
        *self.execute_delay.lock() = Some(delay);
    }

    /// Binds presenting this credential fail with `InvalidCredentials`.
    pub fn reject(&self, credential: &[u8]) {
        self.rejected.lock().push(credential.to_vec());
    }

    /// Drop the transport of every connection created so far.
    pub fn disconnect_all(&self) {
        for link in self.links.lock().iter() {
            link.store(false, Ordering::SeqCst);
        }
    }
}

#[derive(Debug)]
pub struct MockConnection {
    script: Arc<Script>,
    connected: Arc<AtomicBool>,
}

impl MockConnection {
    pub fn new(_endpoint: &str, script: Arc<Script>) -> Self {
        let connected = Arc::new(AtomicBool::new(true));
        script.links.lock().push(connected.clone());
        Self { script, connected }
    }
}

impl DirectoryConnection for MockConnection {
    fn start_tls(&mut self) -> Result<(), DirectoryError> {
        if self.script.tls_fails.load(Ordering::SeqCst) {
            return Err(DirectoryError::Protocol("tls handshake failed".to_string()));
        }
        self.script.tls_upgrades.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn bind(&mut self, _identity: &str, credential: &[u8]) -> Result<(), DirectoryError> {
        self.script.binds.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.script.bind_failure.lock().clone() {
            return Err(err);
        }
        if self.script.rejected.lock().iter().any(|c| c == credential) {
            return Err(DirectoryError::InvalidCredentials);
        }
        Ok(())
    }

    fn unbind(&mut self) -> Result<(), DirectoryError> {
        self.script.unbinds.fetch_add(1, Ordering::SeqCst);
        if self.script.unbind_fails.load(Ordering::SeqCst) {
            return Err(DirectoryError::Protocol("unbind rejected".to_string()));
        }
        Ok(())
    }

    fn execute(&mut self, operation: &Operation) -> Result<Response, DirectoryError> {
        self.script.executes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.script.execute_delay.lock();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if let Some(err) = self.script.execute_failure.lock().clone() {
            return Err(err);
        }
        match operation {
            Operation::Search { base, .. } => Ok(Response::Entries(vec![Entry {
                dn: base.clone(),
                ..Entry::default()
            }])),
            _ => Ok(Response::Done),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

pub struct MockFactory {
    pub script: Arc<Script>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Script::new(),
        })
    }
}

impl ConnectionFactory for MockFactory {
    fn connect(
        &self,
        endpoint: &str,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn DirectoryConnection>, DirectoryError> {
        self.script.attempts.lock().push(endpoint.to_string());
        if self.script.connect_panics.swap(false, Ordering::SeqCst) {
            panic!("directory client crashed while connecting to {endpoint}");
        }
        if let Some(err) = self.script.connect_failures.lock().get(endpoint) {
            return Err(err.clone());
        }
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection::new(endpoint, self.script.clone())))
    }
}
