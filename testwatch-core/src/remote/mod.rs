// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The remote test engine.
//!
//! The engine is a WebSocket server that external test processes connect to.
//! A client announces itself with a `hello` frame carrying a routing key;
//! the engine can then dispatch `runTest` commands to it, and the client
//! pushes results back as `report` (inline outcomes) or `reportFile` (a
//! report document on a shared filesystem) frames. Results land in the
//! [`SessionRegistry`] through the same paths file imports use.
//!
//! Delivery is fire and forget: a dispatched `runTest` is not acknowledged,
//! retried, or timed out, and the eventual report is ingested independently
//! of whatever requests went out. Socket-level problems are logged and close
//! only the affected connection.

mod convert;

use crate::{
    config::RemoteConfig,
    errors::RemoteError,
    model::Session,
    registry::{lock_session, SessionRegistry},
    reports,
};
use camino::Utf8Path;
use futures::{SinkExt, StreamExt};
use indexmap::IndexMap;
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use testwatch_wire::{Envelope, HelloData, MessageBody, ReportData, RunTestData};
use tokio::{
    net::{TcpListener, TcpStream},
    runtime::Runtime,
    sync::mpsc::{self, UnboundedSender},
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long the accept loop backs off after a failed accept.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Parameters of a `runTest` dispatch.
#[derive(Clone, Debug, Default)]
pub struct RunRequest {
    /// Module containing the test method.
    pub module: String,

    /// Human-readable module name, when it differs from `module`.
    pub module_name: String,

    /// Test method to execute.
    pub method: String,

    /// Run the method in the server context.
    pub server: bool,

    /// Run the method in the thick-client context.
    pub client: bool,

    /// Run the method in the ordinary (managed) client context.
    pub ordinary_client: bool,
}

impl RunRequest {
    /// Creates a request to run `method` from `module` in the server
    /// context, the default for remote runs.
    pub fn new(module: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            method: method.into(),
            server: true,
            ..Self::default()
        }
    }

    fn to_wire(&self) -> RunTestData {
        RunTestData {
            module: self.module.clone(),
            module_name: self.module_name.clone(),
            method: self.method.clone(),
            server: self.server,
            client: self.client,
            ordinary_client: self.ordinary_client,
        }
    }
}

/// What a spawned client process needs to call back into the engine.
#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    /// Port the engine is listening on.
    pub port: u16,

    /// Routing key the client should announce in its `hello`.
    pub key: String,

    /// Transport scheme, always `ws`.
    pub transport: &'static str,
}

/// Identity of one client connection, assigned at accept time. A client
/// that reconnects gets a fresh token; the routing key is what survives.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
struct ClientToken(u64);

#[derive(Debug)]
struct RemoteClient {
    key: String,
    #[allow(dead_code)]
    protocol_version: String,
    sender: UnboundedSender<Message>,
}

/// Both client indexes, mutated together under one lock. `by_key` insertion
/// order defines which client is the default dispatch target.
#[derive(Debug, Default)]
struct ClientTable {
    by_token: HashMap<ClientToken, RemoteClient>,
    by_key: IndexMap<String, ClientToken>,
}

/// The remote test engine: a WebSocket server for external test clients.
///
/// Constructed with [`RemoteEngine::start`], which binds the listener before
/// returning, so [`port`](Self::port) is immediately valid. The engine owns
/// its tokio runtime; dropping it (or calling
/// [`shutdown`](Self::shutdown)) tears down the accept loop and every
/// connection task.
#[derive(Debug)]
pub struct RemoteEngine {
    runtime: Runtime,
    local_addr: SocketAddr,
    shared: Arc<EngineShared>,
}

impl RemoteEngine {
    /// Starts the engine, binding the address from `config`. Reports pushed
    /// by clients are registered with `registry`.
    pub fn start(
        config: &RemoteConfig,
        registry: Arc<SessionRegistry>,
    ) -> Result<Self, RemoteError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("testwatch-remote")
            .build()
            .map_err(RemoteError::RuntimeCreate)?;
        let listener = runtime
            .block_on(TcpListener::bind(config.bind))
            .map_err(|error| RemoteError::Bind {
                addr: config.bind,
                error,
            })?;
        let local_addr = listener.local_addr().map_err(|error| RemoteError::Bind {
            addr: config.bind,
            error,
        })?;
        let shared = Arc::new(EngineShared::new(registry));
        runtime.spawn(accept_loop(listener, Arc::clone(&shared)));
        info!("remote test engine listening on {local_addr}");
        Ok(Self {
            runtime,
            local_addr,
            shared,
        })
    }

    /// The address the engine is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The port the engine is listening on.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns true while at least one client is connected.
    pub fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::SeqCst)
    }

    /// Keys of the connected clients, in the order they registered.
    pub fn client_keys(&self) -> Vec<String> {
        self.shared.lock_clients().by_key.keys().cloned().collect()
    }

    /// Settings for a client process that should call back into this
    /// engine, with a fresh routing key.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            port: self.port(),
            key: Uuid::new_v4().to_string(),
            transport: "ws",
        }
    }

    /// Dispatches `request` to the first registered client and returns the
    /// assigned message id. Ids increase strictly across all dispatches.
    pub fn launch_test(&self, request: &RunRequest) -> Result<u64, RemoteError> {
        self.shared.dispatch(None, request)
    }

    /// Dispatches `request` to the client registered under `key`.
    pub fn launch_test_on(&self, key: &str, request: &RunRequest) -> Result<u64, RemoteError> {
        self.shared.dispatch(Some(key), request)
    }

    /// Shuts the engine down without waiting for in-flight connection tasks.
    pub fn shutdown(self) {
        self.runtime.shutdown_background();
    }
}

#[derive(Debug)]
struct EngineShared {
    registry: Arc<SessionRegistry>,
    clients: Mutex<ClientTable>,
    available: AtomicBool,
    next_message_id: AtomicU64,
    next_token: AtomicU64,
}

impl EngineShared {
    fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            clients: Mutex::new(ClientTable::default()),
            available: AtomicBool::new(false),
            next_message_id: AtomicU64::new(0),
            next_token: AtomicU64::new(0),
        }
    }

    fn allocate_token(&self) -> ClientToken {
        ClientToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn lock_clients(&self) -> MutexGuard<'_, ClientTable> {
        self.clients.lock().unwrap_or_else(|error| error.into_inner())
    }

    /// Decodes and dispatches one inbound text frame. Malformed frames are
    /// logged and dropped; the connection stays up.
    fn handle_frame(
        &self,
        token: ClientToken,
        peer: SocketAddr,
        sender: &UnboundedSender<Message>,
        text: &str,
    ) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!("discarding malformed frame from {peer}: {error}");
                return;
            }
        };
        match envelope.body {
            MessageBody::Hello(hello) => self.register_client(token, hello, sender.clone()),
            MessageBody::Report(report) => self.ingest_report(token, &report),
            MessageBody::ReportFile(data) => {
                // Reading the report blocks on file I/O; let the runtime
                // shift other connections off this worker meanwhile.
                tokio::task::block_in_place(|| {
                    self.ingest_report_file(token, Utf8Path::new(&data.report_file));
                });
            }
            MessageBody::RunTest(_) => {
                warn!("remote client {peer} sent a runTest frame; only engines send those");
            }
        }
    }

    fn register_client(
        &self,
        token: ClientToken,
        hello: HelloData,
        sender: UnboundedSender<Message>,
    ) {
        let HelloData {
            key,
            protocol_version,
        } = hello;
        {
            let mut clients = self.lock_clients();
            // A repeated hello may rename this connection, and a new
            // connection may take over an existing key.
            let previous_key = clients.by_token.get(&token).map(|client| client.key.clone());
            if let Some(previous_key) = previous_key {
                if previous_key != key {
                    clients.by_key.shift_remove(&previous_key);
                }
            }
            if let Some(displaced) = clients.by_key.insert(key.clone(), token) {
                if displaced != token {
                    clients.by_token.remove(&displaced);
                }
            }
            clients.by_token.insert(
                token,
                RemoteClient {
                    key: key.clone(),
                    protocol_version,
                    sender,
                },
            );
        }
        self.available.store(true, Ordering::SeqCst);
        info!("remote client `{key}` connected");
    }

    fn remove_client(&self, token: ClientToken) {
        let (key, empty) = {
            let mut clients = self.lock_clients();
            let Some(client) = clients.by_token.remove(&token) else {
                return;
            };
            // The key may already belong to a newer connection.
            if clients.by_key.get(&client.key) == Some(&token) {
                clients.by_key.shift_remove(&client.key);
            }
            (client.key, clients.by_token.is_empty())
        };
        if empty {
            self.available.store(false, Ordering::SeqCst);
        }
        info!("remote client `{key}` disconnected");
    }

    fn client_key(&self, token: ClientToken) -> Option<String> {
        self.lock_clients()
            .by_token
            .get(&token)
            .map(|client| client.key.clone())
    }

    /// Picks a target client and sends it a `runTest` frame. The message id
    /// comes from a shared counter, so ids increase across all clients.
    fn dispatch(&self, target: Option<&str>, request: &RunRequest) -> Result<u64, RemoteError> {
        let (key, sender, token) = {
            let clients = self.lock_clients();
            let (key, token) = match target {
                Some(named) => match clients.by_key.get(named) {
                    Some(&token) => (named.to_owned(), token),
                    None => {
                        return Err(RemoteError::ClientNotFound {
                            key: named.to_owned(),
                        });
                    }
                },
                None => match clients.by_key.first() {
                    Some((key, &token)) => (key.clone(), token),
                    None => return Err(RemoteError::NoClients),
                },
            };
            let Some(client) = clients.by_token.get(&token) else {
                return Err(RemoteError::ClientNotFound { key });
            };
            (key, client.sender.clone(), token)
        };

        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope::new(id, MessageBody::RunTest(request.to_wire()));
        let frame = envelope.encode()?;
        if sender.send(Message::Text(frame)).is_err() {
            // The connection task hung up between our lookup and the send.
            self.remove_client(token);
            return Err(RemoteError::ClientClosed { key });
        }
        debug!("dispatched runTest {id} to remote client `{key}`");
        Ok(id)
    }

    /// Converts an inline report into session results. An active session
    /// absorbs the outcomes and finishes; otherwise a new completed session
    /// is registered.
    fn ingest_report(&self, token: ClientToken, report: &ReportData) {
        let source = self
            .client_key(token)
            .unwrap_or_else(|| "remote".to_owned());
        debug!(
            "ingesting remote report with {} outcomes from `{source}`",
            report.tests.len()
        );
        if let Some(handle) = self.registry.active_session() {
            if self.fill_active_session(&handle, &source, report) {
                return;
            }
            // Stopped between the lookup and the lock; the report lands in
            // a fresh session instead.
        }
        self.register_fresh_session(&source, report);
    }

    /// Applies `report` to a session that was active when it was looked up.
    /// Returns false, leaving the session untouched, if it reached a
    /// terminal state in the meantime.
    fn fill_active_session(
        &self,
        handle: &Arc<Mutex<Session>>,
        source: &str,
        report: &ReportData,
    ) -> bool {
        let listeners = self.registry.listeners();
        let mut session = lock_session(handle);
        if session.is_done() {
            return false;
        }
        let was_starting = session.is_starting();
        session.start();
        let cases = convert::apply_report(&mut session, source, report);
        session.finish();
        if was_starting {
            listeners.for_each(|listener| listener.session_started(&session));
        }
        for &case in &cases {
            let element = session.element(case);
            listeners.for_each(|listener| listener.test_case_finished(&session, element));
        }
        listeners.for_each(|listener| listener.session_finished(&session));
        true
    }

    fn register_fresh_session(&self, source: &str, report: &ReportData) {
        let listeners = self.registry.listeners();
        let mut session = Session::new(format!("remote run ({source})"));
        session.start();
        let cases = convert::apply_report(&mut session, source, report);
        session.finish();
        let handle = self.registry.add_session(session);
        let session = lock_session(&handle);
        for &case in &cases {
            let element = session.element(case);
            listeners.for_each(|listener| listener.test_case_finished(&session, element));
        }
        listeners.for_each(|listener| listener.session_finished(&session));
    }

    /// Reads a report document a client left on a shared filesystem. The
    /// active session absorbs it as a merge; otherwise it imports fresh.
    /// Failures are logged, never fatal to the connection.
    fn ingest_report_file(&self, token: ClientToken, path: &Utf8Path) {
        let source = self
            .client_key(token)
            .unwrap_or_else(|| "remote".to_owned());
        debug!("reading remote report file `{path}` from `{source}`");
        let outcome = match self.registry.active_session() {
            Some(handle) => {
                let id = lock_session(&handle).id();
                reports::merge_report_file(&self.registry, id, path)
            }
            None => reports::import_report_file(&self.registry, path, None).map(|_| ()),
        };
        if let Err(error) = outcome {
            warn!("failed to ingest remote report file `{path}`: {error}");
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<EngineShared>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("accepted remote connection from {peer}");
                let shared = Arc::clone(&shared);
                tokio::spawn(serve_connection(stream, peer, shared));
            }
            Err(error) => {
                // Transient accept failures (out of file descriptors and the
                // like) should not kill the listener.
                warn!("failed to accept remote connection: {error}");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, shared: Arc<EngineShared>) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(error) => {
            warn!("websocket handshake with {peer} failed: {error}");
            return;
        }
    };
    let token = shared.allocate_token();
    let (mut sink, mut frames) = ws.split();
    let (sender, mut outbound) = mpsc::unbounded_channel::<Message>();
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else { break };
                if let Err(error) = sink.send(message).await {
                    warn!("failed to send to remote client {peer}: {error}");
                    break;
                }
            }
            frame = frames.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        shared.handle_frame(token, peer, &sender, &text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Pings are answered by the websocket layer; nothing
                    // else carries protocol data.
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!("socket error from remote client {peer}: {error}");
                        break;
                    }
                }
            }
        }
    }
    shared.remove_client(token);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::SessionListener,
        model::{TestElement, TestStatus},
    };
    use pretty_assertions::assert_eq;
    use testwatch_wire::RemoteTestOutcome;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn report_of(entries: &[(&str, &str)]) -> ReportData {
        ReportData {
            tests: entries
                .iter()
                .map(|&(status, method)| RemoteTestOutcome {
                    status: status.to_owned(),
                    method: method.to_owned(),
                    ..RemoteTestOutcome::default()
                })
                .collect(),
        }
    }

    fn connect(shared: &EngineShared, key: &str) -> (ClientToken, UnboundedReceiver<Message>) {
        let (sender, outbound) = mpsc::unbounded_channel();
        let token = shared.allocate_token();
        shared.register_client(token, HelloData::new(key), sender);
        (token, outbound)
    }

    fn decode_frame(outbound: &mut UnboundedReceiver<Message>) -> Envelope {
        let Ok(Message::Text(text)) = outbound.try_recv() else {
            panic!("expected a queued text frame");
        };
        Envelope::decode(&text).expect("frame decodes")
    }

    #[test]
    fn availability_follows_registration() {
        let shared = EngineShared::new(Arc::new(SessionRegistry::new(4)));
        assert!(!shared.available.load(Ordering::SeqCst));

        let (first, _a) = connect(&shared, "c1");
        let (second, _b) = connect(&shared, "c2");
        assert!(shared.available.load(Ordering::SeqCst));

        shared.remove_client(first);
        assert!(shared.available.load(Ordering::SeqCst));
        shared.remove_client(second);
        assert!(!shared.available.load(Ordering::SeqCst));
    }

    #[test]
    fn first_registered_client_is_the_default_target() {
        let shared = EngineShared::new(Arc::new(SessionRegistry::new(4)));
        let (_first, mut first_rx) = connect(&shared, "c1");
        let (_second, mut second_rx) = connect(&shared, "c2");

        let request = RunRequest::new("CommonModule.Tests", "CheckTotals");
        shared.dispatch(None, &request).expect("dispatch succeeds");

        let envelope = decode_frame(&mut first_rx);
        assert_eq!(envelope.id, 0);
        let MessageBody::RunTest(data) = envelope.body else {
            panic!("expected a runTest body");
        };
        assert_eq!(data.method, "CheckTotals");
        assert!(data.server);
        assert!(second_rx.try_recv().is_err(), "second client stays idle");
    }

    #[test]
    fn message_ids_increase_across_clients() {
        let shared = EngineShared::new(Arc::new(SessionRegistry::new(4)));
        let (_first, mut first_rx) = connect(&shared, "c1");
        let (_second, mut second_rx) = connect(&shared, "c2");

        let request = RunRequest::new("Tests", "Check");
        let a = shared.dispatch(Some("c2"), &request).expect("to c2");
        let b = shared.dispatch(Some("c1"), &request).expect("to c1");
        let c = shared.dispatch(None, &request).expect("to the default");

        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(decode_frame(&mut second_rx).id, 0);
        assert_eq!(decode_frame(&mut first_rx).id, 1);
        assert_eq!(decode_frame(&mut first_rx).id, 2);
    }

    #[test]
    fn unknown_key_and_empty_table_are_checked_errors() {
        let shared = EngineShared::new(Arc::new(SessionRegistry::new(4)));
        let request = RunRequest::new("Tests", "Check");

        let err = shared.dispatch(None, &request).expect_err("no clients");
        assert!(matches!(err, RemoteError::NoClients));

        let (_token, _rx) = connect(&shared, "c1");
        let err = shared
            .dispatch(Some("c9"), &request)
            .expect_err("unknown key");
        match err {
            RemoteError::ClientNotFound { key } => assert_eq!(key, "c9"),
            other => panic!("expected ClientNotFound, got {other:?}"),
        }
    }

    #[test]
    fn dead_channel_reports_client_closed_and_removes_it() {
        let shared = EngineShared::new(Arc::new(SessionRegistry::new(4)));
        let (_token, rx) = connect(&shared, "c1");
        drop(rx);

        let err = shared
            .dispatch(None, &RunRequest::new("Tests", "Check"))
            .expect_err("receiver is gone");
        assert!(matches!(err, RemoteError::ClientClosed { key } if key == "c1"));
        assert!(!shared.available.load(Ordering::SeqCst));
        assert!(shared.lock_clients().by_key.is_empty());
    }

    #[test]
    fn rehello_moves_the_key_to_the_new_connection() {
        let shared = EngineShared::new(Arc::new(SessionRegistry::new(4)));
        let (old, _old_rx) = connect(&shared, "c1");
        let (_new, mut new_rx) = connect(&shared, "c1");

        {
            let clients = shared.lock_clients();
            assert_eq!(clients.by_token.len(), 1);
            assert!(!clients.by_token.contains_key(&old));
        }
        shared
            .dispatch(Some("c1"), &RunRequest::new("Tests", "Check"))
            .expect("dispatch to the new connection");
        assert_eq!(decode_frame(&mut new_rx).id, 0);
    }

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        fn record(&self, event: impl Into<String>) {
            self.events.lock().unwrap().push(event.into());
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl SessionListener for RecordingListener {
        fn session_started(&self, _session: &Session) {
            self.record("started");
        }

        fn session_finished(&self, _session: &Session) {
            self.record("finished");
        }

        fn test_case_finished(&self, _session: &Session, case: &TestElement) {
            self.record(format!("case {}", case.method_name()));
        }
    }

    #[test]
    fn report_fills_the_active_session() {
        let registry = Arc::new(SessionRegistry::new(4));
        let listener = Arc::new(RecordingListener::default());
        registry.listeners().add(listener.clone());
        let shared = EngineShared::new(Arc::clone(&registry));
        let (token, _rx) = connect(&shared, "c1");

        let active = registry.start_session("remote run", Some("acme.billing"));
        shared.ingest_report(
            token,
            &report_of(&[("passed", "CheckTotals"), ("failed", "CheckRounding")]),
        );

        let session = lock_session(&active);
        assert!(session.is_done());
        assert_eq!(session.counts().total, 2);
        assert_eq!(session.counts().failures, 1);
        assert_eq!(registry.len(), 1, "no second session appears");
        assert_eq!(
            listener.events(),
            [
                "started",
                "case CheckTotals",
                "case CheckRounding",
                "finished"
            ]
        );
    }

    #[test]
    fn report_without_an_active_session_registers_a_new_one() {
        let registry = Arc::new(SessionRegistry::new(4));
        let shared = EngineShared::new(Arc::clone(&registry));
        let (token, _rx) = connect(&shared, "c1");

        shared.ingest_report(token, &report_of(&[("passed", "CheckTotals")]));

        assert_eq!(registry.len(), 1);
        let overview = registry.overviews().remove(0);
        assert_eq!(overview.name(), "remote run (c1)");
        assert_eq!(overview.status(), TestStatus::Ok);
        assert_eq!(overview.counts().total, 1);
    }

    #[test]
    fn report_racing_a_stop_lands_in_its_own_session() {
        let registry = Arc::new(SessionRegistry::new(4));
        let shared = EngineShared::new(Arc::clone(&registry));
        let (token, _rx) = connect(&shared, "c1");

        // A stop can slip in after a report has looked the active session
        // up but before it takes the lock.
        let stale = registry.start_session("remote run", None);
        let id = lock_session(&stale).id();
        registry.stop_session(id);

        let report = report_of(&[("passed", "CheckTotals")]);
        assert!(!shared.fill_active_session(&stale, "c1", &report));
        assert_eq!(lock_session(&stale).counts().total, 0);

        shared.ingest_report(token, &report);
        assert_eq!(registry.len(), 2);
        let overview = registry.overviews().remove(0);
        assert_eq!(overview.name(), "remote run (c1)");
        assert_eq!(overview.counts().total, 1);
    }
}
