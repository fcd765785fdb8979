//! HTTP server for the Weldr API.
//!
//! Requests arrive over a Unix socket (or TCP for tests and debugging) and
//! are dispatched by [`router`] to the handlers, each on its own thread.
//! On shutdown the server stops accepting connections, waits for in-flight
//! requests for up to [`DRAIN_TIMEOUT`], and closes the engine so the state
//! writer flushes.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

pub mod config;
pub mod handlers;
pub mod query;
pub mod response;
pub mod router;

pub use config::{Cli, FileConfig, Settings};
pub use router::{route_request, ApiRequest};

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tiny_http::Server;
use tracing::{debug, error, info, warn};
use weldr_backend::mock::{fixture_depsolver, fixture_registry};
use weldr_backend::{BackendError, InMemoryJobQueue, LocalWorker, WorkerHandle};
use weldr_core::{Adapters, CoreError, Weldr, WeldrConfig};

/// How long shutdown waits for in-flight requests.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Where the server accepts connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listener {
    Unix(PathBuf),
    Tcp(String),
}

impl std::fmt::Display for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// Bind `listener`. A stale Unix socket file is replaced.
pub fn bind(listener: &Listener) -> Result<Server, ServerError> {
    let bound = match listener {
        Listener::Unix(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            if path.exists() {
                fs::remove_file(path)?;
            }
            Server::http_unix(path)
        }
        Listener::Tcp(addr) => Server::http(addr.as_str()),
    };
    bound.map_err(|e| ServerError::Bind(listener.to_string(), e.to_string()))
}

fn read_request(req: &mut tiny_http::Request) -> std::io::Result<ApiRequest> {
    let mut body = Vec::new();
    req.as_reader().read_to_end(&mut body)?;
    let content_type = req
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_owned());
    let mut api = ApiRequest::new(req.method().clone(), req.url());
    api.content_type = content_type;
    api.body = body;
    Ok(api)
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(weldr: &Weldr, mut req: tiny_http::Request) {
    debug!("{} {}", req.method(), req.url());
    let reply = match read_request(&mut req) {
        Ok(api) => route_request(weldr, &api),
        Err(e) => {
            warn!("failed to read request body: {e}");
            response::Reply::http_error(400, "Bad Request")
        }
    };
    let status = reply.status;
    if let Err(e) = req.respond(reply.into_response()) {
        debug!("failed to send {status} response: {e}");
    }
}

/// Decrements the in-flight count when a request thread ends.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(count))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Accept requests until `stop` returns true, one thread per request, then
/// wait for in-flight requests to finish.
pub fn serve(server: &Server, weldr: &Arc<Weldr>, stop: &dyn Fn() -> bool) {
    let in_flight = Arc::new(AtomicUsize::new(0));
    while !stop() {
        let request = match server.recv_timeout(ACCEPT_POLL) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                error!("accept failed: {e}");
                break;
            }
        };
        let guard = InFlight::enter(&in_flight);
        let weldr = Arc::clone(weldr);
        let spawned = std::thread::Builder::new()
            .name("weldr-request".to_owned())
            .spawn(move || {
                let _guard = guard;
                handle_request(&weldr, request);
            });
        if let Err(e) = spawned {
            error!("failed to spawn request thread: {e}");
        }
    }
    drain(&in_flight);
}

fn drain(in_flight: &AtomicUsize) {
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while in_flight.load(Ordering::SeqCst) > 0 {
        if Instant::now() >= deadline {
            warn!(
                pending = in_flight.load(Ordering::SeqCst),
                "shutdown grace period expired with requests in flight"
            );
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Serve until a shutdown signal arrives, then flush state and remove the socket.
pub fn run_server(weldr: &Arc<Weldr>, listener: &Listener) -> Result<(), ServerError> {
    let server = bind(listener)?;
    info!("listening on {listener}");
    serve(&server, weldr, &weldr_core::shutdown_requested);
    info!("shutting down");
    weldr.close();
    if let Listener::Unix(path) = listener {
        if let Err(e) = fs::remove_file(path) {
            debug!("failed to remove socket {}: {e}", path.display());
        }
    }
    Ok(())
}

/// A test helper that starts a weldr server in a background thread.
///
/// The engine uses the fixture depsolver and registry and an in-memory job
/// queue worked by a [`LocalWorker`]. Drop the `TestServer` to stop it.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub state_dir: PathBuf,
    pub weldr: Arc<Weldr>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    worker: Option<WorkerHandle>,
}

impl TestServer {
    /// Start a test server on `127.0.0.1:0` with state under `state_dir`.
    pub fn start(state_dir: PathBuf) -> Self {
        let queue = Arc::new(InMemoryJobQueue::new());
        let adapters = Adapters {
            depsolver: Arc::new(fixture_depsolver()),
            queue: queue.clone(),
            registry: Arc::new(fixture_registry()),
        };
        let worker = LocalWorker::new(queue)
            .with_build_time(Duration::from_millis(20))
            .spawn()
            .expect("failed to spawn test worker");
        let mut server = Self::start_with(state_dir, adapters);
        server.worker = Some(worker);
        server
    }

    /// Start a test server with caller-provided adapters and no worker.
    pub fn start_with(state_dir: PathBuf, adapters: Adapters) -> Self {
        let server = bind(&Listener::Tcp("127.0.0.1:0".to_owned()))
            .expect("failed to bind test HTTP server");
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");
        let mut server = Self::spawn(server, state_dir, adapters);
        server.url = url;
        server.port = port;
        server
    }

    /// Start a test server listening on the Unix socket `socket`.
    pub fn start_unix(state_dir: PathBuf, socket: PathBuf) -> Self {
        let adapters = Adapters {
            depsolver: Arc::new(fixture_depsolver()),
            queue: Arc::new(InMemoryJobQueue::new()),
            registry: Arc::new(fixture_registry()),
        };
        let server = bind(&Listener::Unix(socket.clone())).expect("failed to bind test socket");
        let mut server = Self::spawn(server, state_dir, adapters);
        server.url = format!("unix:{}", socket.display());
        server
    }

    fn spawn(server: Server, state_dir: PathBuf, adapters: Adapters) -> Self {
        let weldr = Arc::new(
            Weldr::open(&WeldrConfig::new(&state_dir), adapters).expect("failed to open engine"),
        );
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let weldr = Arc::clone(&weldr);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || serve(&server, &weldr, &|| stop.load(Ordering::SeqCst)))
        };
        Self {
            url: String::new(),
            port: 0,
            state_dir,
            weldr,
            stop,
            handle: Some(handle),
            worker: None,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        self.weldr.close();
    }
}
