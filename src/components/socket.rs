//! TCP socket driver. Each driver owns one thread running a current-thread
//! tokio runtime; received bytes are pushed into the bound [`RecvPort`].
//! Outgoing data waits in a bounded queue of [`SEND_QUEUE_DEPTH`] buffers
//! until a peer is connected.

use super::framing::RecvPort;
use super::task::{TaskError, TaskSpec};
use super::{Component, ComponentCore};
use crate::sizing::{BUFFERS_PER_CLASS, COM_DRIVER_BUFFER_SIZE};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);
pub const SEND_QUEUE_DEPTH: usize = BUFFERS_PER_CLASS as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("socket task is not running")]
    NotRunning,
    #[error("send queue is full")]
    QueueFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketMode {
    /// Connects out to the endpoint, retrying until stopped.
    Client,
    /// Listens on the endpoint and serves one peer at a time.
    Server,
}

#[derive(Debug, Default)]
pub struct SocketStats {
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    send_dropped: AtomicU64,
    connections: AtomicU64,
}

impl SocketStats {
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Acquire)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Acquire)
    }

    pub fn send_dropped(&self) -> u64 {
        self.send_dropped.load(Ordering::Acquire)
    }

    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct SocketDriver {
    core: ComponentCore,
    mode: SocketMode,
    endpoint: Option<(String, u16)>,
    reconnect_interval: Duration,
    recv: Option<RecvPort>,
    shutdown: Option<watch::Sender<bool>>,
    outgoing: Option<mpsc::Sender<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    stats: Arc<SocketStats>,
}

impl SocketDriver {
    fn with_mode(name: &str, mode: SocketMode) -> Self {
        Self {
            core: ComponentCore::new(name),
            mode,
            endpoint: None,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            recv: None,
            shutdown: None,
            outgoing: None,
            handle: None,
            local_addr: None,
            stats: Arc::new(SocketStats::default()),
        }
    }

    pub fn client(name: &str) -> Self {
        Self::with_mode(name, SocketMode::Client)
    }

    pub fn server(name: &str) -> Self {
        Self::with_mode(name, SocketMode::Server)
    }

    pub fn mode(&self) -> SocketMode {
        self.mode
    }

    pub fn configure(&mut self, host: &str, port: u16) {
        self.endpoint = Some((host.to_string(), port));
    }

    pub fn endpoint(&self) -> Option<(&str, u16)> {
        self.endpoint.as_ref().map(|(host, port)| (host.as_str(), *port))
    }

    pub fn set_reconnect_interval(&mut self, interval: Duration) {
        self.reconnect_interval = interval;
    }

    pub fn connect_recv(&mut self, port: RecvPort) {
        self.recv = Some(port);
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Address actually bound by a running server.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<SocketStats> {
        Arc::clone(&self.stats)
    }

    /// Queues `data` for the connected peer without waiting.
    pub fn send(&self, data: Vec<u8>) -> Result<(), SendError> {
        let result = match &self.outgoing {
            Some(outgoing) => outgoing.try_send(data).map_err(|e| match e {
                TrySendError::Full(_) => SendError::QueueFull,
                TrySendError::Closed(_) => SendError::NotRunning,
            }),
            None => Err(SendError::NotRunning),
        };
        if result.is_err() {
            self.stats.send_dropped.fetch_add(1, Ordering::AcqRel);
        }
        result
    }

    /// Server mode binds before returning, so bind failures surface here.
    pub fn start(&mut self, spec: &TaskSpec) -> Result<(), TaskError> {
        if self.handle.is_some() {
            return Err(TaskError::AlreadyRunning { name: spec.name });
        }
        let (host, port) = self
            .endpoint
            .clone()
            .ok_or(TaskError::NotConfigured { name: spec.name })?;
        let address = format!("{host}:{port}");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| TaskError::Runtime { name: spec.name, source })?;

        let listener = match self.mode {
            SocketMode::Server => {
                let bind_error = |source: std::io::Error| TaskError::Bind {
                    name: spec.name,
                    address: address.clone(),
                    source,
                };
                let listener = std::net::TcpListener::bind((host.as_str(), port)).map_err(&bind_error)?;
                listener.set_nonblocking(true).map_err(&bind_error)?;
                self.local_addr = listener.local_addr().ok();
                Some(listener)
            }
            SocketMode::Client => None,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let owner = self.core.name().to_string();
        let recv = self.recv.clone();
        let stats = Arc::clone(&self.stats);
        let reconnect = self.reconnect_interval;
        let target = address.clone();

        let handle = thread::Builder::new()
            .name(spec.name.to_string())
            .stack_size(spec.stack_size)
            .spawn(move || {
                runtime.block_on(async move {
                    let link = Link {
                        owner: &owner,
                        shutdown: shutdown_rx,
                        outgoing: outgoing_rx,
                        recv,
                        stats: &stats,
                    };
                    match listener {
                        Some(listener) => serve(listener, link).await,
                        None => connect_loop(&target, reconnect, link).await,
                    }
                });
            })
            .map_err(|source| TaskError::Spawn { name: spec.name, source })?;

        info!(
            component = self.core.name(),
            task = %spec.name,
            mode = ?self.mode,
            %address,
            priority = spec.priority,
            "socket task started"
        );
        self.shutdown = Some(shutdown_tx);
        self.outgoing = Some(outgoing_tx);
        self.handle = Some(handle);
        Ok(())
    }

    /// Signals the socket thread to exit. No effect if never started.
    pub fn stop(&mut self) {
        if let Some(shutdown) = &self.shutdown {
            shutdown.send_replace(true);
        }
    }

    pub fn join(&mut self) -> Result<(), TaskError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let result = handle.join().map_err(|_| TaskError::Panicked {
            name: super::component_name(self.core.name()),
        });
        self.shutdown = None;
        self.outgoing = None;
        self.local_addr = None;
        debug!(component = self.core.name(), "socket task joined");
        result
    }
}

impl Component for SocketDriver {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn initialize(&mut self, _queue_depth: usize, instance: u32) {
        self.core.initialize(instance);
        self.endpoint = None;
        self.recv = None;
        self.stats = Arc::new(SocketStats::default());
    }
}

/// State of one socket thread.
struct Link<'a> {
    owner: &'a str,
    shutdown: watch::Receiver<bool>,
    outgoing: mpsc::Receiver<Vec<u8>>,
    recv: Option<RecvPort>,
    stats: &'a SocketStats,
}

enum Activity {
    Read(std::io::Result<usize>),
    Send(Vec<u8>),
}

async fn serve(listener: std::net::TcpListener, mut link: Link<'_>) {
    let owner = link.owner;
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            error!(component = owner, error = %e, "failed to register listener with runtime");
            return;
        }
    };

    while !*link.shutdown.borrow() {
        let accepted = tokio::select! {
            _ = link.shutdown.changed() => return,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                info!(component = owner, %peer, "peer connected");
                link.stats.connections.fetch_add(1, Ordering::AcqRel);
                if exchange(stream, &mut link).await {
                    return;
                }
                info!(component = owner, %peer, "peer disconnected");
            }
            Err(e) => warn!(component = owner, error = %e, "accept failed"),
        }
    }
}

async fn connect_loop(address: &str, reconnect: Duration, mut link: Link<'_>) {
    let owner = link.owner;
    while !*link.shutdown.borrow() {
        let connected = tokio::select! {
            _ = link.shutdown.changed() => return,
            connected = TcpStream::connect(address) => connected,
        };
        match connected {
            Ok(stream) => {
                info!(component = owner, address, "connected");
                link.stats.connections.fetch_add(1, Ordering::AcqRel);
                if exchange(stream, &mut link).await {
                    return;
                }
                warn!(component = owner, address, "connection closed");
            }
            Err(e) => debug!(component = owner, address, error = %e, "connect failed"),
        }

        tokio::select! {
            _ = link.shutdown.changed() => return,
            _ = tokio::time::sleep(reconnect) => {}
        }
    }
}

/// Reads into the receiver and writes queued data until the connection
/// ends. Returns `true` when it ended because of a shutdown request.
async fn exchange(mut stream: TcpStream, link: &mut Link<'_>) -> bool {
    let owner = link.owner;
    let mut buffer = vec![0u8; COM_DRIVER_BUFFER_SIZE];
    loop {
        let activity = tokio::select! {
            _ = link.shutdown.changed() => return true,
            read = stream.read(&mut buffer) => Activity::Read(read),
            Some(data) = link.outgoing.recv() => Activity::Send(data),
        };
        match activity {
            Activity::Read(Ok(0)) => return false,
            Activity::Read(Ok(n)) => {
                link.stats.bytes_received.fetch_add(n as u64, Ordering::AcqRel);
                match &link.recv {
                    Some(port) => {
                        port.deliver(&buffer[..n]);
                    }
                    None => debug!(component = owner, len = n, "no receiver bound, data dropped"),
                }
            }
            Activity::Read(Err(e)) => {
                warn!(component = owner, error = %e, "read failed");
                return false;
            }
            Activity::Send(data) => {
                if let Err(e) = stream.write_all(&data).await {
                    link.stats.send_dropped.fetch_add(1, Ordering::AcqRel);
                    warn!(component = owner, error = %e, "write failed");
                    return false;
                }
                link.stats.bytes_sent.fetch_add(data.len() as u64, Ordering::AcqRel);
            }
        }
    }
}
