//! SSH tunnel server
//!
//! Listens for SSH connections, authenticates one fixed account, and turns
//! reverse port-forward requests into [`TunnelInfo`] records.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped --start()--> Starting --bound--> Listening --stop()--> Stopped
//!                         |
//!                         +--bind failed--> Stopped
//! ```
//!
//! Sessions run as tasks in a `JoinSet` owned by the accept loop. `stop()`
//! signals every session to disconnect, waits up to [`DRAIN_TIMEOUT`] for
//! them to finish, then aborts the rest.

use super::handler::SessionHandler;
use crate::error::{Result, ServerError};
use crate::host_key::generate_host_key;
use crate::password::{GENERATED_PASSWORD_LEN, generate_password};
use crate::registry::{TunnelInfo, TunnelRegistry};
use russh::keys::PrivateKey;
use russh::server::{self as ssh_server, Config};
use russh::{Disconnect, MethodKind, MethodSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// First port tried when no port is given
pub const DYNAMIC_PORT_START: u16 = 2222;

/// Number of consecutive ports tried from [`DYNAMIC_PORT_START`]
pub const DYNAMIC_PORT_ATTEMPTS: u16 = 100;

/// How long `stop()` waits for sessions to disconnect before aborting them
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Called from the session task whenever a reverse forward is established
///
/// Runs on the async runtime; blocking work belongs on a blocking worker.
pub type TunnelCallback = Arc<dyn Fn(&TunnelInfo) + Send + Sync>;

/// Listener settings that outlive a single `start()`
#[derive(Debug, Clone)]
pub struct SshServerOptions {
    /// Address the SSH listener binds
    pub bind_addr: String,
    /// Host key; a fresh Ed25519 key is generated per start when `None`
    pub host_key: Option<PrivateKey>,
    /// Delay before answering a failed authentication
    pub auth_rejection_time: Duration,
    /// Close sessions idle for this long
    pub inactivity_timeout: Option<Duration>,
}

impl Default for SshServerOptions {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            host_key: None,
            auth_rejection_time: Duration::from_millis(250),
            inactivity_timeout: None,
        }
    }
}

/// What every session of one `start()` shares
pub(crate) struct SessionContext {
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) registry: Arc<TunnelRegistry>,
    callback: Arc<RwLock<Option<TunnelCallback>>>,
}

impl SessionContext {
    /// Invoke the tunnel callback, if any, outside the callback lock
    pub(crate) fn notify(&self, tunnel: &TunnelInfo) {
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if let Some(callback) = callback {
            callback(tunnel);
        }
    }
}

enum ServerState {
    Stopped,
    Starting,
    Listening {
        port: u16,
        password: String,
        shutdown: watch::Sender<bool>,
        accept_task: JoinHandle<()>,
    },
}

/// SSH server that accepts reverse forwards for USB/IP tunnels
///
/// # Example
/// ```no_run
/// use server::SshTunnelServer;
///
/// # async fn example() -> anyhow::Result<()> {
/// let server = SshTunnelServer::new(Default::default());
/// let port = server.start(0, "usbip", "").await?;
/// println!("ssh -N -R 0:localhost:3240 -p {} usbip@host", port);
/// println!("password: {}", server.get_password());
/// # Ok(())
/// # }
/// ```
pub struct SshTunnelServer {
    options: SshServerOptions,
    registry: Arc<TunnelRegistry>,
    callback: Arc<RwLock<Option<TunnelCallback>>>,
    state: Mutex<ServerState>,
}

impl SshTunnelServer {
    pub fn new(options: SshServerOptions) -> Self {
        Self {
            options,
            registry: Arc::new(TunnelRegistry::new()),
            callback: Arc::new(RwLock::new(None)),
            state: Mutex::new(ServerState::Stopped),
        }
    }

    /// Bind the listener and start accepting sessions
    ///
    /// With `port == 0` ports are probed upwards from [`DYNAMIC_PORT_START`];
    /// otherwise exactly `port` is bound. An empty `password` is replaced by
    /// a generated one, logged once and available from
    /// [`SshTunnelServer::get_password`]. Returns the bound port.
    pub async fn start(&self, port: u16, username: &str, password: &str) -> Result<u16> {
        {
            let mut state = self.state();
            if !matches!(*state, ServerState::Stopped) {
                return Err(ServerError::AlreadyRunning);
            }
            *state = ServerState::Starting;
        }

        match self.listen(port, username, password).await {
            Ok((port, listening)) => {
                *self.state() = listening;
                Ok(port)
            }
            Err(e) => {
                *self.state() = ServerState::Stopped;
                error!("Failed to start SSH tunnel server: {}", e);
                Err(e)
            }
        }
    }

    async fn listen(&self, port: u16, username: &str, password: &str) -> Result<(u16, ServerState)> {
        let listener = if port == 0 {
            probe_port(&self.options.bind_addr).await?
        } else {
            bind(&self.options.bind_addr, port).await?
        };
        let port = listener
            .local_addr()
            .map_err(|source| ServerError::Bind {
                addr: format!("{}:{}", self.options.bind_addr, port),
                source,
            })?
            .port();

        let password = if password.is_empty() {
            let generated = generate_password(GENERATED_PASSWORD_LEN);
            info!("Generated SSH password for user '{}': {}", username, generated);
            generated
        } else {
            password.to_string()
        };

        let config = Arc::new(self.ssh_config()?);
        let ctx = Arc::new(SessionContext {
            username: username.to_string(),
            password: password.clone(),
            registry: Arc::clone(&self.registry),
            callback: Arc::clone(&self.callback),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, config, ctx, shutdown_rx));

        info!(
            "SSH tunnel server listening on {}:{}",
            self.options.bind_addr, port
        );

        let listening = ServerState::Listening {
            port,
            password,
            shutdown,
            accept_task,
        };
        Ok((port, listening))
    }

    fn ssh_config(&self) -> Result<Config> {
        let mut config = ssh_server::Config {
            auth_rejection_time: self.options.auth_rejection_time,
            auth_rejection_time_initial: Some(Duration::from_millis(0)),
            inactivity_timeout: self.options.inactivity_timeout,
            nodelay: true,
            ..Default::default()
        };

        config.methods = MethodSet::empty();
        config.methods.push(MethodKind::Password);

        let key = match &self.options.host_key {
            Some(key) => key.clone(),
            None => generate_host_key()?,
        };
        config.keys.push(key);

        Ok(config)
    }

    /// Stop accepting, disconnect every session, and clear the registry
    ///
    /// No-op unless listening.
    pub async fn stop(&self) {
        let (port, shutdown, accept_task) = {
            let mut state = self.state();
            match std::mem::replace(&mut *state, ServerState::Stopped) {
                ServerState::Listening {
                    port,
                    shutdown,
                    accept_task,
                    ..
                } => (port, shutdown, accept_task),
                other => {
                    *state = other;
                    return;
                }
            }
        };

        info!("Stopping SSH tunnel server on port {}", port);
        let _ = shutdown.send(true);
        if let Err(e) = accept_task.await {
            error!("SSH accept loop failed: {}", e);
        }

        self.registry.clear();
        info!("SSH tunnel server stopped");
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state(), ServerState::Listening { .. })
    }

    /// Bound port, or 0 when not listening
    pub fn get_port(&self) -> u16 {
        match &*self.state() {
            ServerState::Listening { port, .. } => *port,
            _ => 0,
        }
    }

    /// Password in effect, or an empty string when not listening
    pub fn get_password(&self) -> String {
        match &*self.state() {
            ServerState::Listening { password, .. } => password.clone(),
            _ => String::new(),
        }
    }

    pub fn get_active_tunnels(&self) -> Vec<TunnelInfo> {
        self.registry.get_active_tunnels()
    }

    pub fn get_tunnel(&self, client_id: &str) -> Option<TunnelInfo> {
        self.registry.get_tunnel(client_id)
    }

    /// Shared handle to the tunnel registry
    pub fn registry(&self) -> Arc<TunnelRegistry> {
        Arc::clone(&self.registry)
    }

    /// Replace the tunnel-established callback
    pub fn set_tunnel_callback(&self, callback: TunnelCallback) {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn bind(bind_addr: &str, port: u16) -> Result<TcpListener> {
    TcpListener::bind((bind_addr, port))
        .await
        .map_err(|source| ServerError::Bind {
            addr: format!("{}:{}", bind_addr, port),
            source,
        })
}

async fn probe_port(bind_addr: &str) -> Result<TcpListener> {
    for offset in 0..DYNAMIC_PORT_ATTEMPTS {
        let port = DYNAMIC_PORT_START + offset;
        match bind(bind_addr, port).await {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!("{}", e),
        }
    }

    Err(ServerError::NoFreePort {
        start: DYNAMIC_PORT_START,
        attempts: DYNAMIC_PORT_ATTEMPTS,
    })
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<Config>,
    ctx: Arc<SessionContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "SSH connection accepted");
                    let handler = SessionHandler::new(Arc::clone(&ctx), peer);
                    sessions.spawn(run_session(Arc::clone(&config), stream, handler, shutdown.clone()));
                }
                Err(e) => {
                    warn!("SSH accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = joined {
                    error!("SSH session task failed: {}", e);
                }
            }
        }
    }

    drop(listener);
    debug!("Draining {} SSH session(s)", sessions.len());

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!("SSH session task failed: {}", e);
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            "{} SSH session(s) did not close within {:?}, aborting",
            sessions.len(),
            DRAIN_TIMEOUT
        );
        sessions.shutdown().await;
    }
}

async fn run_session(
    config: Arc<Config>,
    stream: TcpStream,
    handler: SessionHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    let peer = handler.peer_addr();

    let session = match ssh_server::run_stream(config, stream, handler).await {
        Ok(session) => session,
        Err(e) => {
            warn!(peer = %peer, "SSH handshake failed: {}", e);
            return;
        }
    };
    let handle = session.handle();
    tokio::pin!(session);

    tokio::select! {
        result = &mut session => match result {
            Ok(()) => info!(peer = %peer, "SSH session closed"),
            Err(e) => warn!(peer = %peer, "SSH session ended with error: {}", e),
        },
        _ = shutdown.changed() => {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "server shutting down".into(), "en".into())
                .await
            {
                debug!(peer = %peer, "disconnect failed: {:?}", e);
            }
            if let Err(e) = session.await {
                debug!(peer = %peer, "SSH session ended with error: {}", e);
            }
            info!(peer = %peer, "SSH session closed by shutdown");
        }
    }
}
