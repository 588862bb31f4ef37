use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use changecache::server::serve_with_listener;
use changecache::ChangeTrackingServer;
use changecache::NetworkConfig;
use changecache::ServerConfig;
use changecache::Settings;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A change-tracking service listening on a real socket.
pub struct TestService {
    pub addr: SocketAddr,
    pub server: Arc<ChangeTrackingServer>,
    shutdown_tx: watch::Sender<()>,
    handle: JoinHandle<changecache::Result<()>>,
}

impl TestService {
    /// Binds `addr` (port 0 for an ephemeral port) and serves on it.
    pub async fn start(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let server = Arc::new(ChangeTrackingServer::new(&ServerConfig::default()));
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let serving = server.clone();
        let handle = tokio::spawn(async move {
            let network = NetworkConfig::default();
            serve_with_listener(serving, listener, &network, shutdown_rx).await
        });

        Self {
            addr,
            server,
            shutdown_tx,
            handle,
        }
    }

    pub async fn start_ephemeral() -> Self {
        Self::start("127.0.0.1:0".parse().expect("valid address")).await
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = timeout(WAIT_TIMEOUT, self.handle).await;
    }
}

/// Client settings pointing at `addr`, with short reconnect delays.
pub fn client_settings(addr: SocketAddr) -> Settings {
    let mut settings = Settings::default();
    settings.client.endpoint = format!("http://{addr}");
    settings.retry.connect.delays_ms = vec![10, 20, 50];
    settings.retry.subscribe.base_delay_ms = 10;
    settings
}

pub async fn wait_until(cond: impl Fn() -> bool) {
    timeout(WAIT_TIMEOUT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
