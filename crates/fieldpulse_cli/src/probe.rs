//! Connectivity monitor that probes the collector with TCP connects.

use fieldpulse_tracker::{ConnectivityMonitor, ConnectivitySink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Returns the `host:port` to probe for an http(s) endpoint.
pub fn probe_target(endpoint: &str) -> Option<String> {
    let (scheme, rest) = endpoint.split_once("://")?;
    let default_port = match scheme.to_ascii_lowercase().as_str() {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    if host_port.is_empty() {
        return None;
    }

    // Bracketed IPv6 literals carry colons of their own.
    let (host, port) = if let Some(stripped) = host_port.strip_prefix('[') {
        let (host, tail) = stripped.split_once(']')?;
        (format!("[{host}]"), tail.strip_prefix(':'))
    } else {
        match host_port.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), Some(port)),
            None => (host_port.to_string(), None),
        }
    };
    if host.is_empty() || host == "[]" {
        return None;
    }

    let port = match port {
        Some(port) => port.parse::<u16>().ok()?,
        None => default_port,
    };
    Some(format!("{host}:{port}"))
}

/// Returns true if a TCP connection to `target` succeeds in time.
pub async fn reachable(target: &str, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(target)).await,
        Ok(Ok(_))
    )
}

/// Reports the collector as online while it accepts TCP connections.
pub struct ProbeConnectivityMonitor {
    target: String,
    interval: Duration,
    online: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProbeConnectivityMonitor {
    /// Creates a monitor for `endpoint`. Starts out offline.
    pub fn new(endpoint: &str, interval: Duration) -> Option<Self> {
        Some(Self {
            target: probe_target(endpoint)?,
            interval,
            online: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        })
    }

    /// Returns the probed address.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Probes once and records the result without notifying anyone.
    pub async fn probe_now(&self) -> bool {
        let online = reachable(&self.target, CONNECT_TIMEOUT).await;
        self.online.store(online, Ordering::SeqCst);
        online
    }
}

impl ConnectivityMonitor for ProbeConnectivityMonitor {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn start(&self, sink: ConnectivitySink) {
        let target = self.target.clone();
        let interval = self.interval;
        let online = Arc::clone(&self.online);

        let task = tokio::spawn(async move {
            loop {
                let now = reachable(&target, CONNECT_TIMEOUT.min(interval)).await;
                if online.swap(now, Ordering::SeqCst) != now {
                    info!(target = %target, online = now, "collector connectivity changed");
                    if !sink.set_online(now) {
                        break;
                    }
                }
                tokio::time::sleep(interval).await;
            }
            debug!("connectivity probe finished");
        });

        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}
