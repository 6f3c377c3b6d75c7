//! Tokio driver for the delivery machine.

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::machine::{Command, DeliveryMachine, Input, ReadOutcome};
use crate::source::{ConnectivityMonitor, ConnectivitySink, FixSink, PositionSource};
use crate::stats::DeliveryStats;
use crate::status::{LogStatusSink, StatusSink};
use crate::transport::Transport;
use fieldpulse_core::PositionQueue;
use fieldpulse_protocol::RequestFormatter;
use parking_lot::RwLock;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, warn};

/// Runs a [`DeliveryMachine`] against a queue, a transport and a formatter.
///
/// # Example
///
/// ```no_run
/// use fieldpulse_core::MemoryQueue;
/// use fieldpulse_protocol::OsmAndFormatter;
/// use fieldpulse_tracker::{
///     ChannelPositionSource, ManualConnectivity, MockTransport, TrackerConfig,
///     TrackingController,
/// };
/// use std::sync::Arc;
///
/// # async fn run() -> fieldpulse_tracker::TrackerResult<()> {
/// let controller = TrackingController::new(
///     TrackerConfig::new("http://collector:5055", "pulse-01"),
///     Arc::new(MemoryQueue::new()),
///     Arc::new(MockTransport::new()),
///     OsmAndFormatter,
/// )?;
///
/// let source = Arc::new(ChannelPositionSource::new());
/// let handle = controller.start(source.clone(), Arc::new(ManualConnectivity::new(true)));
/// // ... push fixes through `source` ...
/// let stats = handle.stop().await?;
/// println!("{} positions delivered", stats.sent);
/// # Ok(())
/// # }
/// ```
pub struct TrackingController<Q, T, F> {
    config: TrackerConfig,
    queue: Arc<Q>,
    transport: Arc<T>,
    formatter: Arc<F>,
    status: Arc<dyn StatusSink>,
}

impl<Q, T, F> TrackingController<Q, T, F>
where
    Q: PositionQueue,
    T: Transport,
    F: RequestFormatter,
{
    /// Creates a controller. Statuses go to the log until
    /// [`with_status_sink`](Self::with_status_sink) is used.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Config`] if the configuration is invalid.
    pub fn new(
        config: TrackerConfig,
        queue: Arc<Q>,
        transport: Arc<T>,
        formatter: F,
    ) -> TrackerResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            queue,
            transport,
            formatter: Arc::new(formatter),
            status: Arc::new(LogStatusSink),
        })
    }

    /// Sets the status sink.
    pub fn with_status_sink(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Starts delivery on the current tokio runtime.
    ///
    /// The connectivity state is taken from `monitor` first; if online, the
    /// queue is read before the position source is subscribed.
    pub fn start(
        &self,
        source: Arc<dyn PositionSource>,
        monitor: Arc<dyn ConnectivityMonitor>,
    ) -> TrackerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let stats = Arc::new(RwLock::new(DeliveryStats::default()));

        let driver = Driver {
            endpoint: self.config.endpoint_url.clone(),
            queue: Arc::clone(&self.queue),
            transport: Arc::clone(&self.transport),
            formatter: Arc::clone(&self.formatter),
            status: Arc::clone(&self.status),
            tx,
            retry: None,
        };
        let machine = DeliveryMachine::new(&self.config);

        let task = tokio::spawn(driver.run(
            machine,
            rx,
            stop_rx,
            source,
            monitor,
            Arc::clone(&stats),
        ));

        TrackerHandle {
            stop_tx,
            task,
            stats,
        }
    }
}

/// A running controller.
///
/// Dropping the handle stops delivery as well, without waiting.
pub struct TrackerHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<DeliveryStats>,
    stats: Arc<RwLock<DeliveryStats>>,
}

impl TrackerHandle {
    /// Returns the counters as of the last handled event.
    pub fn stats(&self) -> DeliveryStats {
        *self.stats.read()
    }

    /// Stops delivery and returns the final counters.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Join`] if the controller task panicked.
    pub async fn stop(self) -> TrackerResult<DeliveryStats> {
        // The task may already have ended; the join below reports it.
        let _ = self.stop_tx.send(());
        self.task
            .await
            .map_err(|e| TrackerError::Join(e.to_string()))
    }
}

struct Driver<Q, T, F> {
    endpoint: String,
    queue: Arc<Q>,
    transport: Arc<T>,
    formatter: Arc<F>,
    status: Arc<dyn StatusSink>,
    tx: mpsc::UnboundedSender<Input>,
    retry: Option<Pin<Box<Sleep>>>,
}

async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

impl<Q, T, F> Driver<Q, T, F>
where
    Q: PositionQueue,
    T: Transport,
    F: RequestFormatter,
{
    async fn run(
        mut self,
        mut machine: DeliveryMachine,
        mut rx: mpsc::UnboundedReceiver<Input>,
        mut stop_rx: oneshot::Receiver<()>,
        source: Arc<dyn PositionSource>,
        monitor: Arc<dyn ConnectivityMonitor>,
        stats: Arc<RwLock<DeliveryStats>>,
    ) -> DeliveryStats {
        let commands = machine.start(monitor.is_online());
        self.execute(commands);

        monitor.start(ConnectivitySink::new(self.tx.clone()));
        if let Err(e) = source.start(FixSink::new(self.tx.clone())) {
            warn!(error = %e, "position source did not start, no new fixes will arrive");
        }

        loop {
            let commands = tokio::select! {
                _ = &mut stop_rx => break,
                Some(input) = rx.recv() => machine.handle(input),
                () = retry_elapsed(&mut self.retry), if self.retry.is_some() => {
                    self.retry = None;
                    machine.handle(Input::RetryElapsed)
                }
            };
            self.execute(commands);
            *stats.write() = *machine.stats();
        }

        let commands = machine.stop();
        self.execute(commands);
        if let Err(e) = source.stop() {
            warn!(error = %e, "position source did not stop cleanly");
        }
        monitor.stop();

        let final_stats = *machine.stats();
        *stats.write() = final_stats;
        final_stats
    }

    fn execute(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::Insert { ticket, position } => {
                    let queue = Arc::clone(&self.queue);
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let id = match queue.insert(position).await {
                            Ok(id) => Some(id),
                            Err(e) => {
                                warn!(error = %e, "queue insert failed");
                                None
                            }
                        };
                        let _ = tx.send(Input::Inserted { ticket, id });
                    });
                }
                Command::SelectOldest { ticket } => {
                    let queue = Arc::clone(&self.queue);
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let outcome = match queue.select_oldest().await {
                            Ok(Some(position)) => ReadOutcome::Found(position),
                            Ok(None) => ReadOutcome::Empty,
                            Err(e) => {
                                warn!(error = %e, "queue read failed");
                                ReadOutcome::Failed
                            }
                        };
                        let _ = tx.send(Input::Selected { ticket, outcome });
                    });
                }
                Command::Delete { ticket, id } => {
                    let queue = Arc::clone(&self.queue);
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let success = match queue.delete(id).await {
                            Ok(()) => true,
                            Err(e) => {
                                warn!(id, error = %e, "queue delete failed");
                                false
                            }
                        };
                        let _ = tx.send(Input::Deleted { ticket, success });
                    });
                }
                Command::Send { ticket, position } => {
                    let transport = Arc::clone(&self.transport);
                    let formatter = Arc::clone(&self.formatter);
                    let endpoint = self.endpoint.clone();
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let result = match formatter.format(&endpoint, &position) {
                            Ok(request) => transport.send(&request).await,
                            Err(e) => Err(e.into()),
                        };
                        let success = match result {
                            Ok(()) => true,
                            Err(e) => {
                                warn!(
                                    id = position.id,
                                    error = %e,
                                    retryable = e.is_retryable(),
                                    "send failed"
                                );
                                false
                            }
                        };
                        let _ = tx.send(Input::Sent { ticket, success });
                    });
                }
                Command::ArmRetry(delay) => {
                    self.retry = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Command::CancelRetry => {
                    if self.retry.take().is_some() {
                        debug!("retry timer cancelled");
                    }
                }
                Command::Publish(status) => self.status.publish(status),
            }
        }
    }
}
