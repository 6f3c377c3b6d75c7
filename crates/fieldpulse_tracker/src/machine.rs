//! Delivery state machine.
//!
//! The machine performs no I/O. It consumes one [`Input`] at a time and
//! answers with the [`Command`]s the driver must run. Every command that
//! completes asynchronously carries a [`Ticket`]; completions presenting an
//! outdated ticket (from before a stop) are discarded.
//!
//! ## Pipeline
//!
//! With buffering enabled, delivery runs as a single pipeline:
//!
//! ```text
//! read ─┬─ found, own device ──► send ─┬─ ok ──► delete ──► read ...
//!       ├─ found, other device ──► delete (stale) ──► read ...
//!       ├─ empty ──► idle (drain pending)
//!       └─ fault ──► retry
//!                                      └─ fail ──► retry
//! ```
//!
//! Fixes are written to the queue as they arrive. Queue operations never
//! overlap: a fix arriving while a read or delete is outstanding waits in
//! memory, and waiting writes go before the pipeline's next queue step.

use crate::config::TrackerConfig;
use crate::stats::DeliveryStats;
use crate::status::Status;
use chrono::{DateTime, Utc};
use fieldpulse_core::Position;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Identifies the run an asynchronous operation was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Result of a queue read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// The oldest pending position.
    Found(Position),
    /// Nothing is pending.
    Empty,
    /// The read failed.
    Failed,
}

/// An event delivered to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// A fix from the position source.
    Fix(Position),
    /// A failed fix from the position source.
    FixError(String),
    /// Connectivity report; may repeat the current state.
    Connectivity(bool),
    /// A queue insert finished; `id` is `None` on failure.
    Inserted {
        /// Ticket of the insert.
        ticket: Ticket,
        /// Assigned id.
        id: Option<u64>,
    },
    /// A queue read finished.
    Selected {
        /// Ticket of the read.
        ticket: Ticket,
        /// What was read.
        outcome: ReadOutcome,
    },
    /// A queue delete finished.
    Deleted {
        /// Ticket of the delete.
        ticket: Ticket,
        /// Whether it succeeded.
        success: bool,
    },
    /// A send finished.
    Sent {
        /// Ticket of the send.
        ticket: Ticket,
        /// Whether the collector confirmed it.
        success: bool,
    },
    /// The retry timer fired.
    RetryElapsed,
}

/// A side effect requested by the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Persist a position; answer with [`Input::Inserted`].
    Insert {
        /// Ticket to answer with.
        ticket: Ticket,
        /// The position.
        position: Position,
    },
    /// Read the oldest position; answer with [`Input::Selected`].
    SelectOldest {
        /// Ticket to answer with.
        ticket: Ticket,
    },
    /// Delete a position; answer with [`Input::Deleted`].
    Delete {
        /// Ticket to answer with.
        ticket: Ticket,
        /// Id to delete.
        id: u64,
    },
    /// Format and send a position; answer with [`Input::Sent`].
    Send {
        /// Ticket to answer with.
        ticket: Ticket,
        /// The position.
        position: Position,
    },
    /// Arm the one-shot retry timer; answer with [`Input::RetryElapsed`].
    ArmRetry(Duration),
    /// Disarm the retry timer.
    CancelRetry,
    /// Publish a status notification.
    Publish(Status),
}

/// Why a queued position leaves the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The collector confirmed it.
    Delivered,
    /// It was captured under another device id.
    Stale,
    /// Its coordinates cannot be encoded.
    Unencodable,
}

/// Stage of the buffered delivery pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Nothing to do until a write or connectivity change.
    Idle,
    /// Awaiting the oldest position.
    Reading,
    /// Awaiting the collector for this id.
    Sending {
        /// Id being sent.
        id: u64,
    },
    /// Awaiting removal of this id.
    Deleting {
        /// Id being deleted.
        id: u64,
        /// Why it is removed.
        removal: Removal,
    },
    /// Awaiting the retry timer.
    RetryWait,
}

/// The delivery controller's state machine.
#[derive(Debug)]
pub struct DeliveryMachine {
    device_id: String,
    buffering: bool,
    retry_delay: Duration,

    running: bool,
    epoch: u64,
    online: bool,
    drain_pending: bool,
    stage: Stage,
    /// A read or delete has been issued and not answered.
    pipeline_in_flight: bool,
    write_in_flight: bool,
    pending_writes: VecDeque<Position>,
    unbuffered: VecDeque<Position>,
    /// Capture time of the unbuffered fix being sent.
    unbuffered_in_flight: Option<DateTime<Utc>>,
    stats: DeliveryStats,
}

impl DeliveryMachine {
    /// Creates a stopped machine.
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            device_id: config.device_id.clone(),
            buffering: config.buffering,
            retry_delay: config.retry_delay,
            running: false,
            epoch: 0,
            online: false,
            drain_pending: false,
            stage: Stage::Idle,
            pipeline_in_flight: false,
            write_in_flight: false,
            pending_writes: VecDeque::new(),
            unbuffered: VecDeque::new(),
            unbuffered_in_flight: None,
            stats: DeliveryStats::default(),
        }
    }

    /// Returns the pipeline stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Returns the last known connectivity.
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Returns true if the last read found the queue empty.
    pub fn drain_pending(&self) -> bool {
        self.drain_pending
    }

    /// Returns true between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Returns the number of fixes waiting for the queue.
    pub fn pending_writes(&self) -> usize {
        self.pending_writes.len()
    }

    /// Returns the counters.
    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    /// Returns the ticket for operations issued now.
    pub fn ticket(&self) -> Ticket {
        Ticket(self.epoch)
    }

    /// Starts the machine with the monitor's current connectivity.
    ///
    /// With buffering enabled and the device online, the queue is read at
    /// once.
    pub fn start(&mut self, online: bool) -> Vec<Command> {
        let mut out = Vec::new();
        if self.running {
            return out;
        }

        self.running = true;
        self.online = online;
        info!(online, buffering = self.buffering, "delivery started");
        if self.buffering && online {
            self.enter_read();
        }
        self.pump(&mut out);
        out
    }

    /// Stops the machine.
    ///
    /// Operations still in flight run to completion but their results are
    /// ignored. Fixes that were never persisted are discarded.
    pub fn stop(&mut self) -> Vec<Command> {
        if !self.running {
            return Vec::new();
        }

        let discarded = self.pending_writes.len() + self.unbuffered.len();
        if discarded > 0 {
            debug!(discarded, "discarding unpersisted fixes");
        }

        self.running = false;
        self.epoch += 1;
        self.stage = Stage::Idle;
        self.drain_pending = false;
        self.pipeline_in_flight = false;
        self.write_in_flight = false;
        self.pending_writes.clear();
        self.unbuffered.clear();
        self.unbuffered_in_flight = None;
        info!("delivery stopped");
        vec![Command::CancelRetry]
    }

    /// Handles one event.
    pub fn handle(&mut self, input: Input) -> Vec<Command> {
        let mut out = Vec::new();
        if !self.running {
            trace!(?input, "ignoring event while stopped");
            return out;
        }

        match input {
            Input::Fix(position) => self.on_fix(position, &mut out),
            Input::FixError(error) => {
                self.stats.fix_errors += 1;
                debug!(%error, "fix error ignored");
            }
            Input::Connectivity(online) => self.on_connectivity(online, &mut out),
            Input::Inserted { ticket, id } if self.is_current(ticket) => self.on_inserted(id),
            Input::Selected { ticket, outcome } if self.is_current(ticket) => {
                self.on_selected(outcome, &mut out)
            }
            Input::Deleted { ticket, success } if self.is_current(ticket) => {
                self.on_deleted(success, &mut out)
            }
            Input::Sent { ticket, success } if self.is_current(ticket) => {
                self.on_sent(success, &mut out)
            }
            Input::RetryElapsed => self.on_retry_elapsed(),
            stale => trace!(?stale, "discarding stale completion"),
        }

        self.pump(&mut out);
        out
    }

    fn is_current(&self, ticket: Ticket) -> bool {
        ticket == self.ticket()
    }

    fn on_fix(&mut self, mut position: Position, out: &mut Vec<Command>) {
        if !position.has_finite_coordinates() {
            self.stats.fix_errors += 1;
            warn!(
                lat = position.latitude,
                lon = position.longitude,
                "fix with non-finite coordinates ignored"
            );
            return;
        }

        self.stats.fixes_received += 1;
        if position.device_id.is_empty() {
            position.device_id.clone_from(&self.device_id);
        }
        out.push(Command::Publish(Status::LocationUpdate));

        if self.buffering {
            self.pending_writes.push_back(position);
        } else {
            self.unbuffered.push_back(position);
        }
    }

    fn on_connectivity(&mut self, online: bool, out: &mut Vec<Command>) {
        if online == self.online {
            return;
        }

        self.online = online;
        info!(online, "connectivity changed");
        out.push(Command::Publish(if online {
            Status::NetworkOnline
        } else {
            Status::NetworkOffline
        }));

        if !online || !self.buffering {
            return;
        }
        match self.stage {
            Stage::Idle => self.enter_read(),
            Stage::RetryWait => {
                out.push(Command::CancelRetry);
                self.enter_read();
            }
            // A running drain continues on its own.
            _ => {}
        }
    }

    fn on_inserted(&mut self, id: Option<u64>) {
        self.write_in_flight = false;
        match id {
            Some(id) => {
                self.stats.written += 1;
                trace!(id, "write complete");
                if self.online && self.drain_pending && self.stage == Stage::Idle {
                    self.enter_read();
                }
            }
            None => {
                self.stats.write_failures += 1;
                warn!("queue insert failed, fix lost");
            }
        }
    }

    fn on_selected(&mut self, outcome: ReadOutcome, out: &mut Vec<Command>) {
        self.pipeline_in_flight = false;
        match outcome {
            ReadOutcome::Found(position) => {
                let id = position.id;
                debug!(
                    id,
                    time = %position.time,
                    lat = position.latitude,
                    lon = position.longitude,
                    "read"
                );
                if !position.has_finite_coordinates() {
                    warn!(id, "purging position with non-finite coordinates");
                    self.stage = Stage::Deleting {
                        id,
                        removal: Removal::Unencodable,
                    };
                } else if position.device_id == self.device_id {
                    debug!(
                        id,
                        time = %position.time,
                        lat = position.latitude,
                        lon = position.longitude,
                        "send"
                    );
                    self.stage = Stage::Sending { id };
                    out.push(Command::Send {
                        ticket: self.ticket(),
                        position,
                    });
                } else {
                    debug!(id, device = %position.device_id, "purging stale position");
                    self.stage = Stage::Deleting {
                        id,
                        removal: Removal::Stale,
                    };
                }
            }
            ReadOutcome::Empty => {
                trace!("queue drained");
                self.drain_pending = true;
                self.stage = Stage::Idle;
            }
            ReadOutcome::Failed => {
                warn!("queue read failed");
                self.enter_retry(out);
            }
        }
    }

    fn on_deleted(&mut self, success: bool, out: &mut Vec<Command>) {
        self.pipeline_in_flight = false;
        let Stage::Deleting { id, removal } = self.stage else {
            return;
        };

        if success {
            match removal {
                Removal::Delivered => {}
                Removal::Stale => self.stats.purged_stale += 1,
                Removal::Unencodable => self.stats.purged_unencodable += 1,
            }
            trace!(id, "delete complete");
            self.enter_read();
        } else {
            warn!(id, "queue delete failed");
            self.enter_retry(out);
        }
    }

    fn on_sent(&mut self, success: bool, out: &mut Vec<Command>) {
        if !self.buffering {
            let time = self.unbuffered_in_flight.take();
            if success {
                self.stats.sent += 1;
            } else {
                self.stats.send_failures += 1;
                self.stats.dropped += 1;
                out.push(Command::Publish(Status::SendFailed));
                if let Some(time) = time {
                    out.push(Command::Publish(Status::Dropped { time }));
                }
            }
            return;
        }

        let Stage::Sending { id } = self.stage else {
            return;
        };
        if success {
            self.stats.sent += 1;
            self.stage = Stage::Deleting {
                id,
                removal: Removal::Delivered,
            };
        } else {
            self.stats.send_failures += 1;
            out.push(Command::Publish(Status::SendFailed));
            self.enter_retry(out);
        }
    }

    fn on_retry_elapsed(&mut self) {
        if self.stage != Stage::RetryWait {
            return;
        }
        if self.online {
            self.enter_read();
        } else {
            debug!("retry skipped while offline");
            self.stage = Stage::Idle;
        }
    }

    fn enter_read(&mut self) {
        self.drain_pending = false;
        self.stage = Stage::Reading;
    }

    fn enter_retry(&mut self, out: &mut Vec<Command>) {
        self.stage = Stage::RetryWait;
        self.stats.retries_armed += 1;
        debug!(delay_ms = self.retry_delay.as_millis() as u64, "retry");
        out.push(Command::ArmRetry(self.retry_delay));
    }

    /// Issues whatever the queue and the unbuffered path are free to run.
    fn pump(&mut self, out: &mut Vec<Command>) {
        if !self.write_in_flight && !self.pipeline_in_flight {
            if let Some(position) = self.pending_writes.pop_front() {
                debug!(
                    time = %position.time,
                    lat = position.latitude,
                    lon = position.longitude,
                    "write"
                );
                self.write_in_flight = true;
                out.push(Command::Insert {
                    ticket: self.ticket(),
                    position,
                });
            } else {
                match self.stage {
                    Stage::Reading => {
                        self.pipeline_in_flight = true;
                        out.push(Command::SelectOldest {
                            ticket: self.ticket(),
                        });
                    }
                    Stage::Deleting { id, .. } => {
                        debug!(id, "delete");
                        self.pipeline_in_flight = true;
                        out.push(Command::Delete {
                            ticket: self.ticket(),
                            id,
                        });
                    }
                    _ => {}
                }
            }
        }

        if self.unbuffered_in_flight.is_none() {
            if let Some(position) = self.unbuffered.pop_front() {
                debug!(
                    time = %position.time,
                    lat = position.latitude,
                    lon = position.longitude,
                    "send"
                );
                self.unbuffered_in_flight = Some(position.time);
                out.push(Command::Send {
                    ticket: self.ticket(),
                    position,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const DEVICE: &str = "pulse-01";

    fn config() -> TrackerConfig {
        TrackerConfig::new("http://collector:5055", DEVICE)
    }

    fn machine() -> DeliveryMachine {
        DeliveryMachine::new(&config())
    }

    fn queued(id: u64, device: &str) -> Position {
        let time = Utc.with_ymd_and_hms(2024, 5, 17, 9, 0, 0).unwrap();
        let mut position = Position::new(device, time, 40.4168, -3.7038);
        position.id = id;
        position
    }

    fn fix() -> Position {
        queued(0, DEVICE)
    }

    fn found(m: &DeliveryMachine, id: u64, device: &str) -> Input {
        Input::Selected {
            ticket: m.ticket(),
            outcome: ReadOutcome::Found(queued(id, device)),
        }
    }

    fn empty(m: &DeliveryMachine) -> Input {
        Input::Selected {
            ticket: m.ticket(),
            outcome: ReadOutcome::Empty,
        }
    }

    fn sent(m: &DeliveryMachine, success: bool) -> Input {
        Input::Sent {
            ticket: m.ticket(),
            success,
        }
    }

    fn deleted(m: &DeliveryMachine, success: bool) -> Input {
        Input::Deleted {
            ticket: m.ticket(),
            success,
        }
    }

    fn inserted(m: &DeliveryMachine, id: Option<u64>) -> Input {
        Input::Inserted {
            ticket: m.ticket(),
            id,
        }
    }

    fn select(m: &DeliveryMachine) -> Command {
        Command::SelectOldest { ticket: m.ticket() }
    }

    fn delete(m: &DeliveryMachine, id: u64) -> Command {
        Command::Delete {
            ticket: m.ticket(),
            id,
        }
    }

    fn send_of(m: &DeliveryMachine, id: u64) -> Command {
        Command::Send {
            ticket: m.ticket(),
            position: queued(id, DEVICE),
        }
    }

    fn retry() -> Command {
        Command::ArmRetry(Duration::from_millis(30_000))
    }

    #[test]
    fn start_online_reads_queue() {
        let mut m = machine();
        assert_eq!(m.start(true), vec![select(&m)]);
        assert_eq!(m.stage(), Stage::Reading);
    }

    #[test]
    fn start_offline_waits() {
        let mut m = machine();
        assert!(m.start(false).is_empty());
        assert_eq!(m.stage(), Stage::Idle);
        assert!(!m.drain_pending());
    }

    #[test]
    fn happy_path_read_send_delete_read() {
        let mut m = machine();
        m.start(true);

        assert_eq!(m.handle(found(&m, 1, DEVICE)), vec![send_of(&m, 1)]);
        assert_eq!(m.stage(), Stage::Sending { id: 1 });
        assert_eq!(m.handle(sent(&m, true)), vec![delete(&m, 1)]);
        assert_eq!(m.handle(deleted(&m, true)), vec![select(&m)]);
        assert!(m.handle(empty(&m)).is_empty());

        assert_eq!(m.stage(), Stage::Idle);
        assert!(m.drain_pending());
        assert_eq!(m.stats().sent, 1);
    }

    #[test]
    fn stale_position_is_purged_without_send() {
        let mut m = machine();
        m.start(true);

        assert_eq!(m.handle(found(&m, 7, "old-device")), vec![delete(&m, 7)]);
        assert_eq!(
            m.stage(),
            Stage::Deleting {
                id: 7,
                removal: Removal::Stale
            }
        );
        assert_eq!(m.handle(deleted(&m, true)), vec![select(&m)]);
        assert_eq!(m.stats().purged_stale, 1);
        assert_eq!(m.stats().sent, 0);
    }

    #[test]
    fn send_failure_arms_retry_and_notifies() {
        let mut m = machine();
        m.start(true);
        m.handle(found(&m, 1, DEVICE));

        assert_eq!(
            m.handle(sent(&m, false)),
            vec![Command::Publish(Status::SendFailed), retry()]
        );
        assert_eq!(m.stage(), Stage::RetryWait);
        assert_eq!(m.handle(Input::RetryElapsed), vec![select(&m)]);
    }

    #[test]
    fn read_and_delete_faults_retry_silently() {
        let mut m = machine();
        m.start(true);
        let failed = Input::Selected {
            ticket: m.ticket(),
            outcome: ReadOutcome::Failed,
        };
        assert_eq!(m.handle(failed), vec![retry()]);

        m.handle(Input::RetryElapsed);
        m.handle(found(&m, 1, DEVICE));
        m.handle(sent(&m, true));
        assert_eq!(m.handle(deleted(&m, false)), vec![retry()]);
        assert_eq!(m.stats().retries_armed, 2);
    }

    #[test]
    fn retry_is_gated_when_it_fires() {
        let mut m = machine();
        m.start(true);
        m.handle(found(&m, 1, DEVICE));
        m.handle(sent(&m, false));

        assert_eq!(
            m.handle(Input::Connectivity(false)),
            vec![Command::Publish(Status::NetworkOffline)]
        );
        assert!(m.handle(Input::RetryElapsed).is_empty());
        assert_eq!(m.stage(), Stage::Idle);

        assert_eq!(
            m.handle(Input::Connectivity(true)),
            vec![Command::Publish(Status::NetworkOnline), select(&m)]
        );
    }

    #[test]
    fn reconnect_during_retry_reads_immediately() {
        let mut m = machine();
        m.start(true);
        m.handle(found(&m, 1, DEVICE));
        m.handle(sent(&m, false));
        m.handle(Input::Connectivity(false));

        assert_eq!(
            m.handle(Input::Connectivity(true)),
            vec![
                Command::Publish(Status::NetworkOnline),
                Command::CancelRetry,
                select(&m)
            ]
        );
    }

    #[test]
    fn reconnect_while_busy_does_not_read() {
        let mut m = machine();
        m.start(true);
        m.handle(found(&m, 1, DEVICE));
        m.handle(Input::Connectivity(false));

        assert_eq!(
            m.handle(Input::Connectivity(true)),
            vec![Command::Publish(Status::NetworkOnline)]
        );
        assert_eq!(m.stage(), Stage::Sending { id: 1 });
    }

    #[test]
    fn redundant_connectivity_has_no_effect() {
        let mut m = machine();
        m.start(false);
        assert!(m.handle(Input::Connectivity(false)).is_empty());

        m.handle(Input::Connectivity(true));
        assert!(m.handle(Input::Connectivity(true)).is_empty());
    }

    #[test]
    fn write_triggers_drain_when_pending() {
        let mut m = machine();
        m.start(true);
        m.handle(empty(&m));

        let commands = m.handle(Input::Fix(fix()));
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], Command::Publish(Status::LocationUpdate));
        assert!(matches!(commands[1], Command::Insert { .. }));

        assert_eq!(m.handle(inserted(&m, Some(1))), vec![select(&m)]);
        assert!(!m.drain_pending());
    }

    #[test]
    fn write_without_drain_pending_does_not_read() {
        let mut m = machine();
        m.start(false);
        m.handle(Input::Fix(fix()));

        assert!(m.handle(inserted(&m, Some(1))).is_empty());
        assert_eq!(m.stage(), Stage::Idle);
    }

    #[test]
    fn fixes_wait_for_the_queue_and_go_first() {
        let mut m = machine();
        m.start(true);

        // Read outstanding: the fix is parked.
        assert_eq!(
            m.handle(Input::Fix(fix())),
            vec![Command::Publish(Status::LocationUpdate)]
        );
        assert_eq!(m.pending_writes(), 1);

        // Read done: send starts and the parked write goes to the queue.
        let commands = m.handle(found(&m, 1, DEVICE));
        assert_eq!(commands[0], send_of(&m, 1));
        assert!(matches!(commands[1], Command::Insert { .. }));

        // Send done while the insert is outstanding: the delete waits.
        assert!(m.handle(sent(&m, true)).is_empty());
        assert_eq!(
            m.stage(),
            Stage::Deleting {
                id: 1,
                removal: Removal::Delivered
            }
        );
        assert_eq!(m.handle(inserted(&m, Some(2))), vec![delete(&m, 1)]);
    }

    #[test]
    fn insert_failure_is_not_retried() {
        let mut m = machine();
        m.start(false);
        m.handle(Input::Fix(fix()));

        assert!(m.handle(inserted(&m, None)).is_empty());
        assert_eq!(m.stats().write_failures, 1);
        assert_eq!(m.stage(), Stage::Idle);
    }

    #[test]
    fn fix_errors_are_ignored() {
        let mut m = machine();
        m.start(true);
        assert!(m.handle(Input::FixError("no fix".into())).is_empty());
        assert_eq!(m.stats().fix_errors, 1);
        assert_eq!(m.stage(), Stage::Reading);
    }

    #[test]
    fn non_finite_fixes_are_never_queued() {
        let mut m = machine();
        m.start(false);
        let mut broken = fix();
        broken.latitude = f64::NAN;

        assert!(m.handle(Input::Fix(broken.clone())).is_empty());
        assert_eq!(m.pending_writes(), 0);
        assert_eq!(m.stats().fix_errors, 1);
        assert_eq!(m.stats().fixes_received, 0);

        let mut unbuffered = DeliveryMachine::new(&config().with_buffering(false));
        unbuffered.start(true);
        broken.longitude = f64::INFINITY;
        assert!(unbuffered.handle(Input::Fix(broken)).is_empty());
        assert_eq!(unbuffered.stats().fix_errors, 1);
    }

    #[test]
    fn unencodable_queued_position_is_purged() {
        let mut m = machine();
        m.start(true);
        let mut broken = queued(1, DEVICE);
        broken.longitude = f64::NAN;
        let read = Input::Selected {
            ticket: m.ticket(),
            outcome: ReadOutcome::Found(broken),
        };

        assert_eq!(m.handle(read), vec![delete(&m, 1)]);
        assert_eq!(
            m.stage(),
            Stage::Deleting {
                id: 1,
                removal: Removal::Unencodable
            }
        );
        assert_eq!(m.handle(deleted(&m, true)), vec![select(&m)]);
        assert_eq!(m.handle(found(&m, 2, DEVICE)), vec![send_of(&m, 2)]);
        assert_eq!(m.stats().purged_unencodable, 1);
        assert_eq!(m.stats().send_failures, 0);
    }

    #[test]
    fn fixes_without_device_get_configured_id() {
        let mut m = machine();
        m.start(false);
        let mut anonymous = fix();
        anonymous.device_id.clear();

        let commands = m.handle(Input::Fix(anonymous));
        match &commands[1] {
            Command::Insert { position, .. } => assert_eq!(position.device_id, DEVICE),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unbuffered_sends_one_at_a_time_and_drops_failures() {
        let mut m = DeliveryMachine::new(&config().with_buffering(false));
        assert!(m.start(true).is_empty());

        let commands = m.handle(Input::Fix(fix()));
        assert!(matches!(commands[1], Command::Send { .. }));
        assert_eq!(
            m.handle(Input::Fix(fix())),
            vec![Command::Publish(Status::LocationUpdate)]
        );

        let commands = m.handle(sent(&m, false));
        assert_eq!(commands[0], Command::Publish(Status::SendFailed));
        assert!(matches!(commands[1], Command::Publish(Status::Dropped { .. })));
        assert!(matches!(commands[2], Command::Send { .. }));
        assert_eq!(commands.len(), 3);

        assert!(m.handle(sent(&m, true)).is_empty());
        assert_eq!(m.stats().dropped, 1);
        assert_eq!(m.stats().sent, 1);
        assert_eq!(m.stats().retries_armed, 0);
    }

    #[test]
    fn unbuffered_never_touches_queue() {
        let mut m = DeliveryMachine::new(&config().with_buffering(false));
        m.start(false);
        let commands = m.handle(Input::Connectivity(true));
        assert_eq!(commands, vec![Command::Publish(Status::NetworkOnline)]);
        assert_eq!(m.stage(), Stage::Idle);
    }

    #[test]
    fn stop_discards_late_completions() {
        let mut m = machine();
        m.start(true);
        let old = m.ticket();
        m.handle(Input::Fix(fix()));

        assert_eq!(m.stop(), vec![Command::CancelRetry]);
        assert_eq!(m.pending_writes(), 0);
        assert!(m.handle(Input::Connectivity(false)).is_empty());

        assert_eq!(m.start(true), vec![select(&m)]);
        assert_ne!(m.ticket(), old);

        let late = Input::Selected {
            ticket: old,
            outcome: ReadOutcome::Found(queued(1, DEVICE)),
        };
        assert!(m.handle(late).is_empty());
        assert_eq!(m.stage(), Stage::Reading);
    }

    #[test]
    fn events_before_start_are_ignored() {
        let mut m = machine();
        assert!(m.handle(Input::Fix(fix())).is_empty());
        assert_eq!(m.stats().fixes_received, 0);
    }
}
