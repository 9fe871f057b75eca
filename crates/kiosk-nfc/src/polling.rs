//! Background card polling
//!
//! A single thread owns the reader while polling runs. Each tap of a new
//! card produces exactly one [`CardSession`]; a card left on the reader is
//! not read again until it has been seen absent.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kiosk_common::Uid;
use tracing::{debug, error, info, trace, warn};

use crate::reader::CardReader;
use crate::retry::RetryPolicy;
use crate::session::{CardSession, SessionFault};
use crate::stats::{ReaderStats, StatsSnapshot};
use crate::transceiver::Transceiver;

/// Receiver of sessions produced by the polling thread
///
/// Runs on the polling thread; anything slow here delays the next poll.
pub trait SessionSink: Send {
    fn deliver(&mut self, session: CardSession);
}

/// Bounded channel: a full queue drops the session instead of blocking the reader
impl SessionSink for SyncSender<CardSession> {
    fn deliver(&mut self, session: CardSession) {
        match self.try_send(session) {
            Ok(()) => {}
            Err(TrySendError::Full(session)) => {
                warn!(uid = %session.uid, "Session queue full, dropping session")
            }
            Err(TrySendError::Disconnected(session)) => {
                debug!(uid = %session.uid, "Session receiver gone")
            }
        }
    }
}

impl SessionSink for Sender<CardSession> {
    fn deliver(&mut self, session: CardSession) {
        if let Err(mpsc::SendError(session)) = self.send(session) {
            debug!(uid = %session.uid, "Session receiver gone");
        }
    }
}

impl SessionSink for Box<dyn FnMut(CardSession) + Send> {
    fn deliver(&mut self, session: CardSession) {
        (**self)(session)
    }
}

/// Polling timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    /// Pause between detections
    pub interval: Duration,
    /// How long one detection may block
    pub detect_timeout: Duration,
    /// Empty polls in a row before a card counts as removed
    pub removal_after_polls: u32,
    /// Backoff after transport errors, capped at `max_backoff`;
    /// `max_attempts` errors in a row trigger a reader reinitialization
    pub recovery: RetryPolicy,
    /// Capacity of the channel made by [`PollingLoop::with_channel`]
    pub channel_capacity: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            detect_timeout: Duration::from_millis(100),
            removal_after_polls: 1,
            recovery: RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(200)),
            channel_capacity: 8,
        }
    }
}

/// What one detection meant for the card on the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// A card not seen before (or a different one)
    Arrived,
    /// The same card is still there
    Present,
    /// The card left
    Removed,
    /// Still nothing on the reader
    Absent,
}

/// Tap debouncing: one arrival per card placement
#[derive(Debug, Clone)]
pub struct Debouncer {
    last_uid: Option<Uid>,
    empty_polls: u32,
    removal_after: u32,
}

impl Debouncer {
    pub fn new(removal_after_polls: u32) -> Self {
        Self {
            last_uid: None,
            empty_polls: 0,
            removal_after: removal_after_polls.max(1),
        }
    }

    pub fn observe(&mut self, detected: Option<&Uid>) -> Presence {
        match detected {
            Some(uid) => {
                self.empty_polls = 0;
                if self.last_uid.as_ref() == Some(uid) {
                    Presence::Present
                } else {
                    self.last_uid = Some(uid.clone());
                    Presence::Arrived
                }
            }
            None if self.last_uid.is_none() => Presence::Absent,
            None => {
                self.empty_polls += 1;
                if self.empty_polls >= self.removal_after {
                    self.reset();
                    Presence::Removed
                } else {
                    Presence::Present
                }
            }
        }
    }

    pub fn last_uid(&self) -> Option<&Uid> {
        self.last_uid.as_ref()
    }

    pub fn reset(&mut self) {
        self.last_uid = None;
        self.empty_polls = 0;
    }
}

/// Result of a single polling step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    Delivered,
    Removed,
    TransportError,
}

/// One poll of the reader at a time; the thread in [`PollingLoop`] calls
/// this in a loop
#[derive(Debug)]
pub struct Poller {
    config: PollingConfig,
    debouncer: Debouncer,
    consecutive_errors: u32,
}

impl Poller {
    pub fn new(config: PollingConfig) -> Self {
        Self {
            debouncer: Debouncer::new(config.removal_after_polls),
            config,
            consecutive_errors: 0,
        }
    }

    pub fn poll_once<T, S>(&mut self, reader: &mut CardReader<T>, sink: &mut S) -> PollOutcome
    where
        T: Transceiver,
        S: SessionSink + ?Sized,
    {
        let detected = match reader.detect(self.config.detect_timeout) {
            Ok(detected) => detected,
            Err(err) => {
                warn!(error = %err, consecutive = self.consecutive_errors.saturating_add(1), "Reader error while polling");
                self.record_error(reader);
                return PollOutcome::TransportError;
            }
        };

        match self.debouncer.observe(detected.as_ref()) {
            Presence::Arrived => match detected {
                Some(uid) => self.read_arrival(reader, sink, &uid),
                None => PollOutcome::Idle,
            },
            Presence::Present => {
                trace!("Card still present");
                self.consecutive_errors = 0;
                PollOutcome::Idle
            }
            Presence::Removed => {
                info!("Card removed");
                self.consecutive_errors = 0;
                reader.forget_card();
                PollOutcome::Removed
            }
            Presence::Absent => {
                self.consecutive_errors = 0;
                PollOutcome::Idle
            }
        }
    }

    /// Read a freshly placed card and hand the session over
    ///
    /// A transport error mid-read counts like a failed detection and the
    /// card is read again on the next tick. Once the errors in a row reach
    /// `max_attempts` the failed session is delivered, so a tap still ends
    /// in exactly one session.
    fn read_arrival<T, S>(&mut self, reader: &mut CardReader<T>, sink: &mut S, uid: &Uid) -> PollOutcome
    where
        T: Transceiver,
        S: SessionSink + ?Sized,
    {
        info!(uid = %uid, "Card detected");
        reader.forget_card();
        let session = reader.read_session(uid);

        if !matches!(session.fault, Some(SessionFault::Transport(_))) {
            self.consecutive_errors = 0;
            sink.deliver(session);
            return PollOutcome::Delivered;
        }

        warn!(uid = %uid, consecutive = self.consecutive_errors.saturating_add(1), "Reader error while reading card");
        if self.record_error(reader) {
            sink.deliver(session);
            PollOutcome::Delivered
        } else {
            self.debouncer.reset();
            PollOutcome::TransportError
        }
    }

    /// Pause before the next poll
    pub fn next_delay(&self) -> Duration {
        if self.consecutive_errors == 0 {
            self.config.interval
        } else {
            self.config.recovery.delay_for(self.consecutive_errors)
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Start over as if the reader had been empty
    pub fn reset(&mut self) {
        self.debouncer.reset();
        self.consecutive_errors = 0;
    }

    /// Count one transport error; `true` when it reached `max_attempts`
    /// and the reader was reinitialized (successfully or not)
    fn record_error<T: Transceiver>(&mut self, reader: &mut CardReader<T>) -> bool {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if self.consecutive_errors < self.config.recovery.max_attempts.max(1) {
            return false;
        }

        warn!("Too many reader errors in a row, reinitializing");
        if reader.reinitialize().is_ok() {
            self.consecutive_errors = 0;
        }
        true
    }
}

/// Commands sent to the polling thread
#[derive(Debug)]
enum PollCommand {
    Stop,
}

struct Worker<T> {
    reader: CardReader<T>,
    sink: Box<dyn SessionSink>,
    poller: Poller,
}

impl<T: Transceiver> Worker<T> {
    fn run(mut self, commands: Receiver<PollCommand>) -> Self {
        info!("Card polling started");

        loop {
            self.poller.poll_once(&mut self.reader, self.sink.as_mut());

            // Sleep until the next poll unless told to stop
            match commands.recv_timeout(self.poller.next_delay()) {
                Ok(PollCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        info!("Card polling stopped");
        self
    }
}

enum LoopState<T> {
    Idle(Worker<T>),
    Running {
        commands: Sender<PollCommand>,
        handle: JoinHandle<Worker<T>>,
    },
    /// The polling thread panicked and took the reader with it
    Lost,
}

/// Owns the reader and runs [`Poller`] on a background thread
///
/// The reader is only reachable while polling is stopped, so the polling
/// thread and direct reader use never overlap.
pub struct PollingLoop<T: Transceiver + Send + 'static> {
    state: LoopState<T>,
    stats: Arc<ReaderStats>,
}

impl<T: Transceiver + Send + 'static> PollingLoop<T> {
    pub fn new<S>(reader: CardReader<T>, sink: S, config: PollingConfig) -> Self
    where
        S: SessionSink + 'static,
    {
        let stats = reader.stats();
        Self {
            state: LoopState::Idle(Worker {
                reader,
                sink: Box::new(sink),
                poller: Poller::new(config),
            }),
            stats,
        }
    }

    /// Deliver sessions to a callback on the polling thread
    pub fn with_callback<F>(reader: CardReader<T>, config: PollingConfig, callback: F) -> Self
    where
        F: FnMut(CardSession) + Send + 'static,
    {
        let sink: Box<dyn FnMut(CardSession) + Send> = Box::new(callback);
        Self::new(reader, sink, config)
    }

    /// Deliver sessions over a bounded channel
    pub fn with_channel(reader: CardReader<T>, config: PollingConfig) -> (Self, Receiver<CardSession>) {
        let (session_tx, session_rx) = mpsc::sync_channel(config.channel_capacity.max(1));
        (Self::new(reader, session_tx, config), session_rx)
    }

    /// Start the polling thread; `false` if it was already running
    pub fn start(&mut self) -> bool {
        match std::mem::replace(&mut self.state, LoopState::Lost) {
            LoopState::Idle(mut worker) => {
                worker.poller.reset();
                let (command_tx, command_rx) = mpsc::channel();
                let handle = thread::spawn(move || worker.run(command_rx));
                self.state = LoopState::Running {
                    commands: command_tx,
                    handle,
                };
                true
            }
            running @ LoopState::Running { .. } => {
                debug!("Card polling already running");
                self.state = running;
                false
            }
            LoopState::Lost => {
                error!("Card reader was lost, polling cannot start");
                false
            }
        }
    }

    /// Stop the polling thread and wait for it; `false` if it was not running
    ///
    /// Blocks for at most one detection timeout plus one session read.
    pub fn stop(&mut self) -> bool {
        match std::mem::replace(&mut self.state, LoopState::Lost) {
            LoopState::Running { commands, handle } => {
                let _ = commands.send(PollCommand::Stop);
                match handle.join() {
                    Ok(worker) => self.state = LoopState::Idle(worker),
                    Err(_) => error!("Card polling thread panicked"),
                }
                true
            }
            other => {
                self.state = other;
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, LoopState::Running { .. })
    }

    /// The reader, while polling is stopped
    pub fn reader_mut(&mut self) -> Option<&mut CardReader<T>> {
        match &mut self.state {
            LoopState::Idle(worker) => Some(&mut worker.reader),
            _ => None,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop polling and hand the reader back
    pub fn into_reader(mut self) -> Option<CardReader<T>> {
        self.stop();
        match std::mem::replace(&mut self.state, LoopState::Lost) {
            LoopState::Idle(worker) => Some(worker.reader),
            _ => None,
        }
    }
}

impl<T: Transceiver + Send + 'static> Drop for PollingLoop<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
