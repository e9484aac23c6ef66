//! Tunnel Manager
//!
//! Owns the tunnel lifecycle and the pump worker behind it.
//!
//! ```text
//! Disconnected --start--> Connecting --acquired--> Connected
//!      ^                      |                        |
//!      |                 (consent?)              stop / read failure
//!      |                                               v
//!      +-------------------------------------- Disconnecting
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = TunnelManager::new(provider, filter, TunnelConfig::default());
//!
//! match manager.start()? {
//!     StartOutcome::AwaitingConsent(token) => {
//!         let granted = ask_the_user();
//!         manager.resolve_consent(token, granted)?;
//!     }
//!     _ => {}
//! }
//!
//! manager.stop()?;
//! ```
//!
//! Control calls are serialized; the pump runs on its own thread and only
//! touches lifecycle state when it dies on its own.

use crate::config::{PumpConfig, TunnelConfig};
use crate::consent::{AutoConsent, ConsentGate, ConsentStatus, ConsentToken};
use crate::device::{TunnelError, TunnelProvider};
use crate::pump::{PacketPump, PumpExit, PumpStats, PumpStatsSnapshot, panic_message};
use adtun_filter::PacketFilter;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Tunnel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// No tunnel, no pump
    Disconnected,
    /// Waiting for consent or for the device
    Connecting,
    /// Pump is running
    Connected,
    /// Tearing down
    Disconnecting,
}

impl TunnelState {
    /// Check if tunnel is usable
    pub fn is_connected(&self) -> bool {
        matches!(self, TunnelState::Connected)
    }
}

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Start while connected is a no-op
    AlreadyConnected,
    /// Resume with [`TunnelManager::resolve_consent`]
    AwaitingConsent(ConsentToken),
    /// The user said no
    Declined,
}

/// Why the tunnel went down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Stopped,
    ReadFailure(String),
    EstablishFailed(String),
    ConsentDeclined,
}

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelEvent {
    ConsentRequired(ConsentToken),
    Connected,
    Disconnected { reason: DisconnectReason },
}

/// Tunnel Manager errors
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("A start is already waiting for consent")]
    StartPending,

    #[error("Tunnel is {0:?}")]
    TransitionInProgress(TunnelState),

    #[error("No start is waiting for this consent")]
    NoPendingStart,

    #[error("Tunnel establishment failed: {0}")]
    EstablishFailed(#[from] TunnelError),

    #[error("Failed to spawn pump worker: {0}")]
    Spawn(String),

    #[error("Pump worker panicked: {0}")]
    WorkerPanicked(String),
}

/// One established tunnel
struct Session {
    id: u64,
    cancel: Arc<AtomicBool>,
    worker: thread::JoinHandle<()>,
    stats: Arc<PumpStats>,
    started: Instant,
}

struct Lifecycle {
    state: TunnelState,
    pending: Option<ConsentToken>,
    session: Option<Session>,
}

/// State shared with the pump worker
struct Shared {
    lifecycle: Mutex<Lifecycle>,
    events: Sender<TunnelEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: TunnelState) {
        self.lock().state = state;
    }

    fn emit(&self, event: TunnelEvent) {
        // The manager holds a receiver, so this cannot fail while it lives
        let _ = self.events.send(event);
    }

    /// Final step of every teardown
    fn finish(&self, stats: PumpStatsSnapshot, uptime: Duration, reason: DisconnectReason) {
        self.set_state(TunnelState::Disconnected);
        info!(
            "Tunnel disconnected after {:.1}s ({:?}): {}",
            uptime.as_secs_f64(),
            reason,
            stats.format()
        );
        self.emit(TunnelEvent::Disconnected { reason });
    }

    /// Called on the worker thread once its pump returns
    fn on_pump_exit(&self, session_id: u64, exit: PumpExit) {
        let session = {
            let mut lifecycle = self.lock();
            match &lifecycle.session {
                Some(session) if session.id == session_id => {}
                // Already taken by stop(), which finishes the teardown
                _ => return,
            }
            lifecycle.state = TunnelState::Disconnecting;
            lifecycle.session.take()
        };
        let Some(session) = session else {
            return;
        };

        let reason = match exit {
            PumpExit::ReadFailure(e) => DisconnectReason::ReadFailure(e.to_string()),
            PumpExit::Cancelled => DisconnectReason::Stopped,
        };
        warn!("Pump exited on its own, tearing down");

        // The join handle is this thread; dropping it detaches
        self.finish(
            session.stats.snapshot(),
            session.started.elapsed(),
            reason,
        );
    }
}

/// Tunnel Manager
///
/// Provides the Start/Stop control surface:
/// - Serializes lifecycle transitions
/// - Holds at most one pending start awaiting consent
/// - Runs at most one pump worker, torn down exactly once
pub struct TunnelManager {
    provider: Box<dyn TunnelProvider>,
    consent: Box<dyn ConsentGate>,
    filter: Arc<PacketFilter>,
    config: TunnelConfig,
    pump_config: PumpConfig,
    /// Held for the whole of start/resolve_consent/stop
    transition: Mutex<()>,
    shared: Arc<Shared>,
    events: Receiver<TunnelEvent>,
    next_id: AtomicU64,
}

impl TunnelManager {
    /// Create a new tunnel manager
    pub fn new(
        provider: Box<dyn TunnelProvider>,
        filter: Arc<PacketFilter>,
        config: TunnelConfig,
    ) -> Self {
        let (tx, rx) = unbounded();
        Self {
            provider,
            consent: Box::new(AutoConsent),
            filter,
            config,
            pump_config: PumpConfig::default(),
            transition: Mutex::new(()),
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle {
                    state: TunnelState::Disconnected,
                    pending: None,
                    session: None,
                }),
                events: tx,
            }),
            events: rx,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_consent(mut self, consent: Box<dyn ConsentGate>) -> Self {
        self.consent = consent;
        self
    }

    pub fn with_pump_config(mut self, pump_config: PumpConfig) -> Self {
        self.pump_config = pump_config;
        self
    }

    /// Get current state
    pub fn state(&self) -> TunnelState {
        self.shared.lock().state
    }

    /// Check if tunnel is connected
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Statistics of the running pump
    pub fn stats(&self) -> Option<PumpStatsSnapshot> {
        self.shared
            .lock()
            .session
            .as_ref()
            .map(|s| s.stats.snapshot())
    }

    /// Lifecycle event stream
    pub fn events(&self) -> Receiver<TunnelEvent> {
        self.events.clone()
    }

    pub fn filter(&self) -> &Arc<PacketFilter> {
        &self.filter
    }

    fn begin_transition(&self) -> MutexGuard<'_, ()> {
        self.transition
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the tunnel
    ///
    /// A start while one is already waiting for consent is rejected rather
    /// than queued.
    pub fn start(&self) -> Result<StartOutcome, ManagerError> {
        let _transition = self.begin_transition();

        {
            let lifecycle = self.shared.lock();
            if lifecycle.pending.is_some() {
                return Err(ManagerError::StartPending);
            }
            match lifecycle.state {
                TunnelState::Connected => return Ok(StartOutcome::AlreadyConnected),
                TunnelState::Disconnected => {}
                state => return Err(ManagerError::TransitionInProgress(state)),
            }
        }

        match self.consent.check() {
            ConsentStatus::Granted => self.establish(),
            ConsentStatus::Required => {
                let token = ConsentToken(self.next_id.fetch_add(1, Ordering::Relaxed));
                {
                    let mut lifecycle = self.shared.lock();
                    lifecycle.state = TunnelState::Connecting;
                    lifecycle.pending = Some(token);
                }
                info!("Tunnel start awaiting consent ({})", token);
                self.shared.emit(TunnelEvent::ConsentRequired(token));
                Ok(StartOutcome::AwaitingConsent(token))
            }
        }
    }

    /// Resume or abort the pending start
    pub fn resolve_consent(
        &self,
        token: ConsentToken,
        granted: bool,
    ) -> Result<StartOutcome, ManagerError> {
        let _transition = self.begin_transition();

        {
            let mut lifecycle = self.shared.lock();
            if lifecycle.pending != Some(token) {
                return Err(ManagerError::NoPendingStart);
            }
            lifecycle.pending = None;
            if !granted {
                lifecycle.state = TunnelState::Disconnected;
            }
        }
        self.consent.record(granted);

        if !granted {
            info!("Tunnel consent declined ({})", token);
            self.shared.emit(TunnelEvent::Disconnected {
                reason: DisconnectReason::ConsentDeclined,
            });
            return Ok(StartOutcome::Declined);
        }

        info!("Tunnel consent granted ({})", token);
        self.establish()
    }

    /// Acquire the device and spawn the pump. Transition lock must be held.
    fn establish(&self) -> Result<StartOutcome, ManagerError> {
        self.shared.set_state(TunnelState::Connecting);
        info!("Connecting tunnel {}", self.config.name);

        let device = match self.provider.acquire(&self.config) {
            Ok(device) => device,
            Err(e) => {
                error!("Tunnel establishment failed: {}", e);
                self.shared.finish(
                    PumpStatsSnapshot::default(),
                    Duration::ZERO,
                    DisconnectReason::EstablishFailed(e.to_string()),
                );
                return Err(ManagerError::EstablishFailed(e));
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(PumpStats::default());
        let pump = PacketPump::new(
            device,
            Arc::clone(&self.filter),
            &self.pump_config,
            Arc::clone(&cancel),
            Arc::clone(&stats),
        );

        // Lifecycle stays locked until the session is recorded, so a pump
        // that dies immediately still finds it.
        let mut lifecycle = self.shared.lock();
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("adtun-pump-{}", id))
            .spawn(move || {
                let exit = pump.run();
                shared.on_pump_exit(id, exit);
            });

        match spawned {
            Ok(worker) => {
                lifecycle.session = Some(Session {
                    id,
                    cancel,
                    worker,
                    stats,
                    started: Instant::now(),
                });
                lifecycle.state = TunnelState::Connected;
                info!("Tunnel connected");
                // Still locked: the pump cannot report its exit before this
                self.shared.emit(TunnelEvent::Connected);
                drop(lifecycle);
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                // The unspawned closure has been dropped, and the pump's
                // Drop closed the device.
                drop(lifecycle);
                error!("Failed to spawn pump worker: {}", e);
                self.shared.finish(
                    PumpStatsSnapshot::default(),
                    Duration::ZERO,
                    DisconnectReason::EstablishFailed(e.to_string()),
                );
                Err(ManagerError::Spawn(e.to_string()))
            }
        }
    }

    /// Stop the tunnel
    ///
    /// Idempotent. Cancels a pending start, or stops the pump and waits for
    /// it to release the device.
    pub fn stop(&self) -> Result<(), ManagerError> {
        let _transition = self.begin_transition();

        let session = {
            let mut lifecycle = self.shared.lock();
            if lifecycle.pending.take().is_some() {
                lifecycle.state = TunnelState::Disconnected;
                drop(lifecycle);
                info!("Pending tunnel start cancelled");
                self.shared.emit(TunnelEvent::Disconnected {
                    reason: DisconnectReason::Stopped,
                });
                return Ok(());
            }
            match lifecycle.session.take() {
                Some(session) => {
                    lifecycle.state = TunnelState::Disconnecting;
                    session
                }
                None => return Ok(()),
            }
        };

        info!("Disconnecting tunnel");
        session.cancel.store(true, Ordering::SeqCst);
        let joined = session.worker.join();

        self.shared.finish(
            session.stats.snapshot(),
            session.started.elapsed(),
            DisconnectReason::Stopped,
        );

        joined.map_err(|payload| ManagerError::WorkerPanicked(panic_message(payload.as_ref())))
    }
}

impl Drop for TunnelManager {
    fn drop(&mut self) {
        // Never leave a pump running without its manager
        if let Err(e) = self.stop() {
            warn!("Tunnel teardown on drop failed: {}", e);
        }
    }
}
