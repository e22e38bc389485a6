use crate::audio::progress::PositionTracker;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

const LOG_TARGET: &str = "pcm_player::audio::state_manager";

/// How often a gate waiter re-checks the caller's cancellation token.
pub const GATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport state of a playback session.
///
/// `JustPaused` marks a pause whose device buffer drop is still pending; the
/// writer loop turns it into `Paused` right after its in-flight write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
    #[default]
    Playing,
    JustPaused,
    Paused,
}

/// Cooperative cancellation flag shared between a caller and the writer loop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// State guarded by the transport lock.
#[derive(Debug, Default)]
pub(crate) struct Transport {
    pub phase: PlaybackPhase,
    pub gate_open: bool,
    pub tracker: PositionTracker,
}

/// Why a gate wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateOutcome {
    Open,
    Cancelled,
    Disposed,
}

/// Transport lock, progress gate, disposal flag and source generation of a
/// session.
#[derive(Debug, Default)]
pub(crate) struct PlaybackStateManager {
    transport: Mutex<Transport>,
    gate: Condvar,
    disposed: AtomicBool,
    generation: AtomicU64,
}

impl PlaybackStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> MutexGuard<'_, Transport> {
        lock(&self.transport)
    }

    /// Puts the transport into a fresh playing state with the clock at zero.
    pub fn begin(&self, transport: &mut Transport) {
        transport.phase = PlaybackPhase::Playing;
        transport.tracker.reset_to(0);
        transport.tracker.start();
        self.open_gate(transport);
    }

    /// Stops the clock after the writer loop has exited. A pause the loop
    /// never got to settle is settled here.
    pub fn finish(&self, transport: &mut Transport) {
        transport.tracker.stop();
        if transport.phase == PlaybackPhase::JustPaused {
            transport.phase = PlaybackPhase::Paused;
        }
    }

    pub fn open_gate(&self, transport: &mut Transport) {
        transport.gate_open = true;
        self.gate.notify_all();
    }

    pub fn close_gate(&self, transport: &mut Transport) {
        transport.gate_open = false;
    }

    /// Blocks until the gate opens, the session is disposed, or `cancel` fires.
    pub fn wait_gate(&self, cancel: &CancellationToken) -> GateOutcome {
        let mut transport = self.transport();
        loop {
            if self.is_disposed() {
                return GateOutcome::Disposed;
            }
            if cancel.is_cancelled() {
                return GateOutcome::Cancelled;
            }
            if transport.gate_open {
                return GateOutcome::Open;
            }
            trace!(target: LOG_TARGET, "Gate closed, waiting.");
            transport = self
                .gate
                .wait_timeout(transport, GATE_POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Marks the session disposed and wakes gate waiters. Returns `false` if
    /// it already was.
    pub fn mark_disposed(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        // Taking the lock orders the flag before any waiter's next check.
        let _transport = self.transport();
        self.gate.notify_all();
        debug!(target: LOG_TARGET, "Session marked disposed.");
        true
    }

    /// Generation of the source position; bumped on every reposition.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}
