//! Keyed exchange between the two API sides of a shared resource.
//!
//! A [`SyncGate`] is a two-state (held by nobody / held by one side) machine
//! carrying an integer key. A side acquires with the key the other side last
//! released with, and releases with a strictly larger key, handing the
//! resource to the other side. The CPU-side state lives in a single
//! `AtomicU64` updated by compare-and-swap; the matching driver-level keyed
//! mutex (e.g. `IDXGIKeyedMutex`) is driven through the [`KeyedMutex`] trait
//! so the GPU queues are fenced as well.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{error, trace, warn};

use crate::error::{DriverError, SyncError};

/// Largest key a gate can carry. The low four bits of the state word hold
/// the holder and turn fields.
pub const MAX_KEY: u64 = u64::MAX >> 4;

const SIDE_NONE: u64 = 0;
const SIDE_PRIMARY: u64 = 1;
const SIDE_SECONDARY: u64 = 2;

/// One of the two APIs sharing a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Primary,
    Secondary,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Primary => Side::Secondary,
            Side::Secondary => Side::Primary,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Primary => f.write_str("primary"),
            Side::Secondary => f.write_str("secondary"),
        }
    }
}

/// Failure of a driver-level keyed mutex acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyedMutexError {
    Timeout,
    Driver(DriverError),
}

/// Driver-level keyed mutex backing a [`SyncGate`].
///
/// `acquire` may block the calling thread (and the side's submission queue)
/// up to `timeout`. The gate only calls into the mutex after its own state
/// transition succeeded, so implementations never see a mismatched key from
/// a well-behaved gate.
pub trait KeyedMutex {
    fn acquire(&self, side: Side, key: u64, timeout: Duration) -> Result<(), KeyedMutexError>;
    fn release(&self, side: Side, key: u64) -> Result<(), DriverError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GateState {
    key: u64,
    holder: Option<Side>,
    /// Side the last release handed the key to. `None` on a fresh gate.
    turn: Option<Side>,
}

enum Step {
    Take,
    Wait,
    Fail(SyncError),
}

fn encode_side(side: Option<Side>) -> u64 {
    match side {
        None => SIDE_NONE,
        Some(Side::Primary) => SIDE_PRIMARY,
        Some(Side::Secondary) => SIDE_SECONDARY,
    }
}

fn decode_side(bits: u64) -> Option<Side> {
    match bits & 0b11 {
        SIDE_PRIMARY => Some(Side::Primary),
        SIDE_SECONDARY => Some(Side::Secondary),
        _ => None,
    }
}

impl GateState {
    const FRESH: GateState = GateState {
        key: 0,
        holder: None,
        turn: None,
    };

    fn pack(self) -> u64 {
        (self.key << 4) | (encode_side(self.turn) << 2) | encode_side(self.holder)
    }

    fn unpack(raw: u64) -> Self {
        Self {
            key: raw >> 4,
            holder: decode_side(raw),
            turn: decode_side(raw >> 2),
        }
    }

    /// Whether the current key is spoken for by the other side.
    fn other_side_owns_key(self, side: Side) -> bool {
        let other = Some(side.other());
        self.holder == other || self.turn == other
    }

    fn next_key_for(self, side: Side) -> u64 {
        if self.other_side_owns_key(side) {
            self.key + 1
        } else {
            self.key
        }
    }

    fn step(self, side: Side, key: u64) -> Step {
        if self.holder == Some(side) {
            return Step::Fail(SyncError::AlreadyHeld(side));
        }
        let stale = key < self.key || (key == self.key && self.other_side_owns_key(side));
        if stale {
            return Step::Fail(SyncError::KeyMismatch {
                side,
                expected: self.next_key_for(side),
                found: key,
            });
        }
        if self.holder.is_none() && key == self.key {
            Step::Take
        } else {
            Step::Wait
        }
    }
}

/// Keyed-mutex gate guarding one shared resource.
pub struct SyncGate<M> {
    state: AtomicU64,
    mutex: M,
}

impl<M: KeyedMutex> SyncGate<M> {
    /// A fresh gate: key 0, unheld, either side may take it first.
    pub fn new(mutex: M) -> Self {
        Self {
            state: AtomicU64::new(GateState::FRESH.pack()),
            mutex,
        }
    }

    fn load(&self) -> GateState {
        GateState::unpack(self.state.load(Ordering::Acquire))
    }

    /// Key the gate currently carries.
    pub fn current_key(&self) -> u64 {
        self.load().key
    }

    /// Side currently holding the gate, if any.
    pub fn holder(&self) -> Option<Side> {
        self.load().holder
    }

    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }

    /// Key `side` must present on its next acquire.
    pub fn next_key_for(&self, side: Side) -> u64 {
        self.load().next_key_for(side)
    }

    /// Borrow the driver-level keyed mutex.
    pub fn driver_mutex(&self) -> &M {
        &self.mutex
    }

    /// Consume the gate, returning the driver-level keyed mutex.
    pub fn into_driver_mutex(self) -> M {
        self.mutex
    }

    /// Acquire the gate for `side` with `key`, waiting up to `timeout`.
    ///
    /// Returns immediately with [`SyncError::AlreadyHeld`] if `side` holds
    /// the gate and with [`SyncError::KeyMismatch`] if `key` is stale. Waits
    /// while the other side holds the gate or while `key` has not been
    /// released yet, then reports [`SyncError::AcquireTimeout`]. Timeouts
    /// are never retried here.
    pub fn acquire(&self, side: Side, key: u64, timeout: Duration) -> Result<(), SyncError> {
        self.acquire_with(side, timeout, 0, |_| key).map(|_| ())
    }

    /// Acquire the gate for `side` with whatever key `side` is entitled to,
    /// returning that key.
    ///
    /// The key is worked out from each state the wait loop observes, so a
    /// concurrent acquire by the other side turns into a wait instead of a
    /// stale key.
    pub fn acquire_next(&self, side: Side, timeout: Duration) -> Result<u64, SyncError> {
        self.acquire_with(side, timeout, 0, |state| state.next_key_for(side))
    }

    fn acquire_with(
        &self,
        side: Side,
        timeout: Duration,
        headroom: u64,
        pick: impl Fn(GateState) -> u64,
    ) -> Result<u64, SyncError> {
        let deadline = Instant::now().checked_add(timeout);

        let (previous, key) = loop {
            let raw = self.state.load(Ordering::Acquire);
            let current = GateState::unpack(raw);
            let key = pick(current);
            // `headroom` keys above `key` must stay representable.
            if key > MAX_KEY - headroom {
                return Err(SyncError::KeyOutOfRange(key + headroom));
            }
            match current.step(side, key) {
                Step::Fail(err) => return Err(err),
                Step::Take => {
                    let taken = GateState {
                        holder: Some(side),
                        ..current
                    };
                    if self
                        .state
                        .compare_exchange(raw, taken.pack(), Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        break (current, key);
                    }
                }
                Step::Wait => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(SyncError::AcquireTimeout { side, key, timeout });
                    }
                    std::thread::yield_now();
                }
            }
        };

        let remaining = deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(timeout);
        match self.mutex.acquire(side, key, remaining) {
            Ok(()) => {
                trace!("{side} acquired gate with key {key}");
                Ok(key)
            }
            Err(err) => {
                // Only the holder mutates a held gate, so the taken state is
                // still in place and can be put back as it was.
                self.state.store(previous.pack(), Ordering::Release);
                match err {
                    KeyedMutexError::Timeout => {
                        warn!("{side} timed out in driver keyed mutex for key {key}");
                        Err(SyncError::AcquireTimeout { side, key, timeout })
                    }
                    KeyedMutexError::Driver(e) => Err(SyncError::Driver(e)),
                }
            }
        }
    }

    /// Release the gate held by `side`, handing it to the other side with
    /// `new_key`. `new_key` must be strictly greater than the acquired key.
    ///
    /// If the driver mutex refuses the release ([`SyncError::Driver`]) the
    /// gate stays held by `side`, since the GPU queue is still fenced. The
    /// holder may call `release` again; dropping the resource instead tears
    /// the pair down regardless.
    pub fn release(&self, side: Side, new_key: u64) -> Result<(), SyncError> {
        if new_key > MAX_KEY {
            return Err(SyncError::KeyOutOfRange(new_key));
        }
        let current = self.load();
        if current.holder != Some(side) {
            return Err(SyncError::NotHeld(side));
        }
        if new_key <= current.key {
            return Err(SyncError::KeyMismatch {
                side,
                expected: current.key + 1,
                found: new_key,
            });
        }

        self.mutex.release(side, new_key).map_err(SyncError::Driver)?;

        let handed_off = GateState {
            key: new_key,
            holder: None,
            turn: Some(side.other()),
        };
        self.state.store(handed_off.pack(), Ordering::Release);
        trace!("{side} released gate with key {new_key}");
        Ok(())
    }

    /// Acquire and return a guard that releases with `key + 1` when dropped.
    pub fn lock(&self, side: Side, key: u64, timeout: Duration) -> Result<GateGuard<'_, M>, SyncError> {
        if key >= MAX_KEY {
            return Err(SyncError::KeyOutOfRange(key.saturating_add(1)));
        }
        self.acquire(side, key, timeout)?;
        Ok(GateGuard {
            gate: self,
            side,
            key,
            released: false,
        })
    }

    /// [`acquire_next`](Self::acquire_next) returning a guard that releases
    /// with the acquired key + 1 when dropped.
    pub fn lock_next(&self, side: Side, timeout: Duration) -> Result<GateGuard<'_, M>, SyncError> {
        // One key of headroom so the guard can always release.
        let key = self.acquire_with(side, timeout, 1, |state| state.next_key_for(side))?;
        Ok(GateGuard {
            gate: self,
            side,
            key,
            released: false,
        })
    }
}

impl<M> fmt::Debug for SyncGate<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = GateState::unpack(self.state.load(Ordering::Acquire));
        f.debug_struct("SyncGate")
            .field("key", &state.key)
            .field("holder", &state.holder)
            .field("turn", &state.turn)
            .finish()
    }
}

/// Scoped hold on a [`SyncGate`]. Dropping it hands the resource to the
/// other side with the next key, also while unwinding.
pub struct GateGuard<'a, M: KeyedMutex> {
    gate: &'a SyncGate<M>,
    side: Side,
    key: u64,
    released: bool,
}

impl<M: KeyedMutex> GateGuard<'_, M> {
    pub fn side(&self) -> Side {
        self.side
    }

    /// Key the gate was acquired with.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Release explicitly with a chosen key instead of `key + 1`.
    pub fn release_with(mut self, new_key: u64) -> Result<(), SyncError> {
        self.released = true;
        self.gate.release(self.side, new_key)
    }
}

impl<M: KeyedMutex> Drop for GateGuard<'_, M> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.gate.release(self.side, self.key + 1) {
            error!("Failed to release {} gate after key {}: {e}", self.side, self.key);
        }
    }
}
