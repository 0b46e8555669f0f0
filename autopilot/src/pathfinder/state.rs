use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Progress of one navigation run. Ordered: within a run the state only advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PathState {
    NotRunning = 0,
    NoObstruction = 1,
    Searching = 2,
    PathBlocked = 3,
}

impl PathState {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => PathState::NotRunning,
            1 => PathState::NoObstruction,
            2 => PathState::Searching,
            _ => PathState::PathBlocked,
        }
    }
}

const STATE_BITS: u32 = 8;
const STATE_MASK: u64 = (1 << STATE_BITS) - 1;

fn pack(run: u64, state: PathState) -> u64 {
    (run << STATE_BITS) | state as u64
}

fn unpack(word: u64) -> (u64, PathState) {
    (word >> STATE_BITS, PathState::from_bits((word & STATE_MASK) as u8))
}

/// A [`PathState`] published to other threads, tagged with the run it belongs to.
///
/// Run id and state share one word, so a write from a finished run can never land
/// in the run that replaced it.
#[derive(Debug, Default)]
pub struct SharedPathState(AtomicU64);

impl SharedPathState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> PathState {
        unpack(self.0.load(Ordering::Acquire)).1
    }

    /// The run the published state belongs to.
    pub fn run(&self) -> u64 {
        unpack(self.0.load(Ordering::Acquire)).0
    }

    /// Move forward to `to` unless already past it. Returns the previous state, or
    /// `None` if `run` is no longer the published run.
    pub fn advance(&self, run: u64, to: PathState) -> Option<PathState> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let (published, state) = unpack(current);
            if published != run {
                return None;
            }
            if state >= to {
                return Some(state);
            }
            match self.0.compare_exchange_weak(
                current,
                pack(run, to),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(state),
                Err(actual) => current = actual,
            }
        }
    }

    /// Publish `NotRunning` for a new run; only the owner of the run counter does this.
    pub(crate) fn reset(&self, run: u64) {
        self.0.store(pack(run, PathState::NotRunning), Ordering::Release);
    }
}

/// A value written by background jobs and owned by one run at a time.
#[derive(Debug)]
pub(crate) struct RunSlot<T> {
    inner: Mutex<(u64, T)>,
}

impl<T: Clone> RunSlot<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new((0, value)),
        }
    }

    /// Hand the slot to `run` with a fresh value.
    pub fn reset(&self, run: u64, value: T) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = (run, value);
    }

    /// Store `value` if `run` still owns the slot. Returns whether it was stored.
    pub fn set(&self, run: u64, value: T) -> bool {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.0 != run {
            return false;
        }
        slot.1 = value;
        true
    }

    pub fn get(&self) -> T {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .1
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_only_advances() {
        let state = SharedPathState::new();
        state.reset(1);
        assert_eq!(state.get(), PathState::NotRunning);
        assert_eq!(state.advance(1, PathState::Searching), Some(PathState::NotRunning));
        assert_eq!(state.advance(1, PathState::NoObstruction), Some(PathState::Searching));
        assert_eq!(state.get(), PathState::Searching);
        state.advance(1, PathState::PathBlocked);
        assert_eq!(state.get(), PathState::PathBlocked);
        state.reset(2);
        assert_eq!(state.get(), PathState::NotRunning);
        assert_eq!(state.run(), 2);
    }

    #[test]
    fn finished_run_cannot_advance_its_successor() {
        let state = SharedPathState::new();
        state.reset(1);
        state.reset(2);
        assert_eq!(state.advance(1, PathState::NoObstruction), None);
        assert_eq!(state.get(), PathState::NotRunning);
        assert_eq!(state.advance(2, PathState::NoObstruction), Some(PathState::NotRunning));
        assert_eq!(state.get(), PathState::NoObstruction);
    }

    #[test]
    fn slot_ignores_writes_from_other_runs() {
        let slot = RunSlot::new(f32::INFINITY);
        slot.reset(3, f32::INFINITY);
        assert!(!slot.set(2, 5.0));
        assert_eq!(slot.get(), f32::INFINITY);
        assert!(slot.set(3, 5.0));
        assert_eq!(slot.get(), 5.0);
    }
}
