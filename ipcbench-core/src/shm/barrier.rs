// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Sense-reversing barrier shared between processes.
//!
//! The state lives in a named POSIX shared memory object so that forked
//! processes (not threads) rendezvous on it. A `PTHREAD_PROCESS_SHARED`
//! mutex and condition variable inside the mapping serialize every update.
//!
//! Each participant remembers the sense in effect when it arrives. The last
//! arriver resets the count and flips the sense in the same critical section;
//! everyone else sleeps until the shared sense differs from the one they
//! remembered. A participant that loops straight back into [`ProcessBarrier::wait`]
//! therefore always arrives for the next phase and can never be counted as a
//! late arrival of the phase it just left.
//!
//! A barrier can be abandoned when one participant is known never to arrive.
//! Every current and future `wait` on it then fails instead of blocking.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::BarrierError;
use crate::shm::SharedMemoryRegion;
use crate::types::ResourceName;

/// Published by the creator once the mutex and condvar are usable.
const READY_MAGIC: u32 = 0x5342_4152;

/// Bytes reserved for the state. One page.
const STATE_REGION_SIZE: usize = 4096;

/// How long an attacher waits for the creator to publish `READY_MAGIC`.
const INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Barrier state stored at the start of the shared mapping.
///
/// Counters are only mutated with the mutex held; the atomics keep every
/// access well defined across the process boundary.
#[repr(C)]
struct BarrierState {
    ready: AtomicU32,
    participant_count: AtomicU32,
    arrived_count: AtomicU32,
    sense: AtomicU32,
    /// Completed cycles. Parity always equals `sense`.
    cycles: AtomicU64,
    abandoned: AtomicU32,
    mutex: UnsafeCell<libc::pthread_mutex_t>,
    cond: UnsafeCell<libc::pthread_cond_t>,
}

const _: () = assert!(std::mem::size_of::<BarrierState>() <= STATE_REGION_SIZE);

/// Handle to a named barrier. One handle per participant.
///
/// Dropping the handle only unmaps it. The named state lives until
/// [`ProcessBarrier::clear`] is called.
pub struct ProcessBarrier {
    name: ResourceName,
    region: SharedMemoryRegion,
}

impl ProcessBarrier {
    /// Create the named barrier, or attach to it if it already exists.
    ///
    /// # Errors
    /// Fails if the region cannot be allocated or mapped, if an existing
    /// barrier with this name expects a different participant count, or if
    /// the creator never finished initialising it.
    pub fn create(name: &ResourceName, participant_count: u32) -> Result<Self, BarrierError> {
        if participant_count == 0 {
            return Err(BarrierError::ZeroParticipants {
                name: name.to_string(),
            });
        }

        let region = SharedMemoryRegion::create_or_open(name.as_str(), STATE_REGION_SIZE)?;
        let barrier = Self {
            name: name.clone(),
            region,
        };

        if barrier.region.is_creator() {
            if let Err(e) = barrier.initialize(participant_count) {
                SharedMemoryRegion::unlink(name.as_str());
                return Err(e);
            }
            tracing::debug!(barrier = %name, participants = participant_count, "Created barrier");
        } else {
            barrier.await_ready()?;
            let found = barrier.state().participant_count.load(Ordering::Acquire);
            if found != participant_count {
                return Err(BarrierError::ParticipantMismatch {
                    name: name.to_string(),
                    requested: participant_count,
                    found,
                });
            }
            tracing::debug!(barrier = %name, participants = participant_count, "Attached to barrier");
        }

        Ok(barrier)
    }

    /// Destroy the named barrier. Silent if it does not exist.
    ///
    /// Returns whether a resource was removed. A following [`ProcessBarrier::create`]
    /// with the same name starts from a fresh state.
    pub fn clear(name: &ResourceName) -> bool {
        SharedMemoryRegion::unlink(name.as_str())
    }

    /// Block until every participant has called `wait` for the current phase.
    ///
    /// # Errors
    /// [`BarrierError::Abandoned`] if the barrier was abandoned before or
    /// while this participant waited.
    pub fn wait(&self) -> Result<(), BarrierError> {
        let state = self.state();
        let _lock = self.lock()?;
        if state.abandoned.load(Ordering::Relaxed) != 0 {
            return Err(self.abandoned_error());
        }

        let local_sense = state.sense.load(Ordering::Relaxed);
        let arrived = state.arrived_count.load(Ordering::Relaxed) + 1;

        if arrived == state.participant_count.load(Ordering::Relaxed) {
            state.arrived_count.store(0, Ordering::Relaxed);
            state.cycles.fetch_add(1, Ordering::Relaxed);
            state.sense.store(local_sense ^ 1, Ordering::Release);
            // SAFETY: cond was initialised by the creator and lives in the mapping
            let rc = unsafe { libc::pthread_cond_broadcast(state.cond.get()) };
            self.check(rc, "pthread_cond_broadcast")?;
        } else {
            state.arrived_count.store(arrived, Ordering::Relaxed);
            while state.sense.load(Ordering::Acquire) == local_sense {
                if state.abandoned.load(Ordering::Relaxed) != 0 {
                    return Err(self.abandoned_error());
                }
                // SAFETY: the mutex is held by `_lock`, both objects are process-shared
                let rc = unsafe { libc::pthread_cond_wait(state.cond.get(), state.mutex.get()) };
                self.check(rc, "pthread_cond_wait")?;
            }
        }

        Ok(())
    }

    /// Wake every waiter with [`BarrierError::Abandoned`] and fail all later waits.
    pub fn abandon(&self) -> Result<(), BarrierError> {
        let state = self.state();
        let _lock = self.lock()?;
        state.abandoned.store(1, Ordering::Relaxed);
        // SAFETY: cond was initialised by the creator and lives in the mapping
        let rc = unsafe { libc::pthread_cond_broadcast(state.cond.get()) };
        self.check(rc, "pthread_cond_broadcast")?;
        tracing::debug!(barrier = %self.name, "Abandoned barrier");
        Ok(())
    }

    /// Abandon the named barrier from a process that holds no handle to it.
    ///
    /// Returns false if no initialised barrier with that name exists.
    pub fn abandon_named(name: &ResourceName) -> bool {
        let Ok(region) = SharedMemoryRegion::open(name.as_str(), STATE_REGION_SIZE) else {
            return false;
        };
        let barrier = Self {
            name: name.clone(),
            region,
        };
        if barrier.state().ready.load(Ordering::Acquire) != READY_MAGIC {
            return false;
        }
        match barrier.abandon() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(barrier = %name, error = %e, "Failed to abandon barrier");
                false
            }
        }
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn participant_count(&self) -> u32 {
        self.state().participant_count.load(Ordering::Acquire)
    }

    /// Participants currently waiting in the open phase.
    pub fn arrived(&self) -> u32 {
        self.state().arrived_count.load(Ordering::Acquire)
    }

    /// Number of completed phases since creation.
    pub fn cycles(&self) -> u64 {
        self.state().cycles.load(Ordering::Acquire)
    }

    fn state(&self) -> &BarrierState {
        // SAFETY: the region is at least STATE_REGION_SIZE bytes, page aligned,
        // and BarrierState is repr(C) with only atomics and pthread objects.
        unsafe { &*(self.region.as_ptr() as *const BarrierState) }
    }

    fn initialize(&self, participant_count: u32) -> Result<(), BarrierError> {
        let state = self.state();

        // SAFETY: the mapping was freshly zeroed by ftruncate and nobody else
        // touches the pthread objects before `ready` is published.
        unsafe {
            let mut mutex_attr: libc::pthread_mutexattr_t = std::mem::zeroed();
            self.check(libc::pthread_mutexattr_init(&mut mutex_attr), "pthread_mutexattr_init")?;
            let rc = libc::pthread_mutexattr_setpshared(&mut mutex_attr, libc::PTHREAD_PROCESS_SHARED);
            if rc == 0 {
                let rc = libc::pthread_mutex_init(state.mutex.get(), &mutex_attr);
                libc::pthread_mutexattr_destroy(&mut mutex_attr);
                self.check(rc, "pthread_mutex_init")?;
            } else {
                libc::pthread_mutexattr_destroy(&mut mutex_attr);
                self.check(rc, "pthread_mutexattr_setpshared")?;
            }

            let mut cond_attr: libc::pthread_condattr_t = std::mem::zeroed();
            self.check(libc::pthread_condattr_init(&mut cond_attr), "pthread_condattr_init")?;
            let rc = libc::pthread_condattr_setpshared(&mut cond_attr, libc::PTHREAD_PROCESS_SHARED);
            if rc == 0 {
                let rc = libc::pthread_cond_init(state.cond.get(), &cond_attr);
                libc::pthread_condattr_destroy(&mut cond_attr);
                self.check(rc, "pthread_cond_init")?;
            } else {
                libc::pthread_condattr_destroy(&mut cond_attr);
                self.check(rc, "pthread_condattr_setpshared")?;
            }
        }

        state.participant_count.store(participant_count, Ordering::Relaxed);
        state.arrived_count.store(0, Ordering::Relaxed);
        state.sense.store(0, Ordering::Relaxed);
        state.cycles.store(0, Ordering::Relaxed);
        state.abandoned.store(0, Ordering::Relaxed);
        state.ready.store(READY_MAGIC, Ordering::Release);
        Ok(())
    }

    fn await_ready(&self) -> Result<(), BarrierError> {
        let start = Instant::now();
        while self.state().ready.load(Ordering::Acquire) != READY_MAGIC {
            if start.elapsed() > INIT_TIMEOUT {
                return Err(BarrierError::InitTimeout {
                    name: self.name.to_string(),
                    waited: INIT_TIMEOUT,
                });
            }
            std::thread::sleep(Duration::from_micros(100));
        }
        Ok(())
    }

    fn lock(&self) -> Result<StateLock<'_>, BarrierError> {
        let mutex = self.state().mutex.get();
        // SAFETY: mutex was initialised as process-shared before `ready` was published
        let rc = unsafe { libc::pthread_mutex_lock(mutex) };
        self.check(rc, "pthread_mutex_lock")?;
        Ok(StateLock {
            mutex,
            _barrier: PhantomData,
        })
    }

    fn abandoned_error(&self) -> BarrierError {
        BarrierError::Abandoned {
            name: self.name.to_string(),
        }
    }

    /// pthread functions return the error number instead of setting errno.
    fn check(&self, rc: i32, operation: &'static str) -> Result<(), BarrierError> {
        if rc == 0 {
            Ok(())
        } else {
            Err(BarrierError::Sync {
                name: self.name.to_string(),
                operation,
                source: std::io::Error::from_raw_os_error(rc),
            })
        }
    }
}

/// Unlocks the state mutex when dropped.
struct StateLock<'a> {
    mutex: *mut libc::pthread_mutex_t,
    _barrier: PhantomData<&'a ProcessBarrier>,
}

impl Drop for StateLock<'_> {
    fn drop(&mut self) {
        // SAFETY: constructed only after a successful pthread_mutex_lock
        unsafe { libc::pthread_mutex_unlock(self.mutex) };
    }
}
