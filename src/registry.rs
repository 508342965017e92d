use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;
use spin::Mutex;

use crate::config::ProfilerConfig;
use crate::platform;
use crate::profile::Profile;
use crate::profiler::Profiler;
use crate::record::{AllocHandle, AllocationEvent, DeallocationEvent};

struct RegistryEntry {
  id: u64,
  profiler: Profiler,
}

struct RegistryInner {
  next_id: u64,
  profilers: SmallVec<[RegistryEntry; 2]>,
}

struct RegistryShared {
  config: ProfilerConfig,
  /// Number of linked profilers, readable without the lock so the event
  /// path can bail out early while no profiler is active.
  active: AtomicUsize,
  inner: Mutex<RegistryInner>,
}

/// Fans every sampled event out to all active profilers.
///
/// The registry lock serializes event delivery, start and stop, so the
/// profilers reached through it need no locking of their own. Clones are
/// cheap handles onto the same registry.
#[derive(Clone)]
pub struct ProfilerRegistry {
  shared: Arc<RegistryShared>,
}

impl ProfilerRegistry {
  #[must_use]
  pub fn new() -> Self {
    Self::with_config(ProfilerConfig::default())
  }

  #[must_use]
  pub fn with_config(config: ProfilerConfig) -> Self {
    Self {
      shared: Arc::new(RegistryShared {
        config,
        active: AtomicUsize::new(0),
        inner: Mutex::new(RegistryInner {
          next_id: 1,
          profilers: SmallVec::new(),
        }),
      }),
    }
  }

  #[must_use]
  pub fn config(&self) -> &ProfilerConfig {
    &self.shared.config
  }

  /// Broadcasts a sampled allocation to every active profiler.
  pub fn report_malloc(&self, event: &AllocationEvent) {
    if self.shared.active.load(Ordering::Acquire) == 0 {
      return;
    }

    self.report_malloc_as(event, platform::current_cpu(), platform::current_thread_id());
  }

  pub(crate) fn report_malloc_as(&self, event: &AllocationEvent, cpu_id: i32, thread_id: u64) {
    let mut inner = self.shared.inner.lock();
    for entry in inner.profilers.iter_mut() {
      entry.profiler.report_malloc(event, cpu_id, thread_id);
    }
  }

  /// Broadcasts a sampled free to every active profiler. The deallocation
  /// stack and identity are captured before the registry lock is taken.
  pub fn report_free(&self, handle: AllocHandle) {
    if self.shared.active.load(Ordering::Acquire) == 0 {
      return;
    }

    let event = DeallocationEvent::capture(&self.shared.config);
    self.report_free_as(handle, &event);
  }

  pub(crate) fn report_free_as(&self, handle: AllocHandle, event: &DeallocationEvent) {
    let mut inner = self.shared.inner.lock();
    for entry in inner.profilers.iter_mut() {
      entry.profiler.report_free(handle, event);
    }
  }

  /// Starts a profiler that observes every subsequent sampled event until
  /// its guard is stopped or dropped.
  #[must_use]
  pub fn start_profiler(&self) -> ProfilerGuard {
    let profiler = Profiler::new(self.shared.config);

    let mut inner = self.shared.inner.lock();
    let id = inner.next_id;
    inner.next_id += 1;
    inner.profilers.push(RegistryEntry { id, profiler });
    self.shared.active.store(inner.profilers.len(), Ordering::Release);
    drop(inner);

    log::debug!("started lifetime profiler {id}");

    ProfilerGuard {
      registry: self.clone(),
      id: Some(id),
    }
  }

  fn stop_profiler(&self, id: u64) -> Profile {
    let mut inner = self.shared.inner.lock();
    let position = inner
      .profilers
      .iter()
      .position(|entry| entry.id == id)
      .expect("stopped profiler is not linked in the registry");
    let mut entry = inner.profilers.swap_remove(position);
    self.shared.active.store(inner.profilers.len(), Ordering::Release);
    drop(inner);

    log::debug!("stopped lifetime profiler {id}");

    entry.profiler.stop()
  }
}

impl Default for ProfilerRegistry {
  fn default() -> Self {
    Self::new()
  }
}

/// Scoped handle for an active profiler.
///
/// Stopping consumes the guard and detaches the profile collected so far;
/// dropping the guard instead unlinks the profiler and discards its data.
pub struct ProfilerGuard {
  registry: ProfilerRegistry,
  id: Option<u64>,
}

impl ProfilerGuard {
  /// Stops the profiler and detaches its collected profile.
  #[must_use]
  pub fn stop(mut self) -> Profile {
    match self.id.take() {
      Some(id) => self.registry.stop_profiler(id),
      None => Profile::empty(),
    }
  }
}

impl Drop for ProfilerGuard {
  fn drop(&mut self) {
    if let Some(id) = self.id.take() {
      drop(self.registry.stop_profiler(id));
    }
  }
}
