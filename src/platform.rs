use crate::record::MAX_STACK_DEPTH;

/// Identifier of the CPU the calling thread is currently running on, or
/// `-1` when the platform cannot tell.
#[cfg(target_os = "linux")]
pub(crate) fn current_cpu() -> i32 {
  // SAFETY: sched_getcpu has no preconditions.
  unsafe { libc::sched_getcpu() }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn current_cpu() -> i32 {
  -1
}

/// Kernel-level identifier of the calling thread.
#[cfg(target_os = "linux")]
pub(crate) fn current_thread_id() -> u64 {
  // SAFETY: gettid has no preconditions.
  (unsafe { libc::gettid() }) as u64
}

/// Process-local identifier of the calling thread, assigned on first use.
#[cfg(not(target_os = "linux"))]
pub(crate) fn current_thread_id() -> u64 {
  use std::sync::atomic::{AtomicU64, Ordering};

  static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

  thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
  }

  THREAD_ID.with(|id| *id)
}

/// Walks the native call stack and stores up to `max_depth` instruction
/// pointers into `frames`, skipping the `skip` frames closest to the
/// capture point. Returns the number of frames stored.
pub fn capture_stack(
  frames: &mut [usize; MAX_STACK_DEPTH],
  max_depth: usize,
  skip: usize,
) -> usize {
  let max_depth = max_depth.min(MAX_STACK_DEPTH);
  let mut remaining_skip = skip;
  let mut depth = 0;

  backtrace::trace(|frame| {
    if remaining_skip > 0 {
      remaining_skip -= 1;
      return true;
    }

    if depth >= max_depth {
      return false;
    }

    frames[depth] = frame.ip() as usize;
    depth += 1;

    true
  });

  depth
}
