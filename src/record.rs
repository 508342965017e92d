use std::hash::{Hash, Hasher};
use std::time::SystemTime;

use crate::config::ProfilerConfig;
use crate::platform;

/// Deepest call stack retained for any allocation or deallocation.
pub const MAX_STACK_DEPTH: usize = 64;

/// Stable identifier correlating a sampled allocation with its eventual
/// free. Issued by the host sampler and unique per outstanding allocation.
pub type AllocHandle = u64;

/// A sampled allocation as reported by the host allocator.
#[derive(Clone, Debug)]
pub struct AllocationEvent {
  pub handle: AllocHandle,
  /// Number of valid entries in `stack`.
  pub depth: usize,
  pub stack: [usize; MAX_STACK_DEPTH],
  pub requested_size: usize,
  pub requested_alignment: usize,
  /// Size after size-class and page rounding.
  pub allocated_size: usize,
  pub allocation_time: SystemTime,
  /// Raw sampler weight: the number of bytes this sample stands in for.
  pub weight: u64,
}

impl AllocationEvent {
  /// Builds an event for an allocation made by the calling thread, capturing
  /// the current call stack and timestamp.
  #[must_use]
  pub fn capture(
    handle: AllocHandle,
    requested_size: usize,
    requested_alignment: usize,
    allocated_size: usize,
    weight: u64,
  ) -> Self {
    let mut stack = [0usize; MAX_STACK_DEPTH];
    let depth = platform::capture_stack(&mut stack, MAX_STACK_DEPTH, 1);

    Self {
      handle,
      depth,
      stack,
      requested_size,
      requested_alignment,
      allocated_size,
      allocation_time: SystemTime::now(),
      weight,
    }
  }
}

/// Deallocation-side observation broadcast alongside a freed handle.
#[derive(Clone, Debug)]
pub(crate) struct DeallocationEvent {
  pub time: SystemTime,
  pub cpu_id: i32,
  pub thread_id: u64,
  pub depth: usize,
  pub stack: [usize; MAX_STACK_DEPTH],
}

impl DeallocationEvent {
  pub(crate) fn capture(config: &ProfilerConfig) -> Self {
    let mut stack = [0usize; MAX_STACK_DEPTH];
    let depth = platform::capture_stack(
      &mut stack,
      config.max_stack_depth,
      config.free_skip_frames,
    );

    Self {
      time: SystemTime::now(),
      cpu_id: platform::current_cpu(),
      thread_id: platform::current_thread_id(),
      depth,
      stack,
    }
  }
}

/// Stack trace and metadata for one side of a sampled allocation, as stored
/// in the in-flight map and the aggregation table.
#[derive(Clone, Debug)]
pub(crate) struct SampleRecord {
  /// Number of allocations this sample stands in for.
  pub weight: f64,
  pub requested_size: usize,
  pub requested_alignment: usize,
  pub allocated_size: usize,
  pub depth: usize,
  pub stack: [usize; MAX_STACK_DEPTH],
  pub creation_time: SystemTime,
  pub cpu_id: i32,
  pub thread_id: u64,
}

impl SampleRecord {
  /// Allocation-side record: stack, sizes and timestamp come from the
  /// event; CPU and thread identity from the reporting thread.
  pub(crate) fn for_allocation(
    event: &AllocationEvent,
    max_depth: usize,
    cpu_id: i32,
    thread_id: u64,
  ) -> Self {
    let depth = event.depth.min(max_depth).min(MAX_STACK_DEPTH);
    let mut stack = [0usize; MAX_STACK_DEPTH];
    stack[..depth].copy_from_slice(&event.stack[..depth]);

    Self {
      weight: event.weight as f64 / (event.requested_size + 1) as f64,
      requested_size: event.requested_size,
      requested_alignment: event.requested_alignment,
      allocated_size: event.allocated_size,
      depth,
      stack,
      creation_time: event.allocation_time,
      cpu_id,
      thread_id,
    }
  }

  /// Deallocation-side record: the size trio mirrors the allocation being
  /// freed.
  pub(crate) fn for_deallocation(alloc: &SampleRecord, event: &DeallocationEvent) -> Self {
    Self {
      weight: 0.0,
      requested_size: alloc.requested_size,
      requested_alignment: alloc.requested_alignment,
      allocated_size: alloc.allocated_size,
      depth: event.depth,
      stack: event.stack,
      creation_time: event.time,
      cpu_id: event.cpu_id,
      thread_id: event.thread_id,
    }
  }

  pub(crate) fn frames(&self) -> &[usize] {
    &self.stack[..self.depth]
  }
}

// Identity covers the stack prefix and the size trio; timestamps, weight,
// CPU and thread vary per event and are excluded.
impl PartialEq for SampleRecord {
  fn eq(&self, other: &Self) -> bool {
    self.depth == other.depth
      && self.requested_size == other.requested_size
      && self.requested_alignment == other.requested_alignment
      && self.allocated_size == other.allocated_size
      && self.frames() == other.frames()
  }
}

impl Eq for SampleRecord {}

impl Hash for SampleRecord {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.frames().hash(state);
    self.depth.hash(state);
    self.requested_size.hash(state);
    self.requested_alignment.hash(state);
    self.allocated_size.hash(state);
  }
}

#[cfg(test)]
mod tests {
  use std::time::{Duration, UNIX_EPOCH};

  use super::*;

  fn event(depth: usize) -> AllocationEvent {
    let mut stack = [0usize; MAX_STACK_DEPTH];
    for (i, frame) in stack.iter_mut().enumerate().take(depth) {
      *frame = 0x1000 + i;
    }

    AllocationEvent {
      handle: 1,
      depth,
      stack,
      requested_size: 32,
      requested_alignment: 8,
      allocated_size: 32,
      allocation_time: UNIX_EPOCH + Duration::from_nanos(1_000),
      weight: 1_024,
    }
  }

  #[test]
  fn identity_ignores_time_cpu_and_thread() {
    let a = SampleRecord::for_allocation(&event(3), MAX_STACK_DEPTH, 0, 100);
    let mut b = SampleRecord::for_allocation(&event(3), MAX_STACK_DEPTH, 5, 200);
    b.creation_time = UNIX_EPOCH + Duration::from_nanos(9_000);
    b.weight = 0.25;

    assert_eq!(a, b);
  }

  #[test]
  fn identity_covers_the_stack_prefix() {
    let a = SampleRecord::for_allocation(&event(3), MAX_STACK_DEPTH, 0, 100);
    let mut b = SampleRecord::for_allocation(&event(3), MAX_STACK_DEPTH, 0, 100);
    b.stack[1] = 0xdead;

    assert_ne!(a, b);

    // Frames past `depth` are not part of the identity.
    let mut c = SampleRecord::for_allocation(&event(3), MAX_STACK_DEPTH, 0, 100);
    c.stack[10] = 0xdead;
    assert_eq!(a, c);
  }

  #[test]
  fn stacks_are_truncated_to_the_configured_depth() {
    let record = SampleRecord::for_allocation(&event(40), 4, 0, 100);

    assert_eq!(record.depth, 4);
    assert_eq!(record.frames(), &[0x1000, 0x1001, 0x1002, 0x1003]);
  }

  #[test]
  fn weight_is_normalized_by_the_requested_size() {
    let record = SampleRecord::for_allocation(&event(1), MAX_STACK_DEPTH, 0, 100);

    assert!((record.weight - 1_024.0 / 33.0).abs() < 1e-9);
  }

  #[test]
  fn deallocation_records_mirror_the_allocation_sizes() {
    let alloc = SampleRecord::for_allocation(&event(2), MAX_STACK_DEPTH, 0, 100);

    let mut stack = [0usize; MAX_STACK_DEPTH];
    stack[0] = 0xf00;
    let free = DeallocationEvent {
      time: UNIX_EPOCH + Duration::from_nanos(5_000),
      cpu_id: 3,
      thread_id: 200,
      depth: 1,
      stack,
    };

    let dealloc = SampleRecord::for_deallocation(&alloc, &free);

    assert_eq!(dealloc.requested_size, alloc.requested_size);
    assert_eq!(dealloc.allocated_size, alloc.allocated_size);
    assert_eq!(dealloc.frames(), &[0xf00]);
    assert_eq!(dealloc.cpu_id, 3);
    assert_eq!(dealloc.thread_id, 200);
  }
}
