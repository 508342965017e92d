use hashbrown::HashMap;
use nohash_hasher::BuildNoHashHasher;

use crate::arena::{ArenaAllocator, ArenaRef};
use crate::config::ProfilerConfig;
use crate::profile::Profile;
use crate::record::{AllocHandle, AllocationEvent, DeallocationEvent, SampleRecord};
use crate::table::LifetimeTable;

type InFlightMap =
  HashMap<AllocHandle, SampleRecord, BuildNoHashHasher<AllocHandle>, ArenaAllocator>;

/// Pairs sampled allocations with their frees and folds each pair into the
/// owned aggregation table. All container storage lives in the shared
/// arena; callers serialize access (see the registry).
pub(crate) struct Profiler {
  config: ProfilerConfig,
  allocs: InFlightMap,
  table: Option<LifetimeTable>,
  // Declared last: the arena must outlive the in-flight map during drop.
  _arena: ArenaRef,
}

impl Profiler {
  pub(crate) fn new(config: ProfilerConfig) -> Self {
    let arena = ArenaRef::new();

    Self {
      config,
      allocs: HashMap::with_hasher_in(BuildNoHashHasher::default(), ArenaAllocator),
      table: Some(LifetimeTable::new()),
      _arena: arena,
    }
  }

  /// Upserts the in-flight record for a sampled allocation. Reporting the
  /// same handle again overwrites the previous record.
  pub(crate) fn report_malloc(&mut self, event: &AllocationEvent, cpu_id: i32, thread_id: u64) {
    let record =
      SampleRecord::for_allocation(event, self.config.max_stack_depth, cpu_id, thread_id);
    self.allocs.insert(event.handle, record);
  }

  /// Matches a freed handle against its in-flight record. A free without a
  /// matching allocation is dropped: the allocation predates this profiler.
  pub(crate) fn report_free(&mut self, handle: AllocHandle, event: &DeallocationEvent) {
    let Some(alloc) = self.allocs.remove(&handle) else {
      log::trace!("dropping free for untracked allocation handle {handle}");
      return;
    };

    let dealloc = SampleRecord::for_deallocation(&alloc, event);
    if let Some(table) = &mut self.table {
      table.add_trace(&alloc, &dealloc);
    }
  }

  /// Freezes the aggregation table and hands it over. Later calls yield an
  /// empty profile.
  pub(crate) fn stop(&mut self) -> Profile {
    match self.table.take() {
      Some(mut table) => {
        table.set_stop_time();
        Profile::from_table(table)
      }
      None => Profile::empty(),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::{Duration, UNIX_EPOCH};

  use super::*;
  use crate::record::MAX_STACK_DEPTH;

  fn alloc_event(handle: AllocHandle, t_ns: u64, frame: usize) -> AllocationEvent {
    let mut stack = [0usize; MAX_STACK_DEPTH];
    stack[0] = frame;

    AllocationEvent {
      handle,
      depth: 1,
      stack,
      requested_size: 32,
      requested_alignment: 0,
      allocated_size: 32,
      allocation_time: UNIX_EPOCH + Duration::from_nanos(t_ns),
      weight: 33,
    }
  }

  fn free_event(t_ns: u64, cpu_id: i32, thread_id: u64, frame: usize) -> DeallocationEvent {
    let mut stack = [0usize; MAX_STACK_DEPTH];
    stack[0] = frame;

    DeallocationEvent {
      time: UNIX_EPOCH + Duration::from_nanos(t_ns),
      cpu_id,
      thread_id,
      depth: 1,
      stack,
    }
  }

  #[test]
  fn each_matched_pair_yields_exactly_one_table_entry() {
    let mut profiler = Profiler::new(ProfilerConfig::default());

    profiler.report_malloc(&alloc_event(7, 1_000, 0xa), 0, 100);
    profiler.report_free(7, &free_event(5_000, 0, 100, 0xf));

    let samples = profiler.stop().samples();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].count, 1);
    assert_eq!(samples[1].count, -1);
  }

  #[test]
  fn matching_consumes_the_in_flight_entry() {
    let mut profiler = Profiler::new(ProfilerConfig::default());

    profiler.report_malloc(&alloc_event(7, 1_000, 0xa), 0, 100);
    profiler.report_free(7, &free_event(5_000, 0, 100, 0xf));
    // The handle is gone; a second free is an orphan.
    profiler.report_free(7, &free_event(6_000, 0, 100, 0xf));

    let samples = profiler.stop().samples();
    assert_eq!(samples.len(), 2);
  }

  #[test]
  fn orphan_frees_are_dropped() {
    let mut profiler = Profiler::new(ProfilerConfig::default());

    profiler.report_free(99, &free_event(5_000, 0, 100, 0xf));

    assert!(profiler.stop().samples().is_empty());
  }

  #[test]
  fn reporting_a_handle_twice_overwrites_the_record() {
    let mut profiler = Profiler::new(ProfilerConfig::default());

    profiler.report_malloc(&alloc_event(7, 1_000, 0xa), 0, 100);

    let mut replacement = alloc_event(7, 2_000, 0xb);
    replacement.requested_size = 64;
    replacement.allocated_size = 64;
    replacement.weight = 65;
    profiler.report_malloc(&replacement, 0, 100);

    profiler.report_free(7, &free_event(5_000, 0, 100, 0xf));

    let samples = profiler.stop().samples();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].allocated_size, 64);
    assert_eq!(&samples[0].stack[..1], &[0xb]);
    // Lifetime measured from the overwriting report.
    assert_eq!(samples[0].lifetime_ns, 1_000);
  }

  #[test]
  fn stop_is_terminal() {
    let mut profiler = Profiler::new(ProfilerConfig::default());

    profiler.report_malloc(&alloc_event(7, 1_000, 0xa), 0, 100);
    profiler.report_free(7, &free_event(5_000, 0, 100, 0xf));

    assert_eq!(profiler.stop().samples().len(), 2);
    assert!(profiler.stop().samples().is_empty());
  }

  #[test]
  fn frees_after_stop_are_ignored() {
    let mut profiler = Profiler::new(ProfilerConfig::default());

    profiler.report_malloc(&alloc_event(7, 1_000, 0xa), 0, 100);
    let _ = profiler.stop();

    profiler.report_free(7, &free_event(5_000, 0, 100, 0xf));
  }
}
