use std::time::{Duration, SystemTime};

use hashbrown::hash_map::DefaultHashBuilder;
use hashbrown::HashMap;

use crate::arena::{ArenaAllocator, ArenaRef};
use crate::bucket::bucketize_lifetime_ns;
use crate::matching::{bucket_index, CpuThreadMatch, RpcMatch, ALL_MATCH_CASES, MATCH_BUCKETS};
use crate::profile::Sample;
use crate::record::SampleRecord;

/// Aggregation key: an (allocation, deallocation) record pair.
#[derive(Clone, Eq, Hash, PartialEq)]
struct PairKey {
  alloc: SampleRecord,
  dealloc: SampleRecord,
}

/// Running lifetime statistics for one matching bucket.
#[derive(Clone, Copy, Debug)]
struct BucketStats {
  count: f64,
  mean_ns: f64,
  /// Sum-of-squared-deviations accumulator for the standard deviation.
  variance_ns: f64,
  min_ns: f64,
  max_ns: f64,
}

impl Default for BucketStats {
  fn default() -> Self {
    Self {
      count: 0.0,
      mean_ns: 0.0,
      variance_ns: 0.0,
      min_ns: f64::INFINITY,
      max_ns: 0.0,
    }
  }
}

impl BucketStats {
  /// Welford-style single-pass update of the running mean and deviation
  /// accumulator.
  fn observe(&mut self, lifetime_ns: f64) {
    let old_mean_ns = self.mean_ns;
    self.mean_ns += (lifetime_ns - old_mean_ns) / (self.count + 1.0);
    self.variance_ns += (lifetime_ns - self.mean_ns) * (self.mean_ns - old_mean_ns);

    self.min_ns = self.min_ns.min(lifetime_ns);
    self.max_ns = self.max_ns.max(lifetime_ns);
    self.count += 1.0;
  }

  /// Population standard deviation; tiny negative accumulator drift is
  /// clamped to zero.
  fn stddev_ns(&self) -> f64 {
    (self.variance_ns / self.count).max(0.0).sqrt()
  }
}

fn signed_nanos_between(start: SystemTime, end: SystemTime) -> f64 {
  match end.duration_since(start) {
    Ok(elapsed) => elapsed.as_nanos() as f64,
    Err(err) => -(err.duration().as_nanos() as f64),
  }
}

/// Lifetime statistics aggregated over (allocation stack, deallocation
/// stack, size) pairs, bucketed by matching status. All storage lives in
/// the shared arena.
pub(crate) struct LifetimeTable {
  table: HashMap<PairKey, [BucketStats; MATCH_BUCKETS], DefaultHashBuilder, ArenaAllocator>,
  start_time: SystemTime,
  stop_time: Option<SystemTime>,
  // Declared last: the arena must outlive the map storage during drop.
  _arena: ArenaRef,
}

impl LifetimeTable {
  pub(crate) fn new() -> Self {
    let arena = ArenaRef::new();

    Self {
      table: HashMap::with_hasher_in(DefaultHashBuilder::default(), ArenaAllocator),
      start_time: SystemTime::now(),
      stop_time: None,
      _arena: arena,
    }
  }

  /// Folds one matched allocation/deallocation pair into the table.
  pub(crate) fn add_trace(&mut self, alloc: &SampleRecord, dealloc: &SampleRecord) {
    let status = CpuThreadMatch::new(
      alloc.cpu_id == dealloc.cpu_id,
      alloc.thread_id == dealloc.thread_id,
    );
    // RPC ids are not plumbed through the event path.
    let rpc = RpcMatch::from_ids(0, 0);
    let index = bucket_index(status, rpc);

    let lifetime_ns = signed_nanos_between(alloc.creation_time, dealloc.creation_time);

    let slots = self
      .table
      .entry(PairKey {
        alloc: alloc.clone(),
        dealloc: dealloc.clone(),
      })
      .or_insert_with(|| [BucketStats::default(); MATCH_BUCKETS]);

    slots[index].observe(lifetime_ns);
  }

  /// Visits two samples per populated bucket: one for the allocation site
  /// with a positive count, one for the deallocation site with the count
  /// negated. The two share a `profile_id`; pair ids are stable only within
  /// a single iteration.
  pub(crate) fn iterate<F: FnMut(&Sample)>(&self, mut visit: F) {
    let mut pair_id = 1u64;

    for (key, slots) in &self.table {
      let allocated_size = key.alloc.allocated_size;

      for (status, rpc) in ALL_MATCH_CASES {
        let slot = &slots[bucket_index(status, rpc)];
        if slot.count == 0.0 {
          continue;
        }

        // Scale the observation count up to whole objects represented by
        // the sample weight.
        let bytes = (slot.count * key.alloc.weight * allocated_size as f64).round();
        let count = object_count(bytes, allocated_size);
        let sum = count * allocated_size as i64;

        let mut sample = Sample {
          sum,
          count,
          requested_size: key.alloc.requested_size,
          requested_alignment: key.alloc.requested_alignment,
          allocated_size,
          profile_id: pair_id,
          lifetime_ns: bucketize_lifetime_ns(slot.mean_ns),
          stddev_lifetime_ns: bucketize_lifetime_ns(slot.stddev_ns()),
          min_lifetime_ns: bucketize_lifetime_ns(slot.min_ns),
          max_lifetime_ns: bucketize_lifetime_ns(slot.max_ns),
          allocator_deallocator_cpu_matched: status.cpu_matched,
          allocator_deallocator_thread_matched: status.thread_matched,
          depth: key.alloc.depth,
          stack: key.alloc.stack,
        };
        visit(&sample);

        sample.count = -count;
        sample.depth = key.dealloc.depth;
        sample.stack = key.dealloc.stack;
        visit(&sample);

        pair_id += 1;
      }
    }
  }

  pub(crate) fn set_stop_time(&mut self) {
    self.stop_time = Some(SystemTime::now());
  }

  /// Wall-clock span covered by this table; zero until the stop time is
  /// recorded.
  pub(crate) fn duration(&self) -> Duration {
    match self.stop_time {
      Some(stop) => stop.duration_since(self.start_time).unwrap_or_default(),
      None => Duration::ZERO,
    }
  }

  #[cfg(test)]
  fn entries(&self) -> usize {
    self.table.len()
  }
}

fn object_count(bytes: f64, allocated_size: usize) -> i64 {
  let bytes = bytes as u64;
  let size = allocated_size.max(1) as u64;

  bytes.div_ceil(size).max(1) as i64
}
