use std::time::Duration;

use crate::record::MAX_STACK_DEPTH;
use crate::table::LifetimeTable;

/// What a [`Profile`] contains.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProfileKind {
  /// Object lifetime statistics for matched allocation/deallocation pairs.
  Lifetimes,
}

/// One aggregated profile entry.
///
/// Samples come in pairs sharing a `profile_id`: a positive `count` tags
/// the allocation site, the negated count tags the deallocation site. All
/// lifetime fields are bucketized.
#[derive(Clone, Debug)]
pub struct Sample {
  /// Total bytes represented, always `count * allocated_size`.
  pub sum: i64,
  pub count: i64,
  pub requested_size: usize,
  pub requested_alignment: usize,
  pub allocated_size: usize,
  /// Shared by the two samples of one pair; stable only within a single
  /// iteration.
  pub profile_id: u64,
  pub lifetime_ns: u64,
  pub stddev_lifetime_ns: u64,
  pub min_lifetime_ns: u64,
  pub max_lifetime_ns: u64,
  pub allocator_deallocator_cpu_matched: bool,
  pub allocator_deallocator_thread_matched: bool,
  /// Number of valid entries in `stack`.
  pub depth: usize,
  pub stack: [usize; MAX_STACK_DEPTH],
}

impl Sample {
  /// Instruction pointers of the reported call stack.
  #[must_use]
  pub fn frames(&self) -> &[usize] {
    &self.stack[..self.depth]
  }
}

/// Immutable lifetime profile detached from the profiler that produced it.
///
/// The profile owns its aggregation storage and an arena reference of its
/// own, so it stays readable after the profiler, its guard and the registry
/// are gone.
pub struct Profile {
  table: Option<LifetimeTable>,
}

impl Profile {
  pub(crate) fn empty() -> Self {
    Self { table: None }
  }

  pub(crate) fn from_table(table: LifetimeTable) -> Self {
    Self { table: Some(table) }
  }

  /// Visits every emitted sample.
  pub fn iterate<F: FnMut(&Sample)>(&self, visit: F) {
    if let Some(table) = &self.table {
      table.iterate(visit);
    }
  }

  /// Collects every emitted sample into a vector.
  #[must_use]
  pub fn samples(&self) -> Vec<Sample> {
    let mut samples = Vec::new();
    self.iterate(|sample| samples.push(sample.clone()));
    samples
  }

  #[must_use]
  pub fn kind(&self) -> ProfileKind {
    ProfileKind::Lifetimes
  }

  /// Wall-clock span between profiler start and stop; zero for an empty
  /// profile.
  #[must_use]
  pub fn duration(&self) -> Duration {
    self.table.as_ref().map_or(Duration::ZERO, LifetimeTable::duration)
  }
}
