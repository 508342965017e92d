//! Sampling deallocation lifetime profiler.
//!
//! Pairs each sampled allocation reported by a host allocator with its
//! eventual free and aggregates object-lifetime statistics keyed by the
//! allocation and deallocation call stacks. Profilers register with a
//! process-wide [`ProfilerRegistry`] that fans out every sampled event;
//! stopping a profiler detaches an immutable [`Profile`] that stays
//! readable after the profiler is gone.
//!
//! The profiler's own containers are backed by a refcounted arena over
//! anonymous mappings, so handling an event never re-enters the allocator
//! under observation.

mod arena;
mod bucket;
mod config;
mod matching;
mod platform;
mod profile;
mod profiler;
mod record;
mod registry;
mod table;

pub use {
  bucket::bucketize_lifetime_ns,
  config::ProfilerConfig,
  platform::capture_stack,
  profile::{Profile, ProfileKind, Sample},
  record::{AllocHandle, AllocationEvent, MAX_STACK_DEPTH},
  registry::{ProfilerGuard, ProfilerRegistry},
};
