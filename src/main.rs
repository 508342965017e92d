use lifetrace::{AllocationEvent, ProfilerRegistry};

fn main() {
  env_logger::init();

  let registry = ProfilerRegistry::new();
  let profiler = registry.start_profiler();

  let sizes = [24usize, 24, 96, 4096];
  for (handle, size) in sizes.iter().enumerate() {
    let event =
      AllocationEvent::capture(handle as u64, *size, 0, size.next_power_of_two(), 8 * 1024);
    registry.report_malloc(&event);
  }
  for handle in 0..sizes.len() as u64 {
    registry.report_free(handle);
  }

  let profile = profiler.stop();

  println!("=== demo lifetime profile ({:?}) ===", profile.kind());
  println!("duration: {:?}", profile.duration());
  profile.iterate(|sample| {
    println!(
      "id={} count={:+} sum={}B allocated={}B lifetime={}ns stddev={}ns \
       cpu_matched={} thread_matched={} depth={}",
      sample.profile_id,
      sample.count,
      sample.sum,
      sample.allocated_size,
      sample.lifetime_ns,
      sample.stddev_lifetime_ns,
      sample.allocator_deallocator_cpu_matched,
      sample.allocator_deallocator_thread_matched,
      sample.depth,
    );
  });
}
