/// Quantizes an object lifetime in nanoseconds into a coarse bucket.
///
/// Lifetimes at or below 1ns are reported as 1ns; even a tight
/// allocate/free loop takes several nanoseconds, so smaller values indicate
/// clock skew in the underlying timestamps. Lifetimes between 1ns and 1ms
/// are rounded down to the next smaller power of ten, and lifetimes above
/// 1ms are rounded down to a whole number of milliseconds.
#[must_use]
pub fn bucketize_lifetime_ns(lifetime_ns: f64) -> u64 {
  const MILLISECOND_NS: f64 = 1_000_000.0;

  if lifetime_ns < MILLISECOND_NS {
    if lifetime_ns <= 1.0 {
      return 1;
    }

    let mut cutoff_ns = 10u64;
    while cutoff_ns <= 1_000_000 {
      if lifetime_ns < cutoff_ns as f64 {
        return cutoff_ns / 10;
      }
      cutoff_ns *= 10;
    }
  }

  (lifetime_ns / MILLISECOND_NS) as u64 * 1_000_000
}
