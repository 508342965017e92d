use std::alloc::Layout;
use std::ptr::NonNull;

use allocator_api2::alloc::{AllocError, Allocator};
use memmap2::MmapMut;
use spin::Mutex;

/// Fresh mappings are requested in chunks of this many bytes; oversized
/// requests get a dedicated mapping.
const CHUNK_BYTES: usize = 256 * 1024;

/// One anonymous mapping, filled front to back.
struct Chunk {
  map: MmapMut,
  used: usize,
}

impl Chunk {
  fn bump(&mut self, layout: Layout) -> Option<NonNull<[u8]>> {
    let base = self.map.as_mut_ptr();
    // SAFETY: used never exceeds the mapping length.
    let cursor = unsafe { base.add(self.used) };
    let start = self.used.checked_add(cursor.align_offset(layout.align()))?;
    let end = start.checked_add(layout.size())?;

    if end > self.map.len() {
      return None;
    }

    self.used = end;

    // SAFETY: start..end lies within the mapping and start is aligned.
    let thin = NonNull::new(unsafe { base.add(start) })?;
    Some(NonNull::slice_from_raw_parts(thin, layout.size()))
  }
}

/// Bump arena over anonymous mappings. Individual deallocations are no-ops;
/// all backing storage is released at once when the arena is destroyed.
struct Arena {
  chunks: Vec<Chunk>,
}

impl Arena {
  fn new() -> Self {
    Self { chunks: Vec::new() }
  }

  fn allocate(&mut self, layout: Layout) -> NonNull<[u8]> {
    if let Some(chunk) = self.chunks.last_mut() {
      if let Some(ptr) = chunk.bump(layout) {
        return ptr;
      }
    }

    let len = layout
      .size()
      .saturating_add(layout.align())
      .max(CHUNK_BYTES);
    let map = match MmapMut::map_anon(len) {
      Ok(map) => map,
      Err(err) => {
        // Partial backing storage would poison every table built on it.
        log::error!("lifetime profiler arena mapping of {len} bytes failed: {err}");
        std::process::abort();
      }
    };

    let mut chunk = Chunk { map, used: 0 };
    let ptr = chunk.bump(layout);
    self.chunks.push(chunk);

    match ptr {
      Some(ptr) => ptr,
      None => unreachable!("fresh {len}-byte chunk rejected {layout:?}"),
    }
  }
}

/// Process-wide arena and its reference count, both guarded by one lock.
struct ArenaCell {
  refcount: u32,
  arena: Option<Arena>,
}

impl ArenaCell {
  const fn new() -> Self {
    Self {
      refcount: 0,
      arena: None,
    }
  }

  fn acquire(&mut self) {
    if self.refcount == 0 {
      assert!(self.arena.is_none(), "arena present with zero references");
      self.arena = Some(Arena::new());
      log::debug!("created lifetime profiler arena");
    }

    self.refcount += 1;
  }

  fn release(&mut self) {
    assert!(self.refcount > 0, "arena reference released twice");
    self.refcount -= 1;

    if self.refcount == 0 {
      assert!(self.arena.take().is_some(), "arena missing at teardown");
      log::debug!("destroyed lifetime profiler arena");
    }
  }
}

static ARENA: Mutex<ArenaCell> = Mutex::new(ArenaCell::new());

/// Guard that keeps the process-wide arena alive. The arena is created when
/// the reference count rises from zero and destroyed when it drops back to
/// zero, so teardown order follows reference drops.
#[derive(Debug)]
pub(crate) struct ArenaRef(());

impl ArenaRef {
  pub(crate) fn new() -> Self {
    ARENA.lock().acquire();
    Self(())
  }
}

impl Drop for ArenaRef {
  fn drop(&mut self) {
    ARENA.lock().release();
  }
}

/// Routes container storage into the process-wide arena, so the profiler
/// never re-enters the allocator under observation while handling an event.
///
/// A live [`ArenaRef`] must be held for as long as any allocation made
/// through this handle is in use.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ArenaAllocator;

unsafe impl Allocator for ArenaAllocator {
  fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
    if layout.size() == 0 {
      let dangling = NonNull::new(layout.align() as *mut u8).ok_or(AllocError)?;
      return Ok(NonNull::slice_from_raw_parts(dangling, 0));
    }

    let mut cell = ARENA.lock();
    let arena = cell
      .arena
      .as_mut()
      .expect("arena allocator used without a live arena reference");
    Ok(arena.allocate(layout))
  }

  unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
    // Region semantics: storage is reclaimed when the arena is destroyed.
  }
}
