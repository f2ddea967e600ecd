//! Stack headroom for the recursive parser and evaluator.

/// Remaining stack below which a new segment is allocated.
const RED_ZONE: usize = 128 * 1024;
/// Size of each segment allocated past the red zone.
const GROW_SIZE: usize = 4 * 1024 * 1024;

/// Runs `f`, switching to a fresh heap-allocated stack segment first when
/// the current one is nearly exhausted.
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, GROW_SIZE, f)
}
