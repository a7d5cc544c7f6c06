/// Blocks whose parent is still unknown wait here; oldest evicted first.
pub const ORPHAN_CACHE_CAPACITY: usize = 64;

/// How far the header chain may run ahead of the body chain.
pub const MAX_HEADER_AHEAD: u32 = 2_000;

/// Pool entries re-verified against the fresh snapshot after each persist.
pub const REVERIFY_BATCH: usize = 10_000;

/// Node event fan-out capacity; lagging observers lose events, they never
/// stall the emitter.
pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;
