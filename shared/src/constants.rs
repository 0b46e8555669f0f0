/// Simulation ticks per second of the host physics engine.
pub const TICKS_PER_SECOND: u32 = 60;

/// Duration of a single simulation tick in seconds.
pub const TICK_SECONDS: f32 = 1.0 / TICKS_PER_SECOND as f32;

/// Standard gravity in meters per second squared. Gravity fields are sampled as
/// multiples of this value.
pub const STANDARD_GRAVITY: f32 = 9.81;

/// Convert a tick count to seconds.
#[inline]
pub fn ticks_to_seconds(ticks: u64) -> f32 {
    ticks as f32 * TICK_SECONDS
}
