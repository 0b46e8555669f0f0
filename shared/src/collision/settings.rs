/*!
Geometric tolerances used by the broad- and narrow-phase helpers.

These are world-space tolerances, not tuning knobs for navigation behavior. The
autopilot's tunable parameters live in its `NavSettings`.

Notes
- Distances are in meters.
- Favor practical world-space tolerances over machine epsilon; vehicle positions
  can be tens of kilometers from the origin.
*/

/// Practical small distance for comparisons (meters).
pub const DIST_EPS: f32 = 1.0e-4;

/// Minimum squared displacement for a sweep to be meaningful (m^2).
/// Shorter sweeps are treated as "already there" and never obstructed.
pub const MIN_MOVE_SQ: f32 = 1.0e-4;

/// Margin added around swept boxes so bodies touching the sweep are still returned
/// by the broad phase (meters).
pub const SWEEP_MARGIN: f32 = 1.0;

/// Spacing between consecutive spheres in a capsule sphere walk, as a fraction of
/// the capsule radius. Values below 1 make consecutive spheres overlap so the walk
/// covers the whole capsule.
pub const SPHERE_STEP_FRACTION: f32 = 0.9;

/// Upper bound on spheres produced for one capsule walk.
pub const MAX_SPHERE_STEPS: u32 = 4096;

/// Number of samples per unit of the silhouette direction when quantizing a
/// direction into a cache key. 20 means directions closer than ~3 degrees share a key.
pub const DIRECTION_KEY_RESOLUTION: f32 = 20.0;
