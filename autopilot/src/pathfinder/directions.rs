use std::sync::OnceLock;

use shared::Vec3;

/// Number of fixed short-hop directions.
pub const HOP_DIRECTION_COUNT: usize = 25;

static HOP_DIRECTIONS: OnceLock<[Vec3; HOP_DIRECTION_COUNT]> = OnceLock::new();

/// Roughly evenly spread unit directions (a Fibonacci sphere), computed once.
///
/// Ordered top, bottom, second from top, second from bottom and so on, so any
/// prefix of the list covers both hemispheres.
pub fn hop_directions() -> &'static [Vec3; HOP_DIRECTION_COUNT] {
    HOP_DIRECTIONS.get_or_init(|| {
        let golden_angle = std::f32::consts::PI * (3.0 - 5.0_f32.sqrt());
        let n = HOP_DIRECTION_COUNT as f32;
        let sphere: [Vec3; HOP_DIRECTION_COUNT] = std::array::from_fn(|i| {
            let y = 1.0 - 2.0 * (i as f32 + 0.5) / n;
            let r = (1.0 - y * y).max(0.0).sqrt();
            let theta = golden_angle * i as f32;
            Vec3::new(r * theta.cos(), y, r * theta.sin())
        });
        std::array::from_fn(|i| {
            let k = i / 2;
            if i % 2 == 0 {
                sphere[k]
            } else {
                sphere[HOP_DIRECTION_COUNT - 1 - k]
            }
        })
    })
}
