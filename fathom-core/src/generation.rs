//! Synthetic reading generators.
//!
//! Every function takes the random source explicitly so callers can use
//! `rand::rng()` in production and a seeded `StdRng` in tests.

use chrono::Utc;
use rand::seq::{index, IndexedRandom};
use rand::Rng;
use uuid::Uuid;

use crate::sensor::{Coordinates, DetectedFish, SensorId};

/// Species a sensor can report.
pub const SPECIES_CATALOG: [&str; 6] = [
    "Atlantic Cod",
    "Sailfish",
    "Tuna",
    "Salmon",
    "Marlin",
    "Barracuda",
];

/// Output intervals (seconds) assigned at bootstrap.
pub const OUTPUT_RATES: [u32; 5] = [5, 10, 15, 20, 25];

/// Maximum transparency change per tick.
pub const TRANSPARENCY_STEP: u8 = 10;

/// Maximum individuals reported for one species in one tick.
pub const MAX_FISH_COUNT: u32 = 20;

/// Round to three decimal places.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Lowest temperature a sensor at `depth` may report.
pub fn temperature_floor(depth: f64) -> f64 {
    2.0 + depth.abs() * 3.0
}

/// Next temperature for a sensor at `depth`.
///
/// A base in `[2, 4)` plus `3 * |depth|`, rounded to three decimals.
pub fn next_temperature<R: Rng + ?Sized>(depth: f64, rng: &mut R) -> f64 {
    let base = (rng.random::<f64>() + 1.0) * 2.0;
    round3(base + depth.abs() * 3.0)
}

/// Next transparency, uniform in `[previous - 10, previous + 10]` clamped to `0..=100`.
pub fn next_transparency<R: Rng + ?Sized>(previous: u8, rng: &mut R) -> u8 {
    let previous = previous.min(100);
    let low = previous.saturating_sub(TRANSPARENCY_STEP);
    let high = previous.saturating_add(TRANSPARENCY_STEP).min(100);
    rng.random_range(low..=high)
}

/// Sample a distinct subset of `catalog` with a count per species.
///
/// The subset size is uniform in `0..catalog.len()`, so an empty result is
/// possible and the full catalog never is.
pub fn next_detected_fish<S, R>(sensor_id: SensorId, catalog: &[S], rng: &mut R) -> Vec<DetectedFish>
where
    S: AsRef<str>,
    R: Rng + ?Sized,
{
    if catalog.is_empty() {
        return Vec::new();
    }

    let amount = rng.random_range(0..catalog.len());
    let now = Utc::now();

    index::sample(rng, catalog.len(), amount)
        .into_iter()
        .map(|i| DetectedFish {
            id: Uuid::now_v7(),
            sensor_id,
            name: catalog[i].as_ref().to_string(),
            count: rng.random_range(1..=MAX_FISH_COUNT),
            created_at: now,
        })
        .collect()
}

/// Jittered position for a sensor of the group at `group_index`.
///
/// Base x/y are in `[-10, 10)`, base z in `[-10, 0)`. Each axis gets an
/// offset of up to `0.1 * group_index` either way; depth stays non-positive.
pub fn bootstrap_coordinates<R: Rng + ?Sized>(group_index: usize, rng: &mut R) -> Coordinates {
    let spread = group_index as f64 * 0.1;
    let jitter = |rng: &mut R| {
        if spread > 0.0 {
            rng.random_range(-spread..spread)
        } else {
            0.0
        }
    };

    let x = rng.random_range(-10.0..10.0) + jitter(rng);
    let y = rng.random_range(-10.0..10.0) + jitter(rng);
    let z = (rng.random_range(-10.0..0.0) + jitter(rng)).min(0.0);

    Coordinates::new(x, y, z)
}

/// Initial transparency, uniform in `0..=100`.
pub fn initial_transparency<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    rng.random_range(0..=100)
}

/// One of [`OUTPUT_RATES`].
pub fn pick_output_rate<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    OUTPUT_RATES.choose(rng).copied().unwrap_or(OUTPUT_RATES[0])
}
