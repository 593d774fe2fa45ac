// Time conversion - samples, ticks, seconds
// Every conversion goes through the tempo-derived samples-per-quarter rate

/// Tick resolution for all stored sequence timestamps (PPQN).
pub const TICKS_PER_QUARTER: f64 = 960.0;

/// Number of samples covering one quarter note at the given tempo.
pub fn samples_per_quarter(bpm: f64, sample_rate: f64) -> f64 {
    sample_rate * 60.0 / bpm
}

/// Convert a sample count to seconds.
pub fn samples_to_seconds(samples: f64, sample_rate: f64) -> f64 {
    samples / sample_rate
}

/// Convert seconds to a sample count.
pub fn seconds_to_samples(seconds: f64, sample_rate: f64) -> f64 {
    seconds * sample_rate
}

/// Convert a sample count to ticks at the given tempo.
pub fn samples_to_ticks(samples: f64, bpm: f64, sample_rate: f64) -> f64 {
    TICKS_PER_QUARTER * samples / samples_per_quarter(bpm, sample_rate)
}

/// Convert ticks to a sample count at the given tempo.
pub fn ticks_to_samples(ticks: f64, bpm: f64, sample_rate: f64) -> f64 {
    samples_per_quarter(bpm, sample_rate) * ticks / TICKS_PER_QUARTER
}

/// Convert seconds to ticks at the given tempo.
pub fn seconds_to_ticks(seconds: f64, bpm: f64, sample_rate: f64) -> f64 {
    samples_to_ticks(seconds_to_samples(seconds, sample_rate), bpm, sample_rate)
}

/// Tick advance per processed sample, used by the per-block driver.
pub fn ticks_per_sample(bpm: f64, sample_rate: f64) -> f64 {
    samples_to_ticks(1.0, bpm, sample_rate)
}
