// Time signature and loop descriptor for a sequence
// Holds the bar grid (nominator/denominator/numBars) and the normalised
// loop range used by the playback engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalised interval inside [0, 1], used for the loop range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalisedRange {
    start: f64,
    end: f64,
}

impl NormalisedRange {
    pub fn new(start: f64, end: f64) -> Self {
        let start = start.clamp(0.0, 1.0);
        let end = end.clamp(start, 1.0);
        Self { start, end }
    }

    pub fn full() -> Self {
        Self {
            start: 0.0,
            end: 1.0,
        }
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.start && value < self.end
    }

    pub fn set_start(&mut self, start: f64) {
        self.start = start.clamp(0.0, self.end);
    }

    pub fn set_end(&mut self, end: f64) {
        self.end = end.clamp(self.start, 1.0);
    }
}

impl Default for NormalisedRange {
    fn default() -> Self {
        Self::full()
    }
}

/// Time signature of a sequence.
///
/// `num_bars == 0.0` means no explicit length was set and the sequence
/// length derives from its content instead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub nominator: f64,
    pub denominator: f64,
    pub num_bars: f64,
    pub normalised_loop_range: NormalisedRange,
}

impl TimeSignature {
    pub fn new(nominator: f64, denominator: f64) -> Self {
        Self {
            nominator,
            denominator,
            num_bars: 0.0,
            normalised_loop_range: NormalisedRange::full(),
        }
    }

    /// Quarter notes per bar. 4/4 = 4 quarters, 6/8 = 3 quarters.
    pub fn quarters_per_bar(&self) -> f64 {
        self.nominator * 4.0 / self.denominator
    }

    /// Total length in quarter notes, derived from the bar count.
    pub fn num_quarters(&self) -> f64 {
        self.num_bars * self.quarters_per_bar()
    }

    /// Derive the bar count from a length in quarter notes, rounded up
    /// to whole bars so content ending mid-bar loops on a bar boundary.
    pub fn calculate_num_bars(&mut self, length_in_quarters: f64) {
        let per_bar = self.quarters_per_bar();

        if per_bar > 0.0 && length_in_quarters > 0.0 {
            self.num_bars = (length_in_quarters / per_bar).ceil();
        } else {
            self.num_bars = 0.0;
        }
    }

    pub fn set_loop_start(&mut self, start: f64) {
        self.normalised_loop_range.set_start(start);
    }

    pub fn set_loop_end(&mut self, end: f64) {
        self.normalised_loop_range.set_end(end);
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4.0, 4.0)
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.nominator, self.denominator)
    }
}
