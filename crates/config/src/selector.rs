#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Highest total score a device can earn.
pub const MAX_TOTAL_SCORE: u32 = 100;

/// Upper bound (inclusive) of a metric range and the points it earns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Band {
    pub max: f64,
    pub points: u32,
}

impl Band {
    pub const fn new(max: f64, points: u32) -> Self {
        Self { max, points }
    }
}

/// Piecewise score table. A value earns the points of the first band whose
/// `max` is not below it, and nothing past the last band.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct BandTable(Vec<Band>);

impl BandTable {
    pub fn new(bands: impl Into<Vec<Band>>) -> Self {
        Self(bands.into())
    }

    pub fn points(&self, value: f64) -> u32 {
        self.0
            .iter()
            .find(|band| value <= band.max)
            .map_or(0, |band| band.points)
    }

    /// Best score the table can award.
    pub fn ceiling(&self) -> u32 {
        self.0.iter().map(|band| band.points).max().unwrap_or(0)
    }

    pub fn bands(&self) -> &[Band] {
        &self.0
    }

    pub fn is_ascending(&self) -> bool {
        self.0.windows(2).all(|pair| pair[0].max < pair[1].max)
            && self.0.iter().all(|band| band.max.is_finite())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectorConfig {
    /// CPU usage percentage.
    pub cpu: BandTable,
    /// Memory usage percentage.
    pub memory: BandTable,
    /// GPU usage percentage.
    pub gpu: BandTable,
    /// Network latency in milliseconds.
    pub latency_ms: BandTable,
    /// Tasks currently running on the device.
    pub queue_depth: BandTable,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            cpu: BandTable::new([Band::new(50.0, 30), Band::new(70.0, 20), Band::new(85.0, 10)]),
            memory: BandTable::new([Band::new(60.0, 25), Band::new(80.0, 15), Band::new(90.0, 5)]),
            gpu: BandTable::new([Band::new(60.0, 25), Band::new(80.0, 15), Band::new(95.0, 5)]),
            latency_ms: BandTable::new([
                Band::new(10.0, 10),
                Band::new(50.0, 8),
                Band::new(100.0, 5),
                Band::new(200.0, 2),
            ]),
            queue_depth: BandTable::new([
                Band::new(2.0, 10),
                Band::new(5.0, 7),
                Band::new(8.0, 4),
                Band::new(10.0, 2),
            ]),
        }
    }
}

impl SelectorConfig {
    pub fn tables(&self) -> [(&'static str, &BandTable); 5] {
        [
            ("cpu", &self.cpu),
            ("memory", &self.memory),
            ("gpu", &self.gpu),
            ("latency_ms", &self.latency_ms),
            ("queue_depth", &self.queue_depth),
        ]
    }

    /// Score of a device with no load at all.
    pub fn max_score(&self) -> u32 {
        self.tables().iter().map(|(_, table)| table.ceiling()).sum()
    }
}
