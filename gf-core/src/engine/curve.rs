//! Fan curve model
//!
//! An ordered set of control points mapping temperature to fan speed.
//!
//! # Invariants
//!
//! - Points are sorted by ascending temperature.
//! - No two points share a temperature.
//! - Every mutation restores both before returning, and shared access goes
//!   through [`SharedCurve`] so readers never observe a half-applied edit.

use parking_lot::RwLock;
use std::str::FromStr;
use std::sync::Arc;

use gf_error::GpufanError;

use crate::constants::{curve as curve_const, presets};
use crate::data::ControlPoint;
use crate::error::Result;

/// Temperature → fan speed response curve
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Curve {
    points: Vec<ControlPoint>,
}

impl Curve {
    /// Build a curve from arbitrary points.
    ///
    /// Points are sorted; on duplicate temperatures the last one wins.
    /// Fan speeds above 100% are capped.
    pub fn new(points: impl IntoIterator<Item = ControlPoint>) -> Self {
        let mut curve = Self { points: Vec::new() };
        for point in points {
            curve.upsert(ControlPoint::new(
                point.temperature,
                point.fan_speed.min(curve_const::MAX_FAN),
            ));
        }
        curve
    }

    pub fn points(&self) -> &[ControlPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Fan speed for `temperature`.
    ///
    /// - At or below the first point: that point's speed
    /// - At or above the last point: that point's speed
    /// - Between points: linear interpolation, truncated toward zero
    pub fn interpolate(&self, temperature: i32) -> Result<u8> {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(GpufanError::EmptyCurve),
        };

        if temperature <= first.temperature {
            return Ok(first.fan_speed);
        }
        if temperature >= last.temperature {
            return Ok(last.fan_speed);
        }

        for window in self.points.windows(2) {
            let (lower, upper) = (&window[0], &window[1]);
            if temperature >= lower.temperature && temperature <= upper.temperature {
                let ratio = (temperature - lower.temperature) as f64
                    / (upper.temperature - lower.temperature) as f64;
                let fan_range = upper.fan_speed as f64 - lower.fan_speed as f64;
                return Ok((lower.fan_speed as f64 + ratio * fan_range) as u8);
            }
        }

        // Unreachable while the ordering invariant holds
        Ok(last.fan_speed)
    }

    /// Set the fan speed at `temperature`, inserting a point if none exists there.
    ///
    /// Both values are clamped to the curve domain. Returns the point's index.
    pub fn add_or_update_point(&mut self, temperature: i32, fan_speed: u8) -> usize {
        self.upsert(ControlPoint::new(temperature, fan_speed).clamped())
    }

    /// Move the point at `index` to a new position.
    ///
    /// Values are clamped to the curve domain. The edit is rejected (curve
    /// unchanged, `None` returned) if `index` is out of range or the new
    /// temperature belongs to a different point. On success the curve is
    /// re-sorted and the point's new index is returned.
    pub fn move_point(&mut self, index: usize, temperature: i32, fan_speed: u8) -> Option<usize> {
        if index >= self.points.len() {
            return None;
        }
        let target = ControlPoint::new(temperature, fan_speed).clamped();

        let collides = self
            .points
            .iter()
            .enumerate()
            .any(|(i, p)| i != index && p.temperature == target.temperature);
        if collides {
            return None;
        }

        self.points[index] = target;
        self.points.sort_by_key(|p| p.temperature);
        self.points.iter().position(|p| *p == target)
    }

    /// Remove the point at `temperature`. Absent points are ignored.
    pub fn remove_point(&mut self, temperature: i32) -> bool {
        let before = self.points.len();
        self.points.retain(|p| p.temperature != temperature);
        self.points.len() != before
    }

    pub fn remove_at(&mut self, index: usize) -> Option<ControlPoint> {
        (index < self.points.len()).then(|| self.points.remove(index))
    }

    /// Index of the point closest to `temperature`
    pub fn nearest_index(&self, temperature: i32) -> Option<usize> {
        self.points
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| (p.temperature - temperature).abs())
            .map(|(i, _)| i)
    }

    fn upsert(&mut self, point: ControlPoint) -> usize {
        match self
            .points
            .binary_search_by_key(&point.temperature, |p| p.temperature)
        {
            Ok(i) => {
                self.points[i].fan_speed = point.fan_speed;
                i
            }
            Err(i) => {
                self.points.insert(i, point);
                i
            }
        }
    }
}

/// Built-in curves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CurvePreset {
    #[default]
    Default,
    Silent,
    Performance,
}

impl CurvePreset {
    pub const ALL: [CurvePreset; 3] = [
        CurvePreset::Default,
        CurvePreset::Silent,
        CurvePreset::Performance,
    ];

    /// Get the curve points for this preset
    pub fn points(&self) -> Vec<ControlPoint> {
        let table: &[(i32, u8)] = match self {
            CurvePreset::Default => &presets::DEFAULT,
            CurvePreset::Silent => &presets::SILENT,
            CurvePreset::Performance => &presets::PERFORMANCE,
        };
        table.iter().copied().map(ControlPoint::from).collect()
    }

    pub fn to_curve(&self) -> Curve {
        Curve::new(self.points())
    }

    pub fn name(&self) -> &'static str {
        match self {
            CurvePreset::Default => "default",
            CurvePreset::Silent => "silent",
            CurvePreset::Performance => "performance",
        }
    }
}

impl std::fmt::Display for CurvePreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CurvePreset {
    type Err = GpufanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        CurvePreset::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| {
                GpufanError::invalid_config("preset", format!("unknown preset '{}'", s))
            })
    }
}

/// The active curve, shared between the monitor task and editors
#[derive(Debug, Clone, Default)]
pub struct SharedCurve {
    inner: Arc<RwLock<Curve>>,
}

impl SharedCurve {
    pub fn new(curve: Curve) -> Self {
        Self {
            inner: Arc::new(RwLock::new(curve)),
        }
    }

    pub fn interpolate(&self, temperature: i32) -> Result<u8> {
        self.inner.read().interpolate(temperature)
    }

    /// Copy of the current points
    pub fn points(&self) -> Vec<ControlPoint> {
        self.inner.read().points().to_vec()
    }

    pub fn snapshot(&self) -> Curve {
        self.inner.read().clone()
    }

    /// Apply an edit under the write lock
    pub fn edit<R>(&self, f: impl FnOnce(&mut Curve) -> R) -> R {
        f(&mut self.inner.write())
    }

    /// Swap in a whole new curve
    pub fn replace(&self, curve: Curve) {
        *self.inner.write() = curve;
    }
}
