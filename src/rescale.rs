//! Linear mapping between stored `u16` values and physical `f32` values.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{FACTOR, OFFSET, OFFSET_ATTRIBUTE, SCALE_ATTRIBUTE};

/// `value = raw * scale + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rescale {
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

impl Rescale {
    pub fn new(scale: f64, offset: f64) -> Self {
        Self { scale, offset }
    }

    /// The identity mapping.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0)
    }

    /// The fixed convention used by hyperspectral stores that carry no
    /// rescale attributes.
    pub fn hyperspectral_default() -> Self {
        Self::new(1.0 / FACTOR, -OFFSET)
    }

    /// Read `scale_factor` / `add_offset` from array attributes.
    ///
    /// Returns `None` unless `scale_factor` is present. A missing
    /// `add_offset` means zero.
    pub fn from_attributes(attributes: &Map<String, Value>) -> Option<Self> {
        let scale = attributes.get(SCALE_ATTRIBUTE).and_then(Value::as_f64)?;
        let offset = attributes
            .get(OFFSET_ATTRIBUTE)
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        Some(Self::new(scale, offset))
    }

    /// Pick the mapping for an array: an explicit override wins, then the
    /// array's own attributes, then the hyperspectral convention.
    pub fn resolve(explicit: Option<Rescale>, attributes: &Map<String, Value>) -> Self {
        if let Some(rescale) = explicit {
            log::debug!("Using explicit rescale {:?}", rescale);
            return rescale;
        }
        if let Some(rescale) = Self::from_attributes(attributes) {
            log::debug!("Using rescale from attributes {:?}", rescale);
            return rescale;
        }
        let rescale = Self::hyperspectral_default();
        log::debug!("No rescale attributes, using convention {:?}", rescale);
        rescale
    }

    /// Map a stored value to its physical value.
    #[inline]
    pub fn apply(&self, raw: u16) -> f32 {
        (f64::from(raw) * self.scale + self.offset) as f32
    }

    /// Map a physical value to the nearest stored value.
    ///
    /// Out-of-range values saturate; NaN and infinities map to 0.
    #[inline]
    pub fn quantize(&self, value: f32) -> u16 {
        if !value.is_finite() {
            return 0;
        }
        let raw = ((f64::from(value) - self.offset) / self.scale).round();
        raw.clamp(0.0, f64::from(u16::MAX)) as u16
    }

    /// Largest difference a quantize/apply round trip can introduce for
    /// in-range values.
    pub fn precision(&self) -> f64 {
        self.scale.abs() / 2.0
    }
}

impl Default for Rescale {
    fn default() -> Self {
        Self::hyperspectral_default()
    }
}
