//! Core identifier types shared across the sorting subsystem.
//!
//! Parcels, chutes and diverters are all identified by small numeric ids
//! assigned by the line controller. The newtypes exist to keep the three id
//! spaces from being mixed up at call sites; they are `Copy` and format as
//! their inner value in logs.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Boxed future type for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identifier of a parcel detected on the line.
///
/// Ids are assigned monotonically by the detection layer, so a numerically
/// larger id is a more recently detected parcel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParcelId(pub u64);

impl ParcelId {
    /// Creates a parcel id from its raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw id value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ParcelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a physical output chute.
///
/// Chute ids are strictly positive; `0` never names a real chute and is
/// treated as "missing" wherever an id comes from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChuteId(pub u32);

impl ChuteId {
    /// Creates a chute id from its raw value.
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw id value.
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns true if this id names a real chute (non-zero).
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for ChuteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a diverter actuator on the line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiverterId(pub u32);

impl DiverterId {
    /// Creates a diverter id from its raw value.
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw id value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DiverterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction a diverter pushes a parcel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiverterDirection {
    /// Let the parcel pass through.
    Straight,
    /// Divert to the left branch.
    Left,
    /// Divert to the right branch.
    Right,
}

impl fmt::Display for DiverterDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Straight => write!(f, "straight"),
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chute_id_validity() {
        assert!(ChuteId::new(1).is_valid());
        assert!(!ChuteId::new(0).is_valid());
    }

    #[test]
    fn test_id_display() {
        assert_eq!(ParcelId::new(42).to_string(), "42");
        assert_eq!(ChuteId::new(7).to_string(), "7");
        assert_eq!(DiverterId::new(3).to_string(), "3");
    }

    #[test]
    fn test_parcel_id_ordering_follows_detection_order() {
        assert!(ParcelId::new(100) > ParcelId::new(99));
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(DiverterDirection::Straight.to_string(), "straight");
        assert_eq!(DiverterDirection::Left.to_string(), "left");
        assert_eq!(DiverterDirection::Right.to_string(), "right");
    }
}
