use std::{fmt, str::FromStr};

use crate::error::ModelError;

/// Closed set of input families a scene can belong to.
///
/// Assigned when the scene row is created and never re-derived from the
/// scene name afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SensorFamily {
    Landsat,
    Modis,
    /// Order-level plotting and statistics product with no input of its own.
    Plot,
}

impl SensorFamily {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SensorFamily::Landsat => "landsat",
            SensorFamily::Modis => "modis",
            SensorFamily::Plot => "plot",
        }
    }

    /// Families that are verified against an upstream inventory catalog.
    pub const fn catalogued() -> &'static [SensorFamily] {
        &[SensorFamily::Landsat, SensorFamily::Modis]
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, SensorFamily::Plot)
    }
}

impl fmt::Display for SensorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorFamily {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "landsat" => Ok(SensorFamily::Landsat),
            "modis" => Ok(SensorFamily::Modis),
            "plot" => Ok(SensorFamily::Plot),
            other => Err(ModelError::UnknownSensor(other.to_string())),
        }
    }
}
