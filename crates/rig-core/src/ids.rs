use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PORT_COUNT: usize = 4;
pub const CAMERA_COUNT: usize = 4;

/// Raised when a raw integer does not name a valid rig resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("{kind} {value} is out of range {min}..={max}")]
    OutOfRange {
        kind: &'static str,
        value: i64,
        min: u8,
        max: u8,
    },
    #[error("{kind} '{raw}' is not a number")]
    NotANumber { kind: &'static str, raw: String },
    #[error("rotation must be one of 0, 90, 180 or 270 degrees, got {0}")]
    InvalidRotation(i64),
    #[error("camera layout is not a permutation of cameras 0..=3: {0}")]
    NotAPermutation(String),
}

macro_rules! bounded_index {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $min:literal, $max:literal, $count:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "u8")]
        pub struct $name(u8);

        impl $name {
            pub const MIN: u8 = $min;
            pub const MAX: u8 = $max;

            pub fn new(value: i64) -> Result<Self, ModelError> {
                if (i64::from($min)..=i64::from($max)).contains(&value) {
                    Ok(Self(value as u8))
                } else {
                    Err(ModelError::OutOfRange {
                        kind: $kind,
                        value,
                        min: $min,
                        max: $max,
                    })
                }
            }

            pub fn get(self) -> u8 {
                self.0
            }

            /// Zero-based slot in fixed-size collections.
            pub fn index(self) -> usize {
                usize::from(self.0 - $min)
            }

            pub fn from_index(index: usize) -> Result<Self, ModelError> {
                Self::new(index as i64 + i64::from($min))
            }

            pub fn all() -> impl Iterator<Item = Self> {
                ($min..=$max).map(Self)
            }

            /// Builds a fixed-size table with one entry per value, in order.
            pub fn table<T>(mut entry: impl FnMut(Self) -> T) -> [T; $count] {
                std::array::from_fn(|index| entry(Self(index as u8 + $min)))
            }
        }

        impl TryFrom<i64> for $name {
            type Error = ModelError;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let value = raw.trim().parse::<i64>().map_err(|_| ModelError::NotANumber {
                    kind: $kind,
                    raw: raw.to_string(),
                })?;
                Self::new(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

bounded_index!(
    /// Logical serial channel on the rig, 1..=4.
    PortNumber,
    "port number",
    1,
    4,
    PORT_COUNT
);

bounded_index!(
    /// One of the four fixed places a camera feed is rendered, 1..=4.
    DisplayPosition,
    "display position",
    1,
    4,
    CAMERA_COUNT
);

bounded_index!(
    /// Physical camera device, 0..=3, independent of where it is displayed.
    CameraId,
    "camera id",
    0,
    3,
    CAMERA_COUNT
);

/// Clockwise rotation applied to a camera feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Next quarter turn, wrapping at 360.
    pub fn advance(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg90,
            Rotation::Deg90 => Rotation::Deg180,
            Rotation::Deg180 => Rotation::Deg270,
            Rotation::Deg270 => Rotation::Deg0,
        }
    }
}

impl TryFrom<i64> for Rotation {
    type Error = ModelError;

    fn try_from(degrees: i64) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(ModelError::InvalidRotation(other)),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(value: Rotation) -> Self {
        value.degrees()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}
