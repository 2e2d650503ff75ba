//! Tag quality indicator.

use serde::{Deserialize, Serialize};

/// Freshness/trust indicator for a tag's last value.
///
/// A tag starts as `Uncertain` until its first read completes; every poll
/// cycle then moves it to `Good` or `Bad`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// The last read succeeded and the value is current.
    Good,

    /// The last read failed, or the device is in outage.
    Bad,

    /// The tag has never been read.
    #[default]
    Uncertain,
}

impl Quality {
    /// Check if the value can be trusted.
    #[inline]
    pub const fn is_good(&self) -> bool {
        matches!(self, Self::Good)
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Good => "Good",
            Self::Bad => "Bad",
            Self::Uncertain => "Uncertain",
        };
        write!(f, "{}", s)
    }
}
