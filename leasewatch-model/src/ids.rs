use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::ModelError;

/// Identifier of one scan run. Time-ordered (UUIDv7) so ids sort roughly by
/// creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ScanRunId(pub Uuid);

impl Default for ScanRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanRunId {
    pub fn new() -> Self {
        ScanRunId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn to_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for ScanRunId {
    fn from(value: Uuid) -> Self {
        ScanRunId(value)
    }
}

impl FromStr for ScanRunId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(ScanRunId)
            .map_err(|e| ModelError::InvalidId(format!("{s}: {e}")))
    }
}

impl fmt::Display for ScanRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(
            feature = "serde",
            derive(serde::Serialize, serde::Deserialize)
        )]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Key of a registered data source (`dnb`, `sec`, ...).
    SourceId
);
string_id!(
    /// Opaque tenant reference owned by the portfolio service.
    TenantId
);
string_id!(PropertyId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_run_id_parses_its_display_form() {
        let id = ScanRunId::new();
        let parsed: ScanRunId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<ScanRunId>().is_err());
    }

    #[test]
    fn newer_run_ids_sort_after_older_ones() {
        let first = ScanRunId::new();
        let second = ScanRunId::new();
        assert!(second > first);
    }
}
