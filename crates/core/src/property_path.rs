use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Identifies one reference slot: `referencing_type:bundle.field_name.delta`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyPath {
    pub entity_type: String,
    pub bundle: String,
    pub field_name: String,
    pub delta: u32,
}

impl PropertyPath {
    pub fn new(
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        field_name: impl Into<String>,
        delta: u32,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            field_name: field_name.into(),
            delta,
        }
    }

    /// Cache key marking a record rendered through this slot's overrides.
    pub fn cache_key(&self) -> String {
        format!("override:{self}")
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}.{}.{}",
            self.entity_type, self.bundle, self.field_name, self.delta
        )
    }
}

impl FromStr for PropertyPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidPropertyPath(s.to_string());

        let mut parts = s.split('.');
        let (Some(owner), Some(field_name), Some(delta), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let (entity_type, bundle) = owner.split_once(':').ok_or_else(invalid)?;
        if entity_type.is_empty() || bundle.is_empty() || field_name.is_empty() {
            return Err(invalid());
        }
        let delta = delta.parse::<u32>().map_err(|_| invalid())?;
        Ok(Self::new(entity_type, bundle, field_name, delta))
    }
}
