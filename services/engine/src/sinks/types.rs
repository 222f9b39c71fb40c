//! Sink Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::collectors::MetricUnit;

/// A single metric point as sent to the metrics store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub namespace: String,
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    /// Always starts with `AccountId`
    pub dimensions: Vec<(String, String)>,
    pub timestamp: DateTime<Utc>,
}

impl MetricRecord {
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// `snake_case` to `PascalCase`
pub fn pascal_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pascal_case() {
        assert_eq!(pascal_case("compliance_percent"), "CompliancePercent");
        assert_eq!(pascal_case("total_active"), "TotalActive");
        assert_eq!(pascal_case("critical"), "Critical");
        assert_eq!(pascal_case("__x__y"), "XY");
    }
}
