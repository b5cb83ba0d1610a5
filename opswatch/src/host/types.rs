use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Measurement category of a metric value, named the way the monitoring
/// service expects it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[default]
    Percent,
    Count,
    Bytes,
    Megabytes,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Percent => "Percent",
            Unit::Count => "Count",
            Unit::Bytes => "Bytes",
            Unit::Megabytes => "Megabytes",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named key/value pair used to slice metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimensionTarget {
    pub name: String,
    pub value: String,
}

impl DimensionTarget {
    pub const INSTANCE: &'static str = "InstanceId";
    pub const GROUP: &'static str = "AutoScalingGroup";

    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn instance(instance_id: impl Into<String>) -> Self {
        Self::new(Self::INSTANCE, instance_id)
    }

    pub fn group(group_name: impl Into<String>) -> Self {
        Self::new(Self::GROUP, group_name)
    }

    /// Every target a run publishes to: the instance, plus the group when known.
    pub fn for_host(instance_id: &str, group: Option<&str>) -> Vec<Self> {
        let mut targets = vec![Self::instance(instance_id)];
        if let Some(group) = group {
            targets.push(Self::group(group));
        }
        targets
    }
}

impl fmt::Display for DimensionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// One metrics sink call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDatum {
    pub namespace: String,
    pub name: String,
    pub value: f64,
    pub unit: Unit,
    pub dimension: DimensionTarget,
    pub timestamp: DateTime<Utc>,
}
