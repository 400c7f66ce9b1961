//! Diff engine for comparing desired vs observed state.
//!
//! Only keys present in the desired attributes are compared. Keys the control
//! plane adds on its own (status, timestamps, ...) never cause an update.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::debug;

use crate::config::{AttributeMap, ResourceId, ResourceSpec};
use crate::state::{ObservedResource, ObservedState};

/// Engine for computing diffs between desired and observed states.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

/// Difference for a single resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDiff {
    /// Resource the diff is about.
    pub resource: ResourceId,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Field-level differences.
    pub details: Vec<DiffDetail>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// Resource does not exist remotely.
    Create,
    /// Resource exists with different attributes.
    Update,
    /// Resource matches.
    NoChange,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffDetail {
    /// Attribute that differs.
    pub field: String,
    /// Observed value, if the attribute exists remotely.
    pub old_value: Option<Value>,
    /// Desired value.
    pub new_value: Option<Value>,
}

/// Diffs for a whole document.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    /// One diff per desired resource, in input order.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

/// Compares two attribute values, treating numbers by value.
///
/// `2`, `2.0` and `2u64` are equal; nested arrays and objects are compared
/// element-wise with the same rule.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Integers compare exactly; floats only come in when either side is one.
fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
        return x == y;
    }
    if !(x.is_f64() || y.is_f64()) {
        return false;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => false,
    }
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Lists desired attributes that are missing from or differ in `observed`.
    #[must_use]
    pub fn attribute_changes(desired: &AttributeMap, observed: &AttributeMap) -> Vec<DiffDetail> {
        desired
            .iter()
            .filter_map(|(field, want)| match observed.get(field) {
                Some(have) if values_equal(want, have) => None,
                have => Some(DiffDetail {
                    field: field.clone(),
                    old_value: have.cloned(),
                    new_value: Some(want.clone()),
                }),
            })
            .collect()
    }

    /// Diffs one desired resource against what was observed for it.
    #[must_use]
    pub fn diff_resource(&self, spec: &ResourceSpec, observed: Option<&ObservedResource>) -> ResourceDiff {
        let resource = spec.id();
        let desired = spec.attribute_map();

        let Some(observed) = observed else {
            debug!("{resource} needs to be created");
            return ResourceDiff {
                resource,
                diff_type: DiffType::Create,
                details: Self::attribute_changes(&desired, &AttributeMap::new()),
            };
        };

        let details = Self::attribute_changes(&desired, &observed.attributes);
        let diff_type = if details.is_empty() {
            DiffType::NoChange
        } else {
            debug!("{resource} differs in {} attribute(s)", details.len());
            DiffType::Update
        };

        ResourceDiff {
            resource,
            diff_type,
            details,
        }
    }

    /// Diffs every desired resource against the observed state.
    #[must_use]
    pub fn compute_diff(&self, specs: &[ResourceSpec], observed: &ObservedState) -> DiffResult {
        let diffs: Vec<ResourceDiff> = specs
            .iter()
            .map(|spec| self.diff_resource(spec, observed.get(&spec.id())))
            .collect();

        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();
        let creates = count(DiffType::Create);
        let updates = count(DiffType::Update);
        let unchanged = count(DiffType::NoChange);

        DiffResult {
            diffs,
            creates,
            updates,
            unchanged,
        }
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DiffDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |v: &Option<Value>| v.as_ref().map_or_else(|| String::from("(none)"), Value::to_string);
        write!(f, "{}: {} -> {}", self.field, show(&self.old_value), show(&self.new_value))
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.resource, self.diff_type)?;
        if !self.details.is_empty() && self.diff_type == DiffType::Update {
            let fields: Vec<&str> = self.details.iter().map(|d| d.field.as_str()).collect();
            write!(f, " ({})", fields.join(", "))?;
        }
        Ok(())
    }
}
