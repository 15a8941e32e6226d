//! Raw network description.
//!
//! This is the shape produced by the equation parser: strings are kept
//! verbatim so that validation in [`crate::model`] can report unknown values
//! together with the object they belong to.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Complete network as delivered by the parser
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkDescription {
    #[serde(default)]
    pub populations: Vec<PopulationDesc>,
    #[serde(default)]
    pub projections: Vec<ProjectionDesc>,
}

impl NetworkDescription {
    /// Parse a JSON network description
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One attribute (parameter or variable) of a neuron or synapse
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDesc {
    pub name: String,
    #[serde(default = "default_ctype")]
    pub ctype: String,
    /// `local`, `semiglobal` or `global`
    pub locality: String,
    /// `parameter` or `variable`
    #[serde(default = "default_attr_type")]
    pub attr_type: String,
    /// `explicit`, `exact` or `event-driven`
    #[serde(default)]
    pub method: Option<String>,
    /// Initial value expression
    #[serde(default = "default_init")]
    pub init: String,
    /// Update equation (meaning depends on `method`)
    #[serde(default)]
    pub eq: Option<String>,
}

fn default_ctype() -> String {
    "double".into()
}

fn default_attr_type() -> String {
    "variable".into()
}

fn default_init() -> String {
    "0.0".into()
}

/// Requested reduction over a population variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalOpDesc {
    /// `min`, `max`, `mean`, `sum`, `norm1` or `norm2`
    pub function: String,
    pub variable: String,
}

/// Spike emission of a spiking neuron
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpikeDesc {
    pub condition: String,
    #[serde(default)]
    pub reset: Vec<String>,
    /// Refractory period in steps (expression)
    #[serde(default)]
    pub refractory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationDesc {
    pub id: usize,
    pub name: String,
    pub size: usize,
    /// `rate` or `spike`
    pub neuron_type: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDesc>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub global_operations: Vec<GlobalOpDesc>,
    #[serde(default)]
    pub stop_condition: Option<String>,
    #[serde(default)]
    pub spike: Option<SpikeDesc>,
}

/// Reference to a population or to a view (subset of ranks) of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PopulationRefDesc {
    Whole(usize),
    View { population: usize, ranks: Vec<usize> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayDesc {
    #[default]
    None,
    /// Same delay (in steps) for every synapse
    Uniform(u32),
    /// Per-synapse delays up to the given maximum (in steps)
    NonUniform(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightSharingDesc {
    pub kernel_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionKindDesc {
    #[default]
    Standard,
    /// Transpose of the projection with the given id
    Transpose(usize),
    WeightSharing(WeightSharingDesc),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependenciesDesc {
    #[serde(default)]
    pub pre: Vec<String>,
    #[serde(default)]
    pub post: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynapseDesc {
    /// `rate` or `spike`
    #[serde(default = "default_synapse_type")]
    pub synapse_type: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDesc>,
    /// Custom weighted-sum term, defaults to `${w} * ${pre.r}`
    #[serde(default)]
    pub psp: Option<String>,
    #[serde(default)]
    pub pre_spike: Vec<String>,
    #[serde(default)]
    pub post_spike: Vec<String>,
    #[serde(default)]
    pub pruning: Option<String>,
    #[serde(default)]
    pub creating: Option<String>,
    #[serde(default)]
    pub dependencies: DependenciesDesc,
    #[serde(default)]
    pub pre_global_operations: Vec<GlobalOpDesc>,
    #[serde(default)]
    pub post_global_operations: Vec<GlobalOpDesc>,
}

fn default_synapse_type() -> String {
    "rate".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionDesc {
    pub id: usize,
    pub pre: PopulationRefDesc,
    pub post: PopulationRefDesc,
    pub target: String,
    pub synapse: SynapseDesc,
    #[serde(default = "default_storage_format")]
    pub storage_format: String,
    #[serde(default)]
    pub delay: DelayDesc,
    #[serde(default)]
    pub single_weight: bool,
    #[serde(default)]
    pub kind: ProjectionKindDesc,
}

fn default_storage_format() -> String {
    "lil".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_network() {
        let text = r#"{
            "populations": [
                {"id": 0, "name": "input", "size": 4, "neuron_type": "rate",
                 "attributes": [{"name": "r", "locality": "local"}]},
                {"id": 1, "name": "output", "size": 2, "neuron_type": "rate",
                 "attributes": [{"name": "r", "locality": "local", "method": "exact",
                                 "eq": "${r} = ${sum.exc};"}]}
            ],
            "projections": [
                {"id": 0, "pre": 0, "post": {"population": 1, "ranks": [0]},
                 "target": "exc",
                 "synapse": {"attributes": [{"name": "w", "locality": "local", "attr_type": "parameter"}]},
                 "delay": {"uniform": 2}}
            ]
        }"#;

        let desc = NetworkDescription::from_json(text).unwrap();
        assert_eq!(desc.populations.len(), 2);
        assert_eq!(desc.populations[0].attributes[0].ctype, "double");
        assert_eq!(desc.populations[0].attributes[0].init, "0.0");

        let proj = &desc.projections[0];
        assert_eq!(proj.pre, PopulationRefDesc::Whole(0));
        assert_eq!(
            proj.post,
            PopulationRefDesc::View { population: 1, ranks: vec![0] }
        );
        assert_eq!(proj.storage_format, "lil");
        assert_eq!(proj.delay, DelayDesc::Uniform(2));
        assert_eq!(proj.kind, ProjectionKindDesc::Standard);
        assert_eq!(proj.synapse.synapse_type, "rate");
    }

    #[test]
    fn test_parse_projection_kinds() {
        let transpose: ProjectionKindDesc = serde_json::from_str(r#"{"transpose": 3}"#).unwrap();
        assert_eq!(transpose, ProjectionKindDesc::Transpose(3));

        let shared: ProjectionKindDesc =
            serde_json::from_str(r#"{"weight_sharing": {"kernel_size": 9}}"#).unwrap();
        assert_eq!(
            shared,
            ProjectionKindDesc::WeightSharing(WeightSharingDesc { kernel_size: 9 })
        );

        let none: DelayDesc = serde_json::from_str(r#""none""#).unwrap();
        assert_eq!(none, DelayDesc::None);
    }
}
