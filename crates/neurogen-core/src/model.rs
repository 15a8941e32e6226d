//! Typed, validated view over the network description.
//!
//! [`Network::from_description`] is the single place where raw strings turn
//! into enums. Every precondition violation is reported here, before any
//! generator touches code bodies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use crate::config::{Backend, GeneratorConfig};
use crate::ir::{
    AttributeDesc, DelayDesc, GlobalOpDesc, NetworkDescription, PopulationDesc,
    PopulationRefDesc, ProjectionDesc, ProjectionKindDesc,
};
use crate::{NeurogenError, ObjectId, Result};

// ============================================================================
// ATTRIBUTES
// ============================================================================

/// Cardinality class of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Locality {
    /// One value per synapse (projections) or per neuron (populations)
    Local,
    /// One value per dendrite (projections only)
    Semiglobal,
    /// One value for the whole structure
    Global,
}

impl Locality {
    pub fn parse(object: ObjectId, attribute: &str, value: &str) -> Result<Self> {
        match value {
            "local" => Ok(Locality::Local),
            "semiglobal" => Ok(Locality::Semiglobal),
            "global" => Ok(Locality::Global),
            other => Err(NeurogenError::UnknownLocality {
                object,
                attribute: attribute.to_string(),
                locality: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Locality::Local => "local",
            Locality::Semiglobal => "semiglobal",
            Locality::Global => "global",
        }
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrKind {
    Parameter,
    Variable,
}

impl AttrKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttrKind::Parameter => "parameter",
            AttrKind::Variable => "variable",
        }
    }
}

/// Integration method of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Forward-stepped: `x += dt * dx`
    Explicit,
    /// Closed-form statement executed every step
    Exact,
    /// Closed-form statement executed at pre/post events only
    EventDriven,
}

impl Method {
    pub fn parse(object: ObjectId, attribute: &str, value: &str) -> Result<Self> {
        match value {
            "explicit" | "euler" => Ok(Method::Explicit),
            "exact" => Ok(Method::Exact),
            "event-driven" | "event_driven" => Ok(Method::EventDriven),
            other => Err(NeurogenError::UnknownIntegrationMethod {
                object,
                attribute: attribute.to_string(),
                method: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub ctype: String,
    pub locality: Locality,
    pub kind: AttrKind,
    pub method: Method,
    pub init: String,
    pub eq: Option<String>,
}

impl Attribute {
    fn from_desc(object: ObjectId, desc: &AttributeDesc) -> Result<Self> {
        let locality = Locality::parse(object, &desc.name, &desc.locality)?;
        let kind = match desc.attr_type.as_str() {
            "parameter" => AttrKind::Parameter,
            "variable" => AttrKind::Variable,
            other => {
                return Err(NeurogenError::UnsupportedConfiguration {
                    object,
                    reason: format!("attribute '{}' has unknown type '{}'", desc.name, other),
                })
            }
        };
        let method = match &desc.method {
            Some(m) => Method::parse(object, &desc.name, m)?,
            None => Method::Explicit,
        };

        Ok(Self {
            name: desc.name.clone(),
            ctype: desc.ctype.clone(),
            locality,
            kind,
            method,
            init: desc.init.clone(),
            eq: desc.eq.clone(),
        })
    }

    /// Does this attribute change during a step?
    pub fn is_updated(&self) -> bool {
        self.kind == AttrKind::Variable && self.eq.is_some()
    }
}

// ============================================================================
// GLOBAL OPERATIONS
// ============================================================================

/// Supported reductions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GlobalOpKind {
    Min,
    Max,
    Mean,
    Sum,
    Norm1,
    Norm2,
}

impl GlobalOpKind {
    pub const ALL: [GlobalOpKind; 6] = [
        GlobalOpKind::Min,
        GlobalOpKind::Max,
        GlobalOpKind::Mean,
        GlobalOpKind::Sum,
        GlobalOpKind::Norm1,
        GlobalOpKind::Norm2,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == value)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalOpKind::Min => "min",
            GlobalOpKind::Max => "max",
            GlobalOpKind::Mean => "mean",
            GlobalOpKind::Sum => "sum",
            GlobalOpKind::Norm1 => "norm1",
            GlobalOpKind::Norm2 => "norm2",
        }
    }
}

/// A reduction over one variable of one population
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalOp {
    pub kind: GlobalOpKind,
    pub variable: String,
}

impl GlobalOp {
    fn from_desc(object: ObjectId, desc: &GlobalOpDesc) -> Result<Self> {
        let kind = GlobalOpKind::parse(&desc.function).ok_or_else(|| {
            NeurogenError::UnsupportedGlobalOperation {
                object,
                function: desc.function.clone(),
                variable: desc.variable.clone(),
            }
        })?;
        Ok(Self {
            kind,
            variable: desc.variable.clone(),
        })
    }

    /// Name of the member holding the result, e.g. `_mean_r`
    pub fn member(&self) -> String {
        format!("_{}_{}", self.kind.as_str(), self.variable)
    }
}

// ============================================================================
// POPULATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeuronKind {
    Rate,
    Spike,
}

impl NeuronKind {
    fn parse(object: ObjectId, value: &str) -> Result<Self> {
        match value {
            "rate" => Ok(NeuronKind::Rate),
            "spike" => Ok(NeuronKind::Spike),
            other => Err(NeurogenError::UnknownNeuronKind {
                object,
                kind: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeSpec {
    pub condition: String,
    pub reset: Vec<String>,
    pub refractory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Population {
    pub id: usize,
    pub name: String,
    pub size: usize,
    pub kind: NeuronKind,
    pub attributes: Vec<Attribute>,
    pub targets: Vec<String>,
    pub global_operations: Vec<GlobalOp>,
    pub stop_condition: Option<String>,
    pub spike: Option<SpikeSpec>,
}

impl Population {
    fn from_desc(desc: &PopulationDesc) -> Result<Self> {
        let object = ObjectId::Population(desc.id);
        let kind = NeuronKind::parse(object, &desc.neuron_type)?;

        let mut attributes = Vec::with_capacity(desc.attributes.len());
        for attr in &desc.attributes {
            let attr = Attribute::from_desc(object, attr)?;
            if attr.locality == Locality::Semiglobal {
                return Err(NeurogenError::UnsupportedLocality {
                    object,
                    attribute: attr.name,
                    locality: "semiglobal".into(),
                });
            }
            if attr.method == Method::EventDriven {
                return Err(NeurogenError::UnsupportedConfiguration {
                    object,
                    reason: format!(
                        "event-driven integration of '{}' is only available for synapses",
                        attr.name
                    ),
                });
            }
            attributes.push(attr);
        }

        let global_operations = desc
            .global_operations
            .iter()
            .map(|op| GlobalOp::from_desc(object, op))
            .collect::<Result<Vec<_>>>()?;

        let spike = match (kind, &desc.spike) {
            (NeuronKind::Spike, Some(s)) => Some(SpikeSpec {
                condition: s.condition.clone(),
                reset: s.reset.clone(),
                refractory: s.refractory.clone(),
            }),
            (NeuronKind::Spike, None) => {
                return Err(NeurogenError::UnsupportedConfiguration {
                    object,
                    reason: "spiking population without spike condition".into(),
                })
            }
            (NeuronKind::Rate, _) => None,
        };

        Ok(Self {
            id: desc.id,
            name: desc.name.clone(),
            size: desc.size,
            kind,
            attributes,
            targets: desc.targets.clone(),
            global_operations,
            stop_condition: desc.stop_condition.clone(),
            spike,
        })
    }

    pub fn object(&self) -> ObjectId {
        ObjectId::Population(self.id)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn is_spiking(&self) -> bool {
        self.kind == NeuronKind::Spike
    }
}

// ============================================================================
// PROJECTIONS
// ============================================================================

/// Pre- or post-synaptic side of a projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopRef {
    pub population: usize,
    /// Restricted ranks when the projection targets a population view
    pub ranks: Option<Vec<usize>>,
}

impl PopRef {
    fn from_desc(desc: &PopulationRefDesc) -> Self {
        match desc {
            PopulationRefDesc::Whole(id) => Self {
                population: *id,
                ranks: None,
            },
            PopulationRefDesc::View { population, ranks } => Self {
                population: *population,
                ranks: Some(ranks.clone()),
            },
        }
    }

    pub fn is_view(&self) -> bool {
        self.ranks.is_some()
    }
}

/// Connectivity representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StorageFormat {
    /// List of lists
    Lil,
    /// Compressed sparse row
    Csr,
    /// ELLPACK, padded rows
    Ell,
    /// ELLPACK with explicit row lengths
    EllR,
}

impl StorageFormat {
    pub fn parse(object: ObjectId, value: &str) -> Result<Self> {
        match value {
            "lil" => Ok(StorageFormat::Lil),
            "csr" => Ok(StorageFormat::Csr),
            "ell" => Ok(StorageFormat::Ell),
            "ellr" | "ell-r" => Ok(StorageFormat::EllR),
            other => Err(NeurogenError::UnknownStorageFormat {
                object,
                format: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageFormat::Lil => "lil",
            StorageFormat::Csr => "csr",
            StorageFormat::Ell => "ell",
            StorageFormat::EllR => "ellr",
        }
    }

    pub fn available_on(&self, backend: Backend) -> bool {
        match backend {
            Backend::OpenMp => true,
            Backend::Cuda => matches!(self, StorageFormat::Csr | StorageFormat::EllR),
        }
    }

    /// Can synapses be inserted or removed at runtime?
    pub fn supports_dynamic_edges(&self) -> bool {
        matches!(self, StorageFormat::Lil)
    }

    /// Is there a pre-to-post index for spike routing?
    pub fn supports_inverse_index(&self) -> bool {
        matches!(self, StorageFormat::Lil | StorageFormat::Csr)
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delay {
    None,
    Uniform(u32),
    NonUniform(u32),
}

impl Delay {
    /// Largest delay in steps
    pub fn max_delay(&self) -> u32 {
        match self {
            Delay::None => 0,
            Delay::Uniform(d) | Delay::NonUniform(d) => *d,
        }
    }

    /// A one-step delay is implicit in the phase order, no buffer needed
    pub fn needs_buffer(&self) -> bool {
        self.max_delay() > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionKind {
    Standard,
    /// Reuses the connectivity and weights of another projection, inverted
    Transpose { forward: usize },
    /// One kernel of shared weights applied to every dendrite
    WeightSharing { kernel_size: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependencies {
    pub pre: Vec<String>,
    pub post: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synapse {
    pub kind: NeuronKind,
    pub attributes: Vec<Attribute>,
    pub psp: Option<String>,
    pub pre_spike: Vec<String>,
    pub post_spike: Vec<String>,
    pub pruning: Option<String>,
    pub creating: Option<String>,
    pub dependencies: Dependencies,
    pub pre_global_operations: Vec<GlobalOp>,
    pub post_global_operations: Vec<GlobalOp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub id: usize,
    pub pre: PopRef,
    pub post: PopRef,
    pub target: String,
    pub synapse: Synapse,
    pub format: StorageFormat,
    pub delay: Delay,
    pub single_weight: bool,
    pub kind: ProjectionKind,
}

impl Projection {
    fn from_desc(desc: &ProjectionDesc) -> Result<Self> {
        let object = ObjectId::Projection(desc.id);
        let syn = &desc.synapse;

        let attributes = syn
            .attributes
            .iter()
            .map(|a| Attribute::from_desc(object, a))
            .collect::<Result<Vec<_>>>()?;

        let ops = |list: &[GlobalOpDesc]| -> Result<Vec<GlobalOp>> {
            list.iter().map(|op| GlobalOp::from_desc(object, op)).collect()
        };

        let synapse = Synapse {
            kind: NeuronKind::parse(object, &syn.synapse_type)?,
            attributes,
            psp: syn.psp.clone(),
            pre_spike: syn.pre_spike.clone(),
            post_spike: syn.post_spike.clone(),
            pruning: syn.pruning.clone(),
            creating: syn.creating.clone(),
            dependencies: Dependencies {
                pre: syn.dependencies.pre.clone(),
                post: syn.dependencies.post.clone(),
            },
            pre_global_operations: ops(&syn.pre_global_operations)?,
            post_global_operations: ops(&syn.post_global_operations)?,
        };

        let delay = match desc.delay {
            DelayDesc::None => Delay::None,
            DelayDesc::Uniform(d) => Delay::Uniform(d),
            DelayDesc::NonUniform(d) => Delay::NonUniform(d),
        };

        let kind = match desc.kind {
            ProjectionKindDesc::Standard => ProjectionKind::Standard,
            ProjectionKindDesc::Transpose(forward) => ProjectionKind::Transpose { forward },
            ProjectionKindDesc::WeightSharing(ws) => ProjectionKind::WeightSharing {
                kernel_size: ws.kernel_size,
            },
        };

        Ok(Self {
            id: desc.id,
            pre: PopRef::from_desc(&desc.pre),
            post: PopRef::from_desc(&desc.post),
            target: desc.target.clone(),
            synapse,
            format: StorageFormat::parse(object, &desc.storage_format)?,
            delay,
            single_weight: desc.single_weight,
            kind,
        })
    }

    pub fn object(&self) -> ObjectId {
        ObjectId::Projection(self.id)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.synapse.attributes.iter().find(|a| a.name == name)
    }

    /// Locality actually used for storage: a single-weight projection keeps
    /// its weight as one scalar whatever the declared locality.
    pub fn effective_locality(&self, attr: &Attribute) -> Locality {
        if self.single_weight && attr.name == "w" {
            Locality::Global
        } else {
            attr.locality
        }
    }

    pub fn is_spiking(&self) -> bool {
        self.synapse.kind == NeuronKind::Spike
    }

    pub fn has_structural_plasticity(&self) -> bool {
        self.synapse.pruning.is_some() || self.synapse.creating.is_some()
    }

    pub fn is_derived(&self) -> bool {
        !matches!(self.kind, ProjectionKind::Standard)
    }
}

// ============================================================================
// NETWORK
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub populations: Vec<Population>,
    pub projections: Vec<Projection>,
}

impl Network {
    /// Build the typed model and check every precondition.
    pub fn from_description(desc: &NetworkDescription, config: &GeneratorConfig) -> Result<Self> {
        let mut seen = BTreeSet::new();
        let mut populations = Vec::with_capacity(desc.populations.len());
        for pop in &desc.populations {
            if !seen.insert(pop.id) {
                return Err(NeurogenError::DuplicateId(ObjectId::Population(pop.id)));
            }
            populations.push(Population::from_desc(pop)?);
        }

        let mut seen = BTreeSet::new();
        let mut projections = Vec::with_capacity(desc.projections.len());
        for proj in &desc.projections {
            if !seen.insert(proj.id) {
                return Err(NeurogenError::DuplicateId(ObjectId::Projection(proj.id)));
            }
            projections.push(Projection::from_desc(proj)?);
        }

        let network = Self {
            populations,
            projections,
        };
        network.validate(config)?;

        debug!(
            populations = network.populations.len(),
            projections = network.projections.len(),
            "validated network description"
        );
        Ok(network)
    }

    pub fn population(&self, id: usize) -> Result<&Population> {
        self.populations
            .iter()
            .find(|p| p.id == id)
            .ok_or(NeurogenError::UnknownPopulation(id))
    }

    pub fn projection(&self, id: usize) -> Result<&Projection> {
        self.projections
            .iter()
            .find(|p| p.id == id)
            .ok_or(NeurogenError::UnknownProjection(id))
    }

    fn validate(&self, config: &GeneratorConfig) -> Result<()> {
        for pop in &self.populations {
            let object = ObjectId::Population(pop.id);
            for op in &pop.global_operations {
                check_op_variable(object, pop, op)?;
            }
        }

        for proj in &self.projections {
            let object = proj.object();
            let pre = self.population(proj.pre.population)?;
            let post = self.population(proj.post.population)?;

            for op in &proj.synapse.pre_global_operations {
                check_op_variable(object, pre, op)?;
            }
            for op in &proj.synapse.post_global_operations {
                check_op_variable(object, post, op)?;
            }

            if !proj.format.available_on(config.backend) {
                return Err(NeurogenError::UnsupportedStorageFormat {
                    object,
                    format: proj.format.to_string(),
                    backend: config.backend.to_string(),
                });
            }

            if proj.is_spiking() {
                if !proj.format.supports_inverse_index() {
                    return Err(NeurogenError::UnsupportedConfiguration {
                        object,
                        reason: format!(
                            "spiking synapses need a pre-to-post index, which {} does not provide",
                            proj.format
                        ),
                    });
                }
                if matches!(proj.delay, Delay::NonUniform(_)) {
                    return Err(NeurogenError::UnsupportedConfiguration {
                        object,
                        reason: "non-uniform delays are only available for rate-coded synapses"
                            .into(),
                    });
                }
            }

            if config.backend == Backend::Cuda {
                if matches!(proj.delay, Delay::NonUniform(_)) {
                    return Err(NeurogenError::UnsupportedConfiguration {
                        object,
                        reason: "non-uniform delays are not available on the cuda backend".into(),
                    });
                }
                if proj.is_derived() {
                    return Err(NeurogenError::UnsupportedConfiguration {
                        object,
                        reason: "transpose and weight-sharing projections are only available on the openmp backend"
                            .into(),
                    });
                }
                if proj.is_spiking() && proj.delay.needs_buffer() {
                    return Err(NeurogenError::UnsupportedConfiguration {
                        object,
                        reason: "delayed spiking synapses are not available on the cuda backend"
                            .into(),
                    });
                }
            }

            if config.structural_plasticity
                && proj.has_structural_plasticity()
                && !proj.format.supports_dynamic_edges()
            {
                return Err(NeurogenError::StructuralPlasticityUnsupported {
                    object,
                    format: proj.format.to_string(),
                });
            }

            match proj.kind {
                ProjectionKind::Standard => {}
                ProjectionKind::Transpose { forward } => {
                    self.validate_transpose(proj, forward, pre, post)?
                }
                ProjectionKind::WeightSharing { kernel_size } => {
                    if kernel_size == 0 {
                        return Err(NeurogenError::UnsupportedConfiguration {
                            object,
                            reason: "weight sharing needs a non-empty kernel".into(),
                        });
                    }
                    if proj.is_spiking() || proj.delay != Delay::None {
                        return Err(NeurogenError::UnsupportedConfiguration {
                            object,
                            reason: "weight sharing is only available for rate-coded, non-delayed projections"
                                .into(),
                        });
                    }
                    if proj.has_structural_plasticity() {
                        return Err(NeurogenError::StructuralPlasticityUnsupported {
                            object,
                            format: "weight sharing".into(),
                        });
                    }
                    if let Some(attr) = proj.synapse.attributes.iter().find(|a| a.is_updated()) {
                        return Err(NeurogenError::UnsupportedConfiguration {
                            object,
                            reason: format!(
                                "shared weights are not plastic, '{}' has an update equation",
                                attr.name
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_transpose(
        &self,
        proj: &Projection,
        forward_id: usize,
        pre: &Population,
        post: &Population,
    ) -> Result<()> {
        let object = proj.object();
        let invalid = |reason: &str| NeurogenError::InvalidTranspose {
            object,
            reason: reason.to_string(),
        };

        let forward = self.projection(forward_id)?;
        if forward.is_derived() {
            return Err(invalid("the forward projection is itself derived"));
        }
        if proj.delay != Delay::None || forward.delay != Delay::None {
            return Err(invalid("delays are not allowed on either projection"));
        }
        if proj.is_spiking() || forward.is_spiking() || pre.is_spiking() || post.is_spiking() {
            return Err(invalid("only rate-coded populations and synapses are supported"));
        }
        if proj.pre.population != forward.post.population
            || proj.post.population != forward.pre.population
        {
            return Err(invalid("pre and post must mirror the forward projection"));
        }
        if proj.has_structural_plasticity() {
            return Err(invalid("structural plasticity is not available"));
        }
        Ok(())
    }
}

fn check_op_variable(object: ObjectId, pop: &Population, op: &GlobalOp) -> Result<()> {
    match pop.attribute(&op.variable) {
        Some(attr) if attr.locality == Locality::Local => Ok(()),
        Some(_) => Err(NeurogenError::UnsupportedGlobalOperation {
            object,
            function: op.kind.as_str().to_string(),
            variable: format!("{} (global attribute of pop{})", op.variable, pop.id),
        }),
        None => Err(NeurogenError::UnsupportedGlobalOperation {
            object,
            function: op.kind.as_str().to_string(),
            variable: format!("{} (not an attribute of pop{})", op.variable, pop.id),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_network() -> NetworkDescription {
        NetworkDescription::from_json(
            r#"{
            "populations": [
                {"id": 0, "name": "in", "size": 3, "neuron_type": "rate",
                 "attributes": [{"name": "r", "locality": "local"}]},
                {"id": 1, "name": "out", "size": 2, "neuron_type": "rate",
                 "attributes": [{"name": "r", "locality": "local", "method": "exact",
                                 "eq": "${r} = ${sum.exc};"}]}
            ],
            "projections": [
                {"id": 0, "pre": 0, "post": 1, "target": "exc",
                 "synapse": {"attributes": [{"name": "w", "locality": "local", "attr_type": "parameter"}],
                             "post_global_operations": [{"function": "mean", "variable": "r"}]}}
            ]
        }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_network() {
        let net = Network::from_description(&rate_network(), &GeneratorConfig::default()).unwrap();
        assert_eq!(net.populations.len(), 2);
        let proj = net.projection(0).unwrap();
        assert_eq!(proj.format, StorageFormat::Lil);
        assert_eq!(proj.synapse.post_global_operations[0].member(), "_mean_r");
        assert_eq!(
            net.population(1).unwrap().attributes[0].method,
            Method::Exact
        );
    }

    #[test]
    fn test_unknown_locality_is_fatal() {
        let mut desc = rate_network();
        desc.projections[0].synapse.attributes[0].locality = "regional".into();
        let err = Network::from_description(&desc, &GeneratorConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            NeurogenError::UnknownLocality { object: ObjectId::Projection(0), .. }
        ));
    }

    #[test]
    fn test_semiglobal_population_attribute_rejected() {
        let mut desc = rate_network();
        desc.populations[0].attributes[0].locality = "semiglobal".into();
        let err = Network::from_description(&desc, &GeneratorConfig::default()).unwrap_err();
        assert!(matches!(err, NeurogenError::UnsupportedLocality { .. }));
    }

    #[test]
    fn test_unsupported_reduction_rejected() {
        let mut desc = rate_network();
        desc.projections[0].synapse.post_global_operations[0].function = "median".into();
        let err = Network::from_description(&desc, &GeneratorConfig::default()).unwrap_err();
        assert!(matches!(err, NeurogenError::UnsupportedGlobalOperation { .. }));
    }

    #[test]
    fn test_format_unavailable_on_cuda() {
        let config = GeneratorConfig {
            backend: Backend::Cuda,
            ..GeneratorConfig::default()
        };
        let err = Network::from_description(&rate_network(), &config).unwrap_err();
        assert!(matches!(err, NeurogenError::UnsupportedStorageFormat { .. }));

        let mut desc = rate_network();
        desc.projections[0].storage_format = "ellr".into();
        assert!(Network::from_description(&desc, &config).is_ok());
    }

    #[test]
    fn test_structural_plasticity_needs_dynamic_edges() {
        let mut desc = rate_network();
        desc.projections[0].storage_format = "csr".into();
        desc.projections[0].synapse.pruning = Some("${w} < 0.01".into());
        let config = GeneratorConfig {
            structural_plasticity: true,
            ..GeneratorConfig::default()
        };
        let err = Network::from_description(&desc, &config).unwrap_err();
        assert!(matches!(
            err,
            NeurogenError::StructuralPlasticityUnsupported { .. }
        ));

        // Without the global switch the pruning body is simply not generated
        assert!(Network::from_description(&desc, &GeneratorConfig::default()).is_ok());
    }

    #[test]
    fn test_transpose_rules() {
        let mut desc = rate_network();
        let mut transpose = desc.projections[0].clone();
        transpose.id = 1;
        transpose.pre = PopulationRefDesc::Whole(1);
        transpose.post = PopulationRefDesc::Whole(0);
        transpose.kind = ProjectionKindDesc::Transpose(0);
        desc.projections.push(transpose.clone());
        assert!(Network::from_description(&desc, &GeneratorConfig::default()).is_ok());

        desc.projections[1].delay = DelayDesc::Uniform(2);
        let err = Network::from_description(&desc, &GeneratorConfig::default()).unwrap_err();
        assert!(matches!(err, NeurogenError::InvalidTranspose { .. }));

        desc.projections[1] = transpose;
        desc.populations[0].neuron_type = "spike".into();
        desc.populations[0].spike = Some(crate::ir::SpikeDesc {
            condition: "${r} > 1.0".into(),
            reset: vec![],
            refractory: None,
        });
        let err = Network::from_description(&desc, &GeneratorConfig::default()).unwrap_err();
        assert!(matches!(err, NeurogenError::InvalidTranspose { .. }));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut desc = rate_network();
        let dup = desc.populations[0].clone();
        desc.populations.push(dup);
        let err = Network::from_description(&desc, &GeneratorConfig::default()).unwrap_err();
        assert!(matches!(err, NeurogenError::DuplicateId(ObjectId::Population(0))));
    }

    #[test]
    fn test_single_weight_forces_global() {
        let mut desc = rate_network();
        desc.projections[0].single_weight = true;
        let net = Network::from_description(&desc, &GeneratorConfig::default()).unwrap();
        let proj = net.projection(0).unwrap();
        let w = proj.attribute("w").unwrap();
        assert_eq!(w.locality, Locality::Local);
        assert_eq!(proj.effective_locality(w), Locality::Global);
    }

    #[test]
    fn test_delay_buffers() {
        assert!(!Delay::None.needs_buffer());
        assert!(!Delay::Uniform(1).needs_buffer());
        assert!(Delay::Uniform(3).needs_buffer());
        assert_eq!(Delay::NonUniform(5).max_delay(), 5);
    }
}
