//! Requirement propagation.
//!
//! Projections ask their pre- and post-synaptic populations for reductions
//! and delayed copies of variables. This pass collects those requests into a
//! side table keyed by population id, leaving the model untouched, and must
//! complete before any code body is generated.

use neurogen_core::{GlobalOp, Network, NeurogenError, NeuronKind, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

use crate::template;

/// What a population must provide on behalf of the projections touching it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulationInfo {
    /// Reductions to compute every step, deduplicated
    pub global_operations: BTreeSet<GlobalOp>,
    /// Variables whose history is kept in a ring buffer
    pub delayed_variables: BTreeSet<String>,
    /// Ring buffer length, the largest delay of an outgoing projection
    pub max_delay: u32,
    /// Keep a history of emitted spikes
    pub delayed_spikes: bool,
    /// Input channels, declared ones plus those of incoming projections
    pub targets: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedTable {
    populations: BTreeMap<usize, PopulationInfo>,
}

impl DerivedTable {
    pub fn population(&self, id: usize) -> Result<&PopulationInfo> {
        self.populations
            .get(&id)
            .ok_or(NeurogenError::UnknownPopulation(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&usize, &PopulationInfo)> {
        self.populations.iter()
    }
}

/// Build the derived table, iterating until no set changes.
pub fn propagate(network: &Network) -> Result<DerivedTable> {
    let mut table = DerivedTable::default();
    for pop in &network.populations {
        let info = PopulationInfo {
            global_operations: pop.global_operations.iter().cloned().collect(),
            targets: pop.targets.iter().cloned().collect(),
            ..PopulationInfo::default()
        };
        table.populations.insert(pop.id, info);
    }

    let mut rounds = 0;
    loop {
        rounds += 1;
        let mut changed = false;

        for proj in &network.projections {
            // Views resolve to the population holding the data
            let pre_id = proj.pre.population;
            let post_id = proj.post.population;
            let pre_kind = network.population(pre_id)?.kind;

            let pre = entry(&mut table, pre_id)?;
            for op in &proj.synapse.pre_global_operations {
                changed |= pre.global_operations.insert(op.clone());
            }

            if proj.delay.needs_buffer() {
                let delay = proj.delay.max_delay();
                if pre.max_delay < delay {
                    pre.max_delay = delay;
                    changed = true;
                }
                // Rate-coded transmission reads variable history, spike
                // events read spike history
                match (proj.is_spiking(), pre_kind) {
                    (false, _) => {
                        let pre_pop = network.population(pre_id)?;
                        for var in delayed_pre_variables(proj) {
                            if pre_pop.attribute(&var).is_some() {
                                changed |= pre.delayed_variables.insert(var);
                            }
                        }
                    }
                    (true, NeuronKind::Spike) => {
                        if !pre.delayed_spikes {
                            pre.delayed_spikes = true;
                            changed = true;
                        }
                    }
                    (true, NeuronKind::Rate) => {}
                }
            }

            let post = entry(&mut table, post_id)?;
            for op in &proj.synapse.post_global_operations {
                changed |= post.global_operations.insert(op.clone());
            }
            changed |= post.targets.insert(proj.target.clone());
        }

        if !changed {
            break;
        }
    }

    trace!(rounds, "requirement propagation reached a fixed point");
    Ok(table)
}

fn entry(table: &mut DerivedTable, id: usize) -> Result<&mut PopulationInfo> {
    table
        .populations
        .get_mut(&id)
        .ok_or(NeurogenError::UnknownPopulation(id))
}

/// Pre-synaptic variables read by the transmission of a delayed projection
fn delayed_pre_variables(proj: &neurogen_core::Projection) -> BTreeSet<String> {
    let mut vars: BTreeSet<String> = proj.synapse.dependencies.pre.iter().cloned().collect();
    let psp = proj.synapse.psp.as_deref().unwrap_or(crate::DEFAULT_RATE_PSP);
    for symbol in template::symbols(psp) {
        if let Some(name) = symbol.strip_prefix("pre.") {
            if !name.contains('(') {
                vars.insert(name.to_string());
            }
        }
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurogen_core::{GeneratorConfig, GlobalOpKind, NetworkDescription};

    fn network(json: &str) -> Network {
        let desc = NetworkDescription::from_json(json).unwrap();
        Network::from_description(&desc, &GeneratorConfig::default()).unwrap()
    }

    const TWO_PROJECTIONS: &str = r#"{
        "populations": [
            {"id": 0, "name": "a", "size": 10, "neuron_type": "rate",
             "attributes": [{"name": "r", "locality": "local"}]},
            {"id": 1, "name": "b", "size": 10, "neuron_type": "rate",
             "attributes": [{"name": "r", "locality": "local"}]}
        ],
        "projections": [
            {"id": 0, "pre": 0, "post": 1, "target": "exc",
             "synapse": {"attributes": [{"name": "w", "locality": "local"}],
                         "pre_global_operations": [{"function": "mean", "variable": "r"}]},
             "delay": {"uniform": 3}},
            {"id": 1, "pre": {"population": 0, "ranks": [1, 2, 3]}, "post": 1, "target": "inh",
             "synapse": {"attributes": [{"name": "w", "locality": "local"}],
                         "pre_global_operations": [{"function": "mean", "variable": "r"}],
                         "post_global_operations": [{"function": "max", "variable": "r"}]},
             "delay": {"uniform": 5}}
        ]
    }"#;

    #[test]
    fn test_global_operations_deduplicated_across_views() {
        let table = propagate(&network(TWO_PROJECTIONS)).unwrap();
        let pre = table.population(0).unwrap();
        assert_eq!(pre.global_operations.len(), 1);
        let op = pre.global_operations.iter().next().unwrap();
        assert_eq!(op.kind, GlobalOpKind::Mean);

        let post = table.population(1).unwrap();
        assert_eq!(post.global_operations.len(), 1);
        assert_eq!(
            post.targets.iter().cloned().collect::<Vec<_>>(),
            vec!["exc".to_string(), "inh".to_string()]
        );
    }

    #[test]
    fn test_delayed_variables_from_default_transmission() {
        let table = propagate(&network(TWO_PROJECTIONS)).unwrap();
        let pre = table.population(0).unwrap();
        assert_eq!(pre.max_delay, 5);
        assert!(pre.delayed_variables.contains("r"));
        assert!(table.population(1).unwrap().delayed_variables.is_empty());
    }

    #[test]
    fn test_rate_synapse_from_spiking_population_is_delayed() {
        let json = r#"{
            "populations": [
                {"id": 0, "name": "a", "size": 10, "neuron_type": "spike",
                 "attributes": [{"name": "v", "locality": "local"}],
                 "spike": {"condition": "${v} > 1.0"}},
                {"id": 1, "name": "b", "size": 10, "neuron_type": "rate",
                 "attributes": [{"name": "r", "locality": "local"}]}
            ],
            "projections": [
                {"id": 0, "pre": 0, "post": 1, "target": "exc",
                 "synapse": {"psp": "${w} * ${pre.v}",
                             "attributes": [{"name": "w", "locality": "local"}]},
                 "delay": {"uniform": 4}}
            ]
        }"#;
        let table = propagate(&network(json)).unwrap();
        let pre = table.population(0).unwrap();
        assert_eq!(pre.max_delay, 4);
        assert!(pre.delayed_variables.contains("v"));
        assert!(!pre.delayed_spikes);
    }

    #[test]
    fn test_propagation_is_pure() {
        let net = network(TWO_PROJECTIONS);
        let before = net.clone();
        let first = propagate(&net).unwrap();
        let second = propagate(&net).unwrap();
        assert_eq!(first, second);
        assert_eq!(net, before);
    }
}
