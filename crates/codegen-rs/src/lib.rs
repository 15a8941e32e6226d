//! # Neurogen Codegen
//!
//! Turns a validated network description into the C++ sources of a
//! simulator plus its Python binding layer.
//!
//! ## Pipeline
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Requirement propagation | [`propagate`] | Derived table of reductions and delays |
//! | Populations | [`population`] | `PopStruct<ID>` and its step calls |
//! | Projections | [`projection`] | `ProjStruct<ID>` over a [`connectivity`] strategy |
//! | Recorders | [`monitor`] | `recorder.h` |
//! | Assembly | [`backend`] | `network.h` plus `network.cpp` or the `.cu` pair |
//! | Bindings | [`binding`] | `bindings.pyx` |
//!
//! Every generator produces [`fragment::Fragment`]s; assembly only
//! concatenates them, so objects never see each other's code.
//!
//! ## Example
//!
//! ```no_run
//! use neurogen_codegen::generate;
//! use neurogen_core::{GeneratorConfig, NetworkDescription};
//!
//! let desc = NetworkDescription::from_json(&std::fs::read_to_string("network.json")?)?;
//! let artifacts = generate(&desc, &GeneratorConfig::load("neurogen.toml")?)?;
//! artifacts.write_to("build/generated")?;
//! # Ok::<(), neurogen_core::NeurogenError>(())
//! ```

use neurogen_core::{GeneratorConfig, Network, NetworkDescription, ObjectId, Result};
use tracing::info;

pub mod artifacts;
pub mod attributes;
pub mod backend;
pub mod binding;
pub mod connectivity;
pub mod fragment;
pub mod globalops;
pub mod monitor;
pub mod population;
pub mod projection;
pub mod propagate;
pub mod template;

pub use artifacts::{Artifacts, Diagnostic};
pub use fragment::{Fragment, FragmentKind, FragmentSet};

/// Transmitted value of a rate-coded synapse without `psp`
pub const DEFAULT_RATE_PSP: &str = "${w} * ${pre.r}";

/// Increment of the target conductance of a spiking synapse without `psp`
pub const DEFAULT_SPIKE_PSP: &str = "${w}";

/// Validate `desc` against `config` and generate the complete source set.
pub fn generate(desc: &NetworkDescription, config: &GeneratorConfig) -> Result<Artifacts> {
    config.validate()?;
    let network = Network::from_description(desc, config)?;
    generate_network(&network, config)
}

/// Generate the source set of an already validated network.
pub fn generate_network(network: &Network, config: &GeneratorConfig) -> Result<Artifacts> {
    let table = propagate::propagate(network)?;
    let mut fragments = FragmentSet::new();
    let mut artifacts = Artifacts::default();

    let populations = population::PopulationGenerator::new(config);
    for pop in &network.populations {
        fragments.extend(populations.build(pop, table.population(pop.id)?)?);
    }
    let projections = projection::ProjectionGenerator::new(config, network, &table);
    for proj in &network.projections {
        fragments.extend(projections.build(proj)?);
    }

    let monitors = monitor::MonitorGenerator::new(config, network, &table);
    let recorders = monitors.plan(&mut artifacts.diagnostics)?;
    fragments.extend(monitors.build(&recorders));
    fragments.extend(binding::BindingGenerator::new(config, network, &table).build(&recorders)?);

    for pop in &network.populations {
        artifacts.insert(format!("{}.hpp", population::instance(pop)), header_of(&fragments, pop.object()));
    }
    for proj in &network.projections {
        artifacts.insert(format!("{}.hpp", projection::instance(proj)), header_of(&fragments, proj.object()));
    }
    artifacts.insert(
        "recorder.h",
        monitor::recorder_header(network, &fragments.concat(FragmentKind::Recorder)),
    );
    backend::assemble(config, network, &fragments, &mut artifacts);
    artifacts.insert("bindings.pyx", binding::bindings_file(config, network, &fragments));

    info!(
        backend = %config.backend,
        populations = network.populations.len(),
        projections = network.projections.len(),
        recorders = recorders.len(),
        files = artifacts.files.len(),
        diagnostics = artifacts.diagnostics.len(),
        "generated network"
    );
    Ok(artifacts)
}

fn header_of(fragments: &FragmentSet, owner: ObjectId) -> String {
    fragments
        .of_owner(owner)
        .filter(|f| f.kind() == FragmentKind::Header)
        .map(|f| f.text())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::tests::{RATE, SPIKE};
    use neurogen_core::{Backend, NeurogenError};

    fn desc(json: &str) -> NetworkDescription {
        NetworkDescription::from_json(json).unwrap()
    }

    #[test]
    fn test_openmp_artifact_set() {
        let artifacts = generate(&desc(RATE), &GeneratorConfig::default()).unwrap();
        let names: Vec<&str> = artifacts.names().collect();
        assert_eq!(
            names,
            vec!["bindings.pyx", "network.cpp", "network.h", "pop0.hpp", "pop1.hpp", "proj0.hpp", "recorder.h"]
        );
        assert!(artifacts.get("pop1.hpp").unwrap().contains("struct PopStruct1 {"));
        assert!(artifacts.get("proj0.hpp").unwrap().contains("struct ProjStruct0 {"));
        assert!(artifacts.get("network.cpp").unwrap().contains("    proj0.compute_psp();\n"));
        assert!(artifacts.get("recorder.h").unwrap().contains("class PopRecorder1 : public Monitor {"));
        assert!(artifacts.diagnostics.is_empty());
    }

    #[test]
    fn test_cuda_artifact_set() {
        let json = RATE.replace("\"target\": \"exc\",", "\"target\": \"exc\", \"storage_format\": \"csr\",");
        let config = GeneratorConfig {
            backend: Backend::Cuda,
            ..GeneratorConfig::default()
        };
        let artifacts = generate(&desc(&json), &config).unwrap();
        assert!(artifacts.get("network_host.cu").is_some());
        assert!(artifacts.get("network_device.cu").is_some());
        assert!(artifacts.get("network.cpp").is_none());
    }

    #[test]
    fn test_transpose_initialized_after_its_forward() {
        // the transpose takes id 0, its forward id 1
        let json = RATE
            .replace(
                "{\"id\": 0, \"pre\": 0, \"post\": 1, \"target\": \"exc\",",
                "{\"id\": 1, \"pre\": 0, \"post\": 1, \"target\": \"exc\",",
            )
            .replace(
                "\"projections\": [\n",
                "\"projections\": [\n            {\"id\": 0, \"pre\": 1, \"post\": 0, \"target\": \"fb\", \"kind\": {\"transpose\": 1},\n             \"synapse\": {\"attributes\": []}},\n",
            );
        let artifacts = generate(&desc(&json), &GeneratorConfig::default()).unwrap();
        let network = artifacts.get("network.cpp").unwrap();
        let forward = network.find("    proj1.init_projection();\n").unwrap();
        let transpose = network.find("    proj0.init_projection();\n").unwrap();
        assert!(forward < transpose);
        assert!(artifacts.get("proj0.hpp").unwrap().contains("assert(total == proj1.nb_synapses());"));

        let bindings = artifacts.get("bindings.pyx").unwrap();
        assert!(bindings.contains("proj1.init_connectivity("));
        assert!(!bindings.contains("proj0.init_connectivity("));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let first = generate(&desc(SPIKE), &GeneratorConfig::default()).unwrap();
        let second = generate(&desc(SPIKE), &GeneratorConfig::default()).unwrap();
        assert_eq!(first.files, second.files);
    }

    #[test]
    fn test_invalid_config_rejected_before_generation() {
        let config = GeneratorConfig {
            num_threads: 0,
            ..GeneratorConfig::default()
        };
        assert!(matches!(generate(&desc(RATE), &config), Err(NeurogenError::Config(_))));
    }

    #[test]
    fn test_unsupported_format_reports_diagnostic() {
        let json = RATE.replace("\"target\": \"exc\",", "\"target\": \"exc\", \"storage_format\": \"csr\",");
        let artifacts = generate(&desc(&json), &GeneratorConfig::default()).unwrap();
        assert!(artifacts
            .diagnostics
            .iter()
            .any(|d| d.to_string() == "proj0: variable 'w' is not recorded (csr storage)"));
    }

    #[test]
    fn test_write_generated_sources() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = generate(&desc(RATE), &GeneratorConfig::default()).unwrap();
        artifacts.write_to(dir.path()).unwrap();
        let header = std::fs::read_to_string(dir.path().join("network.h")).unwrap();
        assert!(header.contains("#include \"proj0.hpp\""));
        assert!(dir.path().join("bindings.pyx").exists());
    }
}
