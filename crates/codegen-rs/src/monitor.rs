//! Recorders.
//!
//! Every population and projection gets a recorder class deriving from the
//! `Monitor` base of `recorder.h`. A recorder is a passive observer: the
//! network calls `record()` on every registered instance at the end of each
//! step, and the instance samples the attributes whose `record_<name>` flag
//! is set when `(t - offset) % period == 0`. Spike events are collected
//! every step into a sparse per-neuron list of timestamps.

use neurogen_core::{
    AttrKind, Backend, GeneratorConfig, Locality, Network, NeuronKind, ObjectId, Population,
    Projection, ProjectionKind, Result, StorageFormat,
};
use tracing::debug;

use crate::artifacts::Diagnostic;
use crate::fragment::{FragmentKind, FragmentSet};
use crate::population;
use crate::projection;
use crate::propagate::DerivedTable;

/// One recordable attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub name: String,
    pub ctype: String,
    pub locality: Locality,
}

/// Recorder class of one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderSpec {
    pub object: ObjectId,
    pub class: String,
    pub attributes: Vec<Recorded>,
    pub spikes: bool,
}

pub struct MonitorGenerator<'a> {
    config: &'a GeneratorConfig,
    network: &'a Network,
    table: &'a DerivedTable,
}

impl<'a> MonitorGenerator<'a> {
    pub fn new(config: &'a GeneratorConfig, network: &'a Network, table: &'a DerivedTable) -> Self {
        Self {
            config,
            network,
            table,
        }
    }

    fn cuda(&self) -> bool {
        self.config.backend == Backend::Cuda
    }

    /// Recorder classes of the network, skipped attributes reported in
    /// `diagnostics`
    pub fn plan(&self, diagnostics: &mut Vec<Diagnostic>) -> Result<Vec<RecorderSpec>> {
        let mut specs = Vec::new();
        for pop in &self.network.populations {
            specs.push(self.population_spec(pop)?);
        }
        for proj in &self.network.projections {
            if let Some(spec) = self.projection_spec(proj, diagnostics) {
                specs.push(spec);
            }
        }
        Ok(specs)
    }

    fn population_spec(&self, pop: &Population) -> Result<RecorderSpec> {
        let info = self.table.population(pop.id)?;
        let real = self.config.precision.ctype();
        let mut attributes = Vec::new();

        // Inputs first, then the declared variables
        for target in &info.targets {
            let name = match pop.kind {
                NeuronKind::Rate => format!("_sum_{}", target),
                NeuronKind::Spike => format!("g_{}", target),
            };
            if pop.attribute(&name).is_none() {
                attributes.push(Recorded {
                    name,
                    ctype: real.to_string(),
                    locality: Locality::Local,
                });
            }
        }
        for attr in pop.attributes.iter().filter(|a| a.kind == AttrKind::Variable) {
            attributes.push(Recorded {
                name: attr.name.clone(),
                ctype: attr.ctype.clone(),
                locality: attr.locality,
            });
        }

        Ok(RecorderSpec {
            object: pop.object(),
            class: format!("PopRecorder{}", pop.id),
            attributes,
            spikes: pop.is_spiking(),
        })
    }

    fn projection_spec(&self, proj: &Projection, diagnostics: &mut Vec<Diagnostic>) -> Option<RecorderSpec> {
        if matches!(proj.kind, ProjectionKind::Transpose { .. }) {
            return None;
        }
        let object = proj.object();
        let mut attributes = Vec::new();
        for attr in proj.synapse.attributes.iter().filter(|a| a.kind == AttrKind::Variable) {
            let locality = proj.effective_locality(attr);
            if locality == Locality::Local {
                let reason = match proj.kind {
                    ProjectionKind::WeightSharing { .. } => Some("shared kernels have no per-synapse values".to_string()),
                    _ if proj.format != StorageFormat::Lil => Some(format!("{} storage", proj.format)),
                    _ => None,
                };
                if let Some(reason) = reason {
                    diagnostics.push(Diagnostic::new(
                        object,
                        format!("variable '{}' is not recorded ({})", attr.name, reason),
                    ));
                    continue;
                }
            }
            attributes.push(Recorded {
                name: attr.name.clone(),
                ctype: attr.ctype.clone(),
                locality,
            });
        }
        Some(RecorderSpec {
            object,
            class: format!("ProjRecorder{}", proj.id),
            attributes,
            spikes: false,
        })
    }

    /// Recorder class fragments
    pub fn build(&self, specs: &[RecorderSpec]) -> FragmentSet {
        let mut fragments = FragmentSet::new();
        for spec in specs {
            let text = match spec.object {
                ObjectId::Population(id) => self.population_class(spec, id),
                ObjectId::Projection(id) => self.projection_class(spec, id),
            };
            debug!(object = %spec.object, attributes = spec.attributes.len(), "generated recorder");
            fragments.push(spec.object, FragmentKind::Recorder, text);
        }
        fragments
    }

    fn population_class(&self, spec: &RecorderSpec, id: usize) -> String {
        let pop = format!("pop{}", id);
        let mut members = String::new();
        let mut init = String::new();
        let mut record = String::new();
        let mut size = String::new();
        let mut clear = String::new();

        for a in &spec.attributes {
            let (x, t) = (&a.name, &a.ctype);
            match a.locality {
                Locality::Global => {
                    members.push_str(&format!("    std::vector<{t}> {x};\n    bool record_{x};\n"));
                    record.push_str(&format!(
                        "        if (this->record_{x})\n            this->{x}.push_back({pop}.{x});\n"
                    ));
                    size.push_str(&format!("        size_in_bytes += sizeof({t}) * {x}.capacity();\n"));
                }
                _ => {
                    members.push_str(&format!(
                        "    std::vector<std::vector<{t}>> {x};\n    bool record_{x};\n"
                    ));
                    record.push_str(&format!(
                        "        if (this->record_{x}) {{\n\
                         \x20           if (!this->partial)\n\
                         \x20               this->{x}.push_back({pop}.{x});\n\
                         \x20           else {{\n\
                         \x20               std::vector<{t}> tmp;\n\
                         \x20               for (unsigned int i = 0; i < this->ranks.size(); i++)\n\
                         \x20                   tmp.push_back({pop}.{x}[this->ranks[i]]);\n\
                         \x20               this->{x}.push_back(tmp);\n\
                         \x20           }}\n\
                         \x20       }}\n"
                    ));
                    size.push_str(&format!(
                        "        for (auto it = {x}.cbegin(); it != {x}.cend(); it++)\n\
                         \x20           size_in_bytes += sizeof({t}) * it->capacity();\n"
                    ));
                }
            }
            init.push_str(&format!("        this->record_{x} = false;\n"));
            clear.push_str(&format!("        this->{x}.clear();\n"));
        }

        let mut spikes = String::new();
        if spec.spikes {
            members.push_str(
                "    std::map<int, std::vector<long int>> spike;\n\
                 \x20   bool record_spike;\n\
                 \x20   void clear_spike() {\n\
                 \x20       for (auto it = spike.begin(); it != spike.end(); it++)\n\
                 \x20           it->second.clear();\n\
                 \x20   }\n",
            );
            init.push_str(&format!(
                "        if (!this->partial) {{\n\
                 \x20           for (int i = 0; i < {pop}.size; i++)\n\
                 \x20               this->spike[i] = std::vector<long int>();\n\
                 \x20       }} else {{\n\
                 \x20           for (unsigned int i = 0; i < this->ranks.size(); i++)\n\
                 \x20               this->spike[this->ranks[i]] = std::vector<long int>();\n\
                 \x20       }}\n\
                 \x20       this->record_spike = false;\n"
            ));
            // Only pre-seeded ranks are recorded
            spikes.push_str(&format!(
                "        if (this->record_spike) {{\n\
                 \x20           for (unsigned int i = 0; i < {pop}.spiked.size(); i++) {{\n\
                 \x20               auto it = this->spike.find({pop}.spiked[i]);\n\
                 \x20               if (it != this->spike.end())\n\
                 \x20                   it->second.push_back(t);\n\
                 \x20           }}\n\
                 \x20       }}\n"
            ));
            size.push_str(
                "        for (auto it = spike.cbegin(); it != spike.cend(); it++)\n\
                 \x20           size_in_bytes += sizeof(long int) * it->second.capacity();\n",
            );
            clear.push_str("        clear_spike();\n");
        }

        let download = self.download(spec, &pop);
        self.class(spec, &members, &init, &download, &spikes, &record, &size, &clear)
    }

    fn projection_class(&self, spec: &RecorderSpec, id: usize) -> String {
        let proj = format!("proj{}", id);
        let mut members = String::new();
        let mut init = String::new();
        let mut record = String::new();
        let mut size = String::new();
        let mut clear = String::new();

        for a in &spec.attributes {
            let (x, t) = (&a.name, &a.ctype);
            let (container, value, element) = match a.locality {
                Locality::Global => (
                    format!("std::vector<{t}>"),
                    format!("{proj}.{x}"),
                    String::new(),
                ),
                Locality::Semiglobal => (
                    format!("std::vector<std::vector<{t}>>"),
                    format!("{proj}.{x}[n]"),
                    format!("std::vector<{t}>"),
                ),
                Locality::Local => (
                    format!("std::vector<std::vector<std::vector<{t}>>>"),
                    format!("{proj}.{x}[n]"),
                    format!("std::vector<std::vector<{t}>>"),
                ),
            };
            members.push_str(&format!("    {container} {x};\n    bool record_{x};\n"));
            if a.locality == Locality::Global {
                record.push_str(&format!(
                    "        if (this->record_{x})\n            this->{x}.push_back({value});\n"
                ));
                size.push_str(&format!("        size_in_bytes += sizeof({t}) * {x}.capacity();\n"));
            } else {
                // Ranks designate post-synaptic neurons; missing dendrites are skipped
                record.push_str(&format!(
                    "        if (this->record_{x}) {{\n\
                     \x20           {element} tmp;\n\
                     \x20           if (!this->partial) {{\n\
                     \x20               for (int n = 0; n < {proj}.nb_dendrites(); n++)\n\
                     \x20                   tmp.push_back({value});\n\
                     \x20           }} else {{\n\
                     \x20               for (unsigned int i = 0; i < this->ranks.size(); i++) {{\n\
                     \x20                   int n = {proj}.dendrite_index(this->ranks[i]);\n\
                     \x20                   if (n >= 0)\n\
                     \x20                       tmp.push_back({value});\n\
                     \x20               }}\n\
                     \x20           }}\n\
                     \x20           this->{x}.push_back(tmp);\n\
                     \x20       }}\n"
                ));
                size.push_str(&format!(
                    "        size_in_bytes += sizeof({t}) * {x}.size() * (this->partial ? this->ranks.size() : {proj}.nb_dendrites());\n"
                ));
            }
            init.push_str(&format!("        this->record_{x} = false;\n"));
            clear.push_str(&format!("        this->{x}.clear();\n"));
        }

        let download = self.download(spec, &proj);
        self.class(spec, &members, &init, &download, "", &record, &size, &clear)
    }

    /// Device results are fetched only when something reads them: spikes
    /// at every step, variables on sampled steps.
    fn download(&self, spec: &RecorderSpec, object: &str) -> String {
        if !self.cuda() {
            return String::new();
        }
        let mut wanted = Vec::new();
        if spec.spikes {
            wanted.push("this->record_spike".to_string());
        }
        if !spec.attributes.is_empty() {
            let flags: Vec<String> = spec
                .attributes
                .iter()
                .map(|a| format!("this->record_{}", a.name))
                .collect();
            wanted.push(format!("(sampling && ({}))", flags.join(" || ")));
        }
        if wanted.is_empty() {
            return String::new();
        }
        format!(
            "        if ({})\n            {object}.device_to_host();\n",
            wanted.join(" || ")
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn class(
        &self,
        spec: &RecorderSpec,
        members: &str,
        init: &str,
        download: &str,
        spikes: &str,
        record: &str,
        size: &str,
        clear: &str,
    ) -> String {
        let c = &spec.class;
        format!(
            "class {c} : public Monitor {{\n\
             public:\n\
             \x20   {c}(std::vector<int> ranks, int period, long int offset)\n\
             \x20       : Monitor(ranks, period, offset) {{\n\
             {init}\
             \x20   }}\n\n\
             {members}\n\
             \x20   void record() {{\n\
             \x20       bool sampling = (t - this->offset_) % this->period_ == 0;\n\
             {download}\
             {spikes}\
             \x20       if (!sampling)\n\
             \x20           return;\n\
             {record}\
             \x20   }}\n\n\
             \x20   long int size_in_bytes() {{\n\
             \x20       long int size_in_bytes = 0;\n\
             {size}\
             \x20       return size_in_bytes;\n\
             \x20   }}\n\n\
             \x20   void clear() {{\n\
             {clear}\
             \x20   }}\n\
             }};\n\n"
        )
    }
}

/// `recorder.h`: the monitor base class followed by every recorder class
pub fn recorder_header(network: &Network, classes: &str) -> String {
    let mut includes = String::new();
    let mut instances = String::new();
    for pop in &network.populations {
        includes.push_str(&format!("#include \"{}.hpp\"\n", population::instance(pop)));
        instances.push_str(&format!(
            "extern {} {};\n",
            population::struct_name(pop),
            population::instance(pop)
        ));
    }
    for proj in &network.projections {
        includes.push_str(&format!("#include \"{}.hpp\"\n", projection::instance(proj)));
        instances.push_str(&format!(
            "extern {} {};\n",
            projection::struct_name(proj),
            projection::instance(proj)
        ));
    }
    format!(
        "/*\n *  recorder.h\n */\n\
         #pragma once\n\
         #include <vector>\n\
         #include <map>\n\
         {includes}\n\
         extern long int t;\n\
         {instances}\n\
         /*\n\
         \x20* Base class of every recorder. An empty rank list or the single\n\
         \x20* rank -1 selects the whole object.\n\
         \x20*/\n\
         class Monitor {{\n\
         public:\n\
         \x20   Monitor(std::vector<int> ranks, int period, long int offset) {{\n\
         \x20       this->ranks = ranks;\n\
         \x20       this->period_ = period > 0 ? period : 1;\n\
         \x20       this->offset_ = offset;\n\
         \x20       this->partial = !(ranks.empty() || (ranks.size() == 1 && ranks[0] == -1));\n\
         \x20   }}\n\
         \x20   virtual ~Monitor() {{}}\n\n\
         \x20   virtual void record() = 0;\n\
         \x20   virtual long int size_in_bytes() = 0;\n\
         \x20   virtual void clear() = 0;\n\n\
         \x20   std::vector<int> ranks;\n\
         \x20   int period_;\n\
         \x20   long int offset_;\n\
         \x20   bool partial;\n\
         }};\n\n\
         {classes}"
    )
}
