//! Python binding layer: `bindings.pyx`.
//!
//! Declares the generated structures to Cython and wraps every population,
//! projection and recorder in a Python class. Declarations mirror the
//! accessors the C++ headers define: a missing or misspelled one is a
//! compile error of the extension, never a silent mismatch.

use neurogen_core::{
    Attribute, Backend, Delay, GeneratorConfig, Locality, Network, ObjectId, Population, Projection,
    ProjectionKind, Result,
};
use tracing::debug;

use crate::fragment::{FragmentKind, FragmentSet};
use crate::monitor::RecorderSpec;
use crate::population;
use crate::projection;
use crate::propagate::DerivedTable;

/// How the attributes of an object are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Neuron,
    Synapse,
    Kernel,
}

/// One C++ method, declared to Cython and forwarded by the wrapper
#[derive(Debug, Clone)]
struct Method {
    ret: String,
    name: String,
    params: Vec<(String, &'static str)>,
}

impl Method {
    fn new(ret: impl Into<String>, name: impl Into<String>, params: Vec<(String, &'static str)>) -> Self {
        Self {
            ret: ret.into(),
            name: name.into(),
            params,
        }
    }

    fn declaration(&self) -> String {
        let types: Vec<&str> = self.params.iter().map(|(t, _)| t.as_str()).collect();
        format!("        {} {}({})\n", self.ret, self.name, types.join(", "))
    }

    fn wrapper(&self, instance: &str) -> String {
        let names: Vec<&str> = self.params.iter().map(|(_, n)| *n).collect();
        let signature = std::iter::once("self")
            .chain(names.iter().copied())
            .collect::<Vec<_>>()
            .join(", ");
        let call = format!("{}.{}({})", instance, self.name, names.join(", "));
        let body = if self.ret == "void" {
            call
        } else {
            format!("return {}", call)
        };
        format!("    def {}({}):\n        {}\n\n", self.name, signature, body)
    }
}

/// Cython spelling of a C++ scalar type
fn cy(ctype: &str) -> String {
    match ctype {
        "long int" => "long".into(),
        "long long int" => "long long".into(),
        other => other.into(),
    }
}

fn vector(t: &str) -> String {
    format!("vector[{}]", t)
}

fn int() -> String {
    "int".into()
}

/// Accessors of one attribute, matching the header of its owner
fn attribute_methods(attr: &Attribute, shape: Shape) -> Vec<Method> {
    let x = &attr.name;
    let t = cy(&attr.ctype);
    let get = |ret: String, prefix: &str, params: Vec<(String, &'static str)>| Method::new(ret, format!("get_{prefix}{x}"), params);
    let set = |prefix: &str, mut params: Vec<(String, &'static str)>, value: String| {
        params.push((value, "value"));
        Method::new("void", format!("set_{prefix}{x}"), params)
    };

    match (shape, attr.locality) {
        (_, Locality::Global) => vec![get(t.clone(), "", vec![]), set("", vec![], t)],
        (Shape::Neuron, _) => vec![
            get(vector(&t), "", vec![]),
            set("", vec![], vector(&t)),
            get(t.clone(), "single_", vec![(int(), "rank")]),
            set("single_", vec![(int(), "rank")], t),
        ],
        (Shape::Synapse | Shape::Kernel, Locality::Semiglobal) => vec![
            get(vector(&t), "", vec![]),
            set("", vec![], vector(&t)),
            get(t.clone(), "dendrite_", vec![(int(), "n")]),
            set("dendrite_", vec![(int(), "n")], t),
        ],
        (Shape::Synapse, Locality::Local) => vec![
            get(vector(&vector(&t)), "", vec![]),
            set("", vec![], vector(&vector(&t))),
            get(vector(&t), "dendrite_", vec![(int(), "n")]),
            set("dendrite_", vec![(int(), "n")], vector(&t)),
            get(t.clone(), "synapse_", vec![(int(), "n"), (int(), "k")]),
            set("synapse_", vec![(int(), "n"), (int(), "k")], t),
        ],
        (Shape::Kernel, Locality::Local) => vec![get(vector(&t), "", vec![]), set("", vec![], vector(&t))],
    }
}

fn property(name: &str, field: &str, instance: &str) -> String {
    format!(
        "    property {name}:\n\
         \x20       def __get__(self):\n\
         \x20           return {instance}.{field}\n\
         \x20       def __set__(self, value):\n\
         \x20           {instance}.{field} = value\n\n"
    )
}

fn learning_properties(instance: &str) -> String {
    [
        ("transmission", "_transmission"),
        ("plasticity", "_plasticity"),
        ("update", "_update"),
        ("update_period", "_update_period"),
        ("update_offset", "_update_offset"),
    ]
    .iter()
    .map(|(name, field)| property(name, field, instance))
    .collect()
}

const LEARNING_FIELDS: &str = "        bool _transmission\n\
                               \x20       bool _plasticity\n\
                               \x20       bool _update\n\
                               \x20       int _update_period\n\
                               \x20       long _update_offset\n";

fn declaration_block(header: &str, class: &str, fields: &str, methods: &[Method], instance: &str) -> String {
    let mut text = format!("cdef extern from \"{header}\":\n    cppclass {class}:\n{fields}");
    for m in methods {
        text.push_str(&m.declaration());
    }
    text.push_str("        long size_in_bytes()\n        void clear()\n\n");
    text.push_str(&format!("cdef extern from \"network.h\":\n    {class} {instance}\n\n"));
    text
}

fn wrapper_methods(methods: &[Method], instance: &str) -> String {
    let mut text: String = methods.iter().map(|m| m.wrapper(instance)).collect();
    text.push_str(&format!(
        "    def size_in_bytes(self):\n        return {instance}.size_in_bytes()\n\n\
         \x20   def clear(self):\n        {instance}.clear()\n\n"
    ));
    text
}

fn connectivity_methods() -> Vec<Method> {
    vec![
        Method::new(vector("int"), "get_post_rank", vec![]),
        Method::new(vector(&vector("int")), "get_pre_ranks", vec![]),
        Method::new(vector("int"), "get_dendrite_pre_rank", vec![(int(), "n")]),
        Method::new("int", "nb_dendrites", vec![]),
        Method::new("int", "dendrite_size", vec![(int(), "n")]),
        Method::new("int", "nb_synapses", vec![]),
    ]
}

pub struct BindingGenerator<'a> {
    config: &'a GeneratorConfig,
    network: &'a Network,
    table: &'a DerivedTable,
}

impl<'a> BindingGenerator<'a> {
    pub fn new(config: &'a GeneratorConfig, network: &'a Network, table: &'a DerivedTable) -> Self {
        Self {
            config,
            network,
            table,
        }
    }

    /// Declarations and wrapper classes of every object and recorder
    pub fn build(&self, recorders: &[RecorderSpec]) -> Result<FragmentSet> {
        let mut fragments = FragmentSet::new();
        for pop in &self.network.populations {
            let (decl, wrapper) = self.population(pop)?;
            fragments.push(pop.object(), FragmentKind::BindingDecl, decl);
            fragments.push(pop.object(), FragmentKind::BindingWrapper, wrapper);
        }
        for proj in &self.network.projections {
            let (decl, wrapper) = match proj.kind {
                ProjectionKind::Standard => self.standard(proj),
                ProjectionKind::Transpose { .. } => self.transpose(proj),
                ProjectionKind::WeightSharing { .. } => self.weight_sharing(proj),
            };
            fragments.push(proj.object(), FragmentKind::BindingDecl, decl);
            fragments.push(proj.object(), FragmentKind::BindingWrapper, wrapper);
        }
        for spec in recorders {
            let (decl, wrapper) = recorder(spec);
            fragments.push(spec.object, FragmentKind::BindingDecl, decl);
            fragments.push(spec.object, FragmentKind::BindingWrapper, wrapper);
        }
        debug!(
            objects = self.network.populations.len() + self.network.projections.len(),
            recorders = recorders.len(),
            "generated bindings"
        );
        Ok(fragments)
    }

    fn population(&self, pop: &Population) -> Result<(String, String)> {
        let name = population::instance(pop);
        let info = self.table.population(pop.id)?;
        let real = cy(self.config.precision.ctype());

        let mut methods: Vec<Method> = population::storage_attributes(pop, info, self.config.precision.ctype())
            .iter()
            .flat_map(|a| attribute_methods(a, Shape::Neuron))
            .collect();
        if !pop.is_spiking() {
            for target in &info.targets {
                methods.push(Method::new(vector(&real), format!("get_sum_{}", target), vec![]));
            }
        }
        if let Some(spike) = &pop.spike {
            methods.push(Method::new(vector("int"), "get_spiked", vec![]));
            methods.push(Method::new(vector("long"), "get_last_spike", vec![]));
            if spike.refractory.is_some() {
                methods.push(Method::new(vector("int"), "get_refractory", vec![]));
                methods.push(Method::new("void", "set_refractory", vec![(vector("int"), "value")]));
            }
        }

        let decl = declaration_block(
            &format!("{}.hpp", name),
            &population::struct_name(pop),
            "        int size\n        bool _active\n",
            &methods,
            &name,
        );
        let mut wrapper = format!(
            "cdef class {name}_wrapper:\n\n\
             \x20   property size:\n\
             \x20       def __get__(self):\n\
             \x20           return {name}.size\n\n"
        );
        wrapper.push_str(&property("active", "_active", &name));
        wrapper.push_str(&wrapper_methods(&methods, &name));
        Ok((decl, wrapper))
    }

    /// Parameters of `init_connectivity`, as its header declares them
    fn init_params(&self, proj: &Projection, attrs: &[Attribute]) -> Vec<(String, &'static str)> {
        let mut params = vec![(vector("int"), "post_ranks"), (vector(&vector("int")), "pre_ranks")];
        if let Some(w) = attrs.iter().find(|a| a.name == "w") {
            let t = cy(&w.ctype);
            let values = match w.locality {
                Locality::Local => vector(&vector(&t)),
                Locality::Semiglobal => vector(&t),
                Locality::Global => t,
            };
            params.push((values, "values"));
        }
        if matches!(proj.delay, Delay::NonUniform(_)) {
            params.push((vector(&vector("int")), "delays"));
        }
        params
    }

    fn standard(&self, proj: &Projection) -> (String, String) {
        let name = projection::instance(proj);
        let attrs = projection::storage_attributes(proj);
        let init = Method::new("void", "init_connectivity", self.init_params(proj, &attrs));

        let mut methods = connectivity_methods();
        methods.push(Method::new("int", "dendrite_index", vec![(int(), "rk_post")]));
        methods.extend(
            attrs
                .iter()
                .filter(|a| !a.name.starts_with('_'))
                .flat_map(|a| attribute_methods(a, Shape::Synapse)),
        );
        let structural = self.config.structural_plasticity
            && self.config.backend == Backend::OpenMp
            && proj.format.supports_dynamic_edges();
        if structural {
            let wtype = attrs
                .iter()
                .find(|a| a.name == "w")
                .map(|w| cy(&w.ctype))
                .unwrap_or_else(|| "double".into());
            methods.push(Method::new(
                "bool",
                "add_synapse",
                vec![(int(), "rk_post"), (int(), "rk_pre"), (wtype, "weight"), (int(), "delay")],
            ));
            methods.push(Method::new("bool", "remove_synapse", vec![(int(), "rk_post"), (int(), "rk_pre")]));
            if proj.synapse.pruning.is_some() {
                methods.push(Method::new("void", "start_pruning", vec![(int(), "period"), ("long".into(), "offset")]));
                methods.push(Method::new("void", "stop_pruning", vec![]));
            }
            if proj.synapse.creating.is_some() {
                methods.push(Method::new("void", "start_creating", vec![(int(), "period"), ("long".into(), "offset")]));
                methods.push(Method::new("void", "stop_creating", vec![]));
            }
        }

        let mut all = vec![init.clone()];
        all.extend(methods.iter().cloned());
        let decl = declaration_block(
            &format!("{}.hpp", name),
            &projection::struct_name(proj),
            LEARNING_FIELDS,
            &all,
            &name,
        );
        (decl, self.projection_wrapper(&name, &init, &methods))
    }

    fn weight_sharing(&self, proj: &Projection) -> (String, String) {
        let name = projection::instance(proj);
        let attrs = projection::storage_attributes(proj);
        let mut params = vec![(vector("int"), "post_ranks"), (vector(&vector("int")), "coords")];
        if let Some(w) = attrs.iter().find(|a| a.name == "w") {
            let t = cy(&w.ctype);
            let kernel = match w.locality {
                Locality::Global => t,
                _ => vector(&t),
            };
            params.push((kernel, "kernel"));
        }
        let init = Method::new("void", "init_connectivity", params);

        let mut methods = vec![
            Method::new(vector("int"), "get_post_rank", vec![]),
            Method::new(vector(&vector("int")), "get_pre_coords", vec![]),
            Method::new(vector("int"), "get_dendrite_pre_coords", vec![(int(), "n")]),
            Method::new("int", "nb_dendrites", vec![]),
            Method::new("int", "dendrite_size", vec![(int(), "n")]),
            Method::new("int", "nb_synapses", vec![]),
            Method::new("int", "dendrite_index", vec![(int(), "rk_post")]),
        ];
        methods.extend(attrs.iter().flat_map(|a| attribute_methods(a, Shape::Kernel)));

        let mut all = vec![init.clone()];
        all.extend(methods.iter().cloned());
        let decl = declaration_block(
            &format!("{}.hpp", name),
            &projection::struct_name(proj),
            LEARNING_FIELDS,
            &all,
            &name,
        );
        (decl, self.projection_wrapper(&name, &init, &methods))
    }

    /// A transposed projection owns no data besides its indices: the
    /// wrapper exposes the ranks and reports every other query as not
    /// available.
    fn transpose(&self, proj: &Projection) -> (String, String) {
        let name = projection::instance(proj);
        let real = cy(self.config.precision.ctype());
        let methods = connectivity_methods();
        let mut unavailable = vec![
            Method::new(vector(&vector(&real)), "connectivity_matrix", vec![]),
            Method::new(vector(&vector(&real)), "receptive_fields", vec![]),
        ];

        let mut decl_methods = methods.clone();
        decl_methods.extend(unavailable.iter().cloned());
        decl_methods.push(Method::new("bool", "save", vec![("string".into(), "filename")]));
        decl_methods.push(Method::new("bool", "load", vec![("string".into(), "filename")]));
        let decl = declaration_block(
            &format!("{}.hpp", name),
            &projection::struct_name(proj),
            LEARNING_FIELDS,
            &decl_methods,
            &name,
        );

        let mut wrapper = format!("cdef class {name}_wrapper:\n\n    def __init__(self):\n        pass\n\n");
        wrapper.push_str(&learning_properties(&name));
        wrapper.push_str(&format!("    def post_rank(self):\n        return {name}.get_post_rank()\n\n"));
        let mut forwarded = methods;
        forwarded.append(&mut unavailable);
        wrapper.push_str(&wrapper_methods(&forwarded, &name));
        wrapper.push_str(&format!(
            "    def save(self, filename):\n        return {name}.save(filename.encode('utf-8'))\n\n\
             \x20   def load(self, filename):\n        return {name}.load(filename.encode('utf-8'))\n\n"
        ));
        (decl, wrapper)
    }

    fn projection_wrapper(&self, name: &str, init: &Method, methods: &[Method]) -> String {
        let args: Vec<&str> = init.params.iter().map(|(_, n)| *n).collect();
        let mut text = format!(
            "cdef class {name}_wrapper:\n\n\
             \x20   def __init__(self, {}):\n\
             \x20       {name}.init_connectivity({})\n\n",
            args.join(", "),
            args.join(", ")
        );
        text.push_str(&learning_properties(name));
        text.push_str(&wrapper_methods(methods, name));
        text
    }
}

/// Recorder members as Cython types, mirroring the recorder class
fn recorder_member(spec: &RecorderSpec, ctype: &str, locality: Locality) -> String {
    let t = cy(ctype);
    let population = matches!(spec.object, ObjectId::Population(_));
    let depth = match (population, locality) {
        (_, Locality::Global) => 1,
        (true, _) | (false, Locality::Semiglobal) => 2,
        (false, Locality::Local) => 3,
    };
    (0..depth).fold(t, |inner, _| vector(&inner))
}

fn recorder(spec: &RecorderSpec) -> (String, String) {
    let c = &spec.class;
    let mut decl = format!(
        "cdef extern from \"recorder.h\":\n\
         \x20   cppclass {c}(Monitor):\n\
         \x20       {c}(vector[int], int, long) except +\n"
    );
    let mut wrapper = format!(
        "cdef class {c}_wrapper:\n\
         \x20   cdef {c}* thisptr\n\n\
         \x20   def __cinit__(self, list ranks, int period, long offset):\n\
         \x20       self.thisptr = new {c}(ranks, period, offset)\n\n\
         \x20   def __dealloc__(self):\n\
         \x20       removeRecorder(<Monitor*>self.thisptr)\n\
         \x20       del self.thisptr\n\n\
         \x20   def start(self):\n\
         \x20       addRecorder(<Monitor*>self.thisptr)\n\n\
         \x20   def stop(self):\n\
         \x20       removeRecorder(<Monitor*>self.thisptr)\n\n\
         \x20   def size_in_bytes(self):\n\
         \x20       return self.thisptr.size_in_bytes()\n\n\
         \x20   def clear(self):\n\
         \x20       self.thisptr.clear()\n\n"
    );

    let mut members: Vec<(String, String)> = spec
        .attributes
        .iter()
        .map(|a| (a.name.clone(), recorder_member(spec, &a.ctype, a.locality)))
        .collect();
    if spec.spikes {
        members.push(("spike".into(), "map[int, vector[long]]".into()));
    }
    for (x, t) in &members {
        decl.push_str(&format!("        {t} {x}\n        bool record_{x}\n"));
        for field in [x.clone(), format!("record_{x}")] {
            wrapper.push_str(&format!(
                "    property {field}:\n\
                 \x20       def __get__(self):\n\
                 \x20           return self.thisptr.{field}\n\
                 \x20       def __set__(self, value):\n\
                 \x20           self.thisptr.{field} = value\n\n"
            ));
        }
        if x != "spike" {
            wrapper.push_str(&format!(
                "    def clear_{x}(self):\n        self.thisptr.{x}.clear()\n\n"
            ));
        }
    }
    if spec.spikes {
        decl.push_str("        void clear_spike()\n");
        wrapper.push_str("    def clear_spike(self):\n        self.thisptr.clear_spike()\n\n");
    }
    decl.push_str("        long size_in_bytes()\n        void clear()\n\n");
    (decl, wrapper)
}

/// `bindings.pyx`: preamble, declarations, network functions, wrappers
pub fn bindings_file(config: &GeneratorConfig, network: &Network, fragments: &FragmentSet) -> String {
    let real = cy(config.precision.ctype());
    let mut text = format!(
        "# distutils: language = c++\n\
         # cython: embedsignature=True\n\
         #\n\
         # bindings.pyx: {} populations, {} projections, {} backend\n\n\
         from libcpp.vector cimport vector\n\
         from libcpp.map cimport map\n\
         from libcpp.string cimport string\n\
         from libcpp cimport bool\n\n\
         cdef extern from \"recorder.h\":\n\
         \x20   cppclass Monitor:\n\
         \x20       vector[int] ranks\n\
         \x20       int period_\n\
         \x20       long offset_\n\n\
         cdef extern from \"network.h\":\n\
         \x20   void initialize({real}, long)\n\
         \x20   void run(int)\n\
         \x20   int run_until(int, vector[int], bool)\n\
         \x20   void step()\n\
         \x20   long getTime()\n\
         \x20   void setTime(long)\n\
         \x20   {real} getDt()\n\
         \x20   void setDt({real})\n\
         \x20   void setNumberThreads(int)\n\
         \x20   void addRecorder(Monitor*)\n\
         \x20   void removeRecorder(Monitor*)\n\n",
        network.populations.len(),
        network.projections.len(),
        config.backend,
    );
    text.push_str(&fragments.concat(FragmentKind::BindingDecl));
    text.push_str(&format!(
        "# Simulation\n\n\
         def pyx_initialize({real} dt, long seed):\n\
         \x20   initialize(dt, seed)\n\n\
         def pyx_run(int nb_steps):\n\
         \x20   run(nb_steps)\n\n\
         def pyx_run_until(int steps, list populations, bool or_and):\n\
         \x20   return run_until(steps, populations, or_and)\n\n\
         def pyx_step():\n\
         \x20   step()\n\n\
         def get_time():\n\
         \x20   return getTime()\n\n\
         def set_time(long t):\n\
         \x20   setTime(t)\n\n\
         def get_dt():\n\
         \x20   return getDt()\n\n\
         def set_dt({real} dt):\n\
         \x20   setDt(dt)\n\n\
         def set_number_threads(int threads):\n\
         \x20   setNumberThreads(threads)\n\n"
    ));
    text.push_str(&fragments.concat(FragmentKind::BindingWrapper));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::Diagnostic;
    use crate::monitor::MonitorGenerator;
    use crate::projection::tests::{RATE, SPIKE};
    use crate::propagate::propagate;
    use neurogen_core::NetworkDescription;

    fn bindings(json: &str, config: &GeneratorConfig) -> String {
        let desc = NetworkDescription::from_json(json).unwrap();
        let net = Network::from_description(&desc, config).unwrap();
        let table = propagate(&net).unwrap();
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        let specs = MonitorGenerator::new(config, &net, &table).plan(&mut diagnostics).unwrap();
        let set = BindingGenerator::new(config, &net, &table).build(&specs).unwrap();
        bindings_file(config, &net, &set)
    }

    #[test]
    fn test_population_accessors() {
        let text = bindings(RATE, &GeneratorConfig::default());
        assert!(text.contains("cdef extern from \"pop1.hpp\":\n    cppclass PopStruct1:\n        int size\n"));
        assert!(text.contains("        vector[double] get_r()\n        void set_r(vector[double])\n"));
        assert!(text.contains("        double get_single_r(int)\n        void set_single_r(int, double)\n"));
        assert!(text.contains("        vector[double] get_sum_exc()\n"));
        assert!(text.contains("    PopStruct1 pop1\n"));
        assert!(text.contains("    def get_single_r(self, rank):\n        return pop1.get_single_r(rank)\n"));
        assert!(text.contains("    def set_r(self, value):\n        pop1.set_r(value)\n"));
    }

    #[test]
    fn test_projection_accessors_by_locality() {
        let text = bindings(RATE, &GeneratorConfig::default());
        assert!(text.contains(
            "        void init_connectivity(vector[int], vector[vector[int]], vector[vector[double]])\n"
        ));
        // local
        assert!(text.contains("        vector[vector[double]] get_w()\n"));
        assert!(text.contains("        double get_synapse_w(int, int)\n"));
        assert!(text.contains("        void set_dendrite_w(int, vector[double])\n"));
        // semiglobal
        assert!(text.contains("        double get_dendrite_trace(int)\n"));
        assert!(!text.contains("get_synapse_trace"));
        // global
        assert!(text.contains("        double get_eta()\n        void set_eta(double)\n"));
        assert!(text.contains(
            "    def __init__(self, post_ranks, pre_ranks, values):\n        proj0.init_connectivity(post_ranks, pre_ranks, values)\n"
        ));
        assert!(text.contains("    property plasticity:\n"));
    }

    #[test]
    fn test_single_weight_is_scalar() {
        let json = RATE.replace("\"target\": \"exc\",", "\"target\": \"exc\", \"single_weight\": true,");
        let text = bindings(&json, &GeneratorConfig::default());
        assert!(text.contains("        void init_connectivity(vector[int], vector[vector[int]], double)\n"));
        assert!(text.contains("        double get_w()\n        void set_w(double)\n"));
    }

    #[test]
    fn test_spiking_bindings_and_recorders() {
        let text = bindings(SPIKE, &GeneratorConfig::default());
        assert!(text.contains("        vector[int] get_spiked()\n        vector[long] get_last_spike()\n"));
        assert!(text.contains("    cppclass PopRecorder0(Monitor):\n        PopRecorder0(vector[int], int, long) except +\n"));
        assert!(text.contains("        map[int, vector[long]] spike\n        bool record_spike\n"));
        assert!(text.contains("        addRecorder(<Monitor*>self.thisptr)\n"));
        assert!(!text.contains("get__last_event"));
    }

    #[test]
    fn test_structural_methods_follow_config() {
        let json = SPIKE.replace(
            "\"post_spike\": [\"${w} += 0.01 * ${x}\"]",
            "\"post_spike\": [\"${w} += 0.01 * ${x}\"], \"pruning\": \"${w} < 0.0\"",
        );
        let plain = bindings(&json, &GeneratorConfig::default());
        assert!(!plain.contains("add_synapse"));

        let config = GeneratorConfig {
            structural_plasticity: true,
            ..GeneratorConfig::default()
        };
        let text = bindings(&json, &config);
        assert!(text.contains("        bool add_synapse(int, int, double, int)\n"));
        assert!(text.contains("        void start_pruning(int, long)\n"));
        assert!(!text.contains("start_creating"));
    }

    #[test]
    fn test_transpose_is_read_only() {
        let json = RATE.replace(
            "\n        ]\n    }",
            r#",
            {"id": 1, "pre": 1, "post": 0, "target": "fb", "kind": {"transpose": 0},
             "synapse": {"attributes": []}}
        ]
    }"#,
        );
        let text = bindings(&json, &GeneratorConfig::default());
        assert!(text.contains("cdef class proj1_wrapper:\n\n    def __init__(self):\n        pass\n"));
        assert!(text.contains("    def post_rank(self):\n        return proj1.get_post_rank()\n"));
        assert!(text.contains("        return proj1.save(filename.encode('utf-8'))\n"));
        assert!(!text.contains("proj1.init_connectivity"));
    }

    #[test]
    fn test_network_functions() {
        let text = bindings(RATE, &GeneratorConfig::default());
        assert!(text.starts_with("# distutils: language = c++\n"));
        assert!(text.contains("    void initialize(double, long)\n"));
        assert!(text.contains("def pyx_run_until(int steps, list populations, bool or_and):\n"));
        let decl = text.find("cdef extern from \"pop0.hpp\"").unwrap();
        let functions = text.find("# Simulation").unwrap();
        let wrapper = text.find("cdef class pop0_wrapper").unwrap();
        assert!(decl < functions && functions < wrapper);
    }
}
