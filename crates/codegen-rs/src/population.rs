//! Population generator.
//!
//! Emits `PopStruct<id>` with attribute storage, input accumulators, spike
//! bookkeeping, delay ring buffers, reductions and the per-step update, plus
//! the calls the network skeleton makes into it.

use neurogen_core::{
    AttrKind, Attribute, Backend, GeneratorConfig, Locality, Method, NeurogenError, NeuronKind,
    ObjectId, Population, Result,
};
use tracing::debug;

use crate::attributes::{attribute_code, AttributeRequest, LocalLayout, Owner};
use crate::connectivity::KernelArg;
use crate::fragment::{FragmentKind, FragmentSet};
use crate::globalops;
use crate::propagate::PopulationInfo;
use crate::template::{indent, render, statement, update_block, Scope, Site};

/// Instance name of a population, `pop3`
pub fn instance(pop: &Population) -> String {
    format!("pop{}", pop.id)
}

pub fn struct_name(pop: &Population) -> String {
    format!("PopStruct{}", pop.id)
}

/// Attributes stored by the structure: declared ones plus one conductance
/// per incoming target of a spiking population.
pub fn storage_attributes(pop: &Population, info: &PopulationInfo, ctype: &str) -> Vec<Attribute> {
    let mut attrs = pop.attributes.clone();
    if pop.kind == NeuronKind::Spike {
        for target in &info.targets {
            let name = format!("g_{}", target);
            if pop.attribute(&name).is_none() {
                attrs.push(Attribute {
                    name,
                    ctype: ctype.to_string(),
                    locality: Locality::Local,
                    kind: AttrKind::Variable,
                    method: Method::Exact,
                    init: "0.0".into(),
                    eq: None,
                });
            }
        }
    }
    attrs
}

// ============================================================================
// SYMBOLS
// ============================================================================

pub(crate) struct PopulationScope<'a> {
    pub pop: &'a Population,
    pub info: &'a PopulationInfo,
    pub attrs: &'a [Attribute],
    pub site: Site,
}

impl Scope for PopulationScope<'_> {
    fn resolve(&self, symbol: &str) -> Option<String> {
        match symbol {
            "t" => return Some("t".into()),
            "dt" => return Some("dt".into()),
            _ => {}
        }

        if let Some(target) = symbol.strip_prefix("sum.") {
            if !self.info.targets.contains(target) {
                return None;
            }
            return Some(match self.pop.kind {
                NeuronKind::Rate => format!("_sum_{}[i]", target),
                NeuronKind::Spike => format!("g_{}[i]", target),
            });
        }

        if let Some(op) = globalops::parse_symbol(symbol) {
            if !self.info.global_operations.contains(&op) {
                return None;
            }
            return Some(match self.site {
                Site::Host => op.member(),
                Site::Device => format!("(*{}_ptr)", op.member()),
            });
        }

        let attr = self.attrs.iter().find(|a| a.name == symbol)?;
        Some(match (attr.locality, self.site) {
            (Locality::Global, Site::Host) => attr.name.clone(),
            (Locality::Global, Site::Device) => format!("(*{}_ptr)", attr.name),
            _ => format!("{}[i]", attr.name),
        })
    }
}

// ============================================================================
// GENERATOR
// ============================================================================

/// Pieces of the population structure, assembled by [`PopulationGenerator::header`]
#[derive(Default)]
struct StructCode {
    declaration: String,
    initializer: String,
    methods: String,
    accessors: String,
    size_in_bytes: String,
    clear: String,
    host_to_device: String,
    device_to_host: String,
}

pub struct PopulationGenerator<'a> {
    config: &'a GeneratorConfig,
}

impl<'a> PopulationGenerator<'a> {
    pub fn new(config: &'a GeneratorConfig) -> Self {
        Self { config }
    }

    fn cuda(&self) -> bool {
        self.config.backend == Backend::Cuda
    }

    fn real(&self) -> &'static str {
        self.config.precision.ctype()
    }

    pub fn build(&self, pop: &Population, info: &PopulationInfo) -> Result<FragmentSet> {
        let object = ObjectId::Population(pop.id);
        let name = instance(pop);
        let attrs = storage_attributes(pop, info, self.real());
        let mut code = StructCode::default();

        for attr in &attrs {
            let request = AttributeRequest {
                name: &attr.name,
                ctype: &attr.ctype,
                locality: attr.locality,
                kind: attr.kind,
                init: &attr.init,
                layout: LocalLayout::Flat,
            };
            let c = attribute_code(object, self.config.backend, Owner::Population, &request)?;
            code.declaration.push_str(&c.declaration);
            code.initializer.push_str(&c.initializer);
            code.accessors.push_str(&c.accessors);
            code.size_in_bytes.push_str(&c.size_in_bytes);
            code.clear.push_str(&c.clear);
            code.host_to_device.push_str(&c.host_to_device);
            code.device_to_host.push_str(&c.device_to_host);
        }

        self.inputs(pop, info, &mut code);
        self.spikes(pop, &attrs, info, &mut code)?;
        self.delays(pop, info, &mut code)?;
        self.global_operations(pop, info, &mut code)?;

        let mut fragments = FragmentSet::new();

        if self.cuda() {
            let device = self.device_update(pop, info, &attrs)?;
            fragments.push(object, FragmentKind::DeviceCode, device);
            fragments.push(
                object,
                FragmentKind::DevicePrototypes,
                format!("void cuda_{}_step();\n", name),
            );
            fragments.push(object, FragmentKind::UpdateNeurons, format!("    cuda_{}_step();\n", name));
            fragments.push(object, FragmentKind::HostToDevice, format!("    {}.host_to_device();\n", name));
            fragments.push(object, FragmentKind::DeviceToHost, format!("    {}.device_to_host();\n", name));
        } else {
            code.methods.push_str(&self.host_update(pop, info, &attrs)?);
            fragments.push(object, FragmentKind::UpdateNeurons, format!("    {}.update();\n", name));
        }

        if let Some(condition) = &pop.stop_condition {
            let scope = PopulationScope {
                pop,
                info,
                attrs: &attrs,
                site: Site::Host,
            };
            let cond = render(condition, &scope, object, "stop condition")?;
            code.methods.push_str(&format!(
                "    bool stop_condition() {{\n\
                 \x20       for (int i = 0; i < size; i++) {{\n\
                 \x20           if ({})\n\
                 \x20               return true;\n\
                 \x20       }}\n\
                 \x20       return false;\n\
                 \x20   }}\n",
                cond.trim()
            ));
            let refresh = if self.cuda() {
                format!("                {}.device_to_host();\n", name)
            } else {
                String::new()
            };
            fragments.push(
                object,
                FragmentKind::StopCondition,
                format!(
                    "            case {id}:\n\
                     {refresh}\
                     \x20               pop_stop = {name}.stop_condition();\n\
                     \x20               break;\n",
                    id = pop.id
                ),
            );
        }

        if pop.kind == NeuronKind::Rate && !info.targets.is_empty() {
            fragments.push(object, FragmentKind::ResetInputs, self.reset_call(pop, info));
        }
        if info.max_delay > 1 {
            fragments.push(object, FragmentKind::UpdateDelay, format!("    {}.update_delay();\n", name));
        }
        if !info.global_operations.is_empty() {
            let calls: String = if self.cuda() {
                info.global_operations
                    .iter()
                    .map(|op| {
                        let ctype = attr_ctype(&attrs, &op.variable, self.real());
                        globalops::device_launch(&name, op, ctype, self.config.threads_per_block)
                    })
                    .collect()
            } else {
                format!("    {}.update_global_ops();\n", name)
            };
            fragments.push(object, FragmentKind::GlobalOps, calls);
        }

        fragments.push(
            object,
            FragmentKind::Instance,
            format!("extern {} {};\n", struct_name(pop), name),
        );
        fragments.push(
            object,
            FragmentKind::Initialize,
            format!("    {}.init_population();\n", name),
        );
        fragments.push(object, FragmentKind::Header, self.header(pop, code));

        debug!(population = pop.id, name = %pop.name, fragments = fragments.len(), "generated population");
        Ok(fragments)
    }

    fn reset_call(&self, pop: &Population, info: &PopulationInfo) -> String {
        let name = instance(pop);
        info.targets
            .iter()
            .map(|target| {
                if self.cuda() {
                    format!(
                        "    cudaMemset({n}.gpu__sum_{t}, 0, {n}.size * sizeof({r}));\n",
                        n = name,
                        t = target,
                        r = self.real()
                    )
                } else {
                    format!(
                        "    std::fill({n}._sum_{t}.begin(), {n}._sum_{t}.end(), 0.0);\n",
                        n = name,
                        t = target
                    )
                }
            })
            .collect()
    }

    /// Weighted-sum accumulators of rate-coded populations
    fn inputs(&self, pop: &Population, info: &PopulationInfo, code: &mut StructCode) {
        if pop.kind != NeuronKind::Rate {
            return;
        }
        let r = self.real();
        for target in &info.targets {
            code.declaration.push_str(&format!(
                "    // Weighted sum of target {t}\n    std::vector<{r}> _sum_{t};\n",
                t = target
            ));
            code.initializer.push_str(&format!(
                "    _sum_{t} = std::vector<{r}>(size, 0.0);\n",
                t = target
            ));
            code.accessors.push_str(&format!(
                "    std::vector<{r}> get_sum_{t}() {{ return _sum_{t}; }}\n",
                t = target
            ));
            code.size_in_bytes.push_str(&format!(
                "    size_in_bytes += sizeof({r}) * _sum_{t}.capacity();\n",
                t = target
            ));
            code.clear.push_str(&format!("    _sum_{t}.clear();\n", t = target));

            if self.cuda() {
                code.declaration
                    .push_str(&format!("    {r}* gpu__sum_{t};\n", t = target));
                code.initializer.push_str(&format!(
                    "    cudaMalloc((void**)&gpu__sum_{t}, size * sizeof({r}));\n\
                     \x20   cudaMemset(gpu__sum_{t}, 0, size * sizeof({r}));\n",
                    t = target
                ));
                code.device_to_host.push_str(&format!(
                    "    cudaMemcpy(_sum_{t}.data(), gpu__sum_{t}, size * sizeof({r}), cudaMemcpyDeviceToHost);\n",
                    t = target
                ));
                code.clear.push_str(&format!("    cudaFree(gpu__sum_{t});\n", t = target));
            }
        }
    }

    fn spikes(
        &self,
        pop: &Population,
        attrs: &[Attribute],
        info: &PopulationInfo,
        code: &mut StructCode,
    ) -> Result<()> {
        let Some(spike) = &pop.spike else {
            return Ok(());
        };

        code.declaration.push_str(
            "    // Spiking\n\
             \x20   std::vector<long int> last_spike;\n\
             \x20   std::vector<int> spiked;\n",
        );
        code.initializer.push_str(
            "    last_spike = std::vector<long int>(size, -10000L);\n\
             \x20   spiked.clear();\n",
        );
        code.accessors.push_str(
            "    std::vector<int> get_spiked() { return spiked; }\n\
             \x20   std::vector<long int> get_last_spike() { return last_spike; }\n",
        );
        code.size_in_bytes.push_str(
            "    size_in_bytes += sizeof(long int) * last_spike.capacity();\n\
             \x20   size_in_bytes += sizeof(int) * spiked.capacity();\n",
        );
        code.clear.push_str("    last_spike.clear();\n    spiked.clear();\n");

        if let Some(refractory) = &spike.refractory {
            let scope = PopulationScope {
                pop,
                info,
                attrs,
                site: Site::Host,
            };
            let period = render(refractory, &scope, ObjectId::Population(pop.id), "refractory period")?;
            code.declaration.push_str(
                "    std::vector<int> refractory;\n\
                 \x20   std::vector<int> refractory_remaining;\n",
            );
            code.initializer.push_str(&format!(
                "    refractory = std::vector<int>(size, 0);\n\
                 \x20   for (int i = 0; i < size; i++)\n\
                 \x20       refractory[i] = static_cast<int>({});\n\
                 \x20   refractory_remaining = std::vector<int>(size, 0);\n",
                period.trim()
            ));
            code.accessors.push_str(
                "    std::vector<int> get_refractory() { return refractory; }\n\
                 \x20   void set_refractory(std::vector<int> value) { refractory = value; }\n",
            );
            code.size_in_bytes.push_str(
                "    size_in_bytes += sizeof(int) * (refractory.capacity() + refractory_remaining.capacity());\n",
            );
            code.clear.push_str("    refractory.clear();\n    refractory_remaining.clear();\n");
        }

        if self.cuda() {
            code.declaration.push_str(
                "    long int* gpu_last_spike;\n\
                 \x20   int* gpu_spiked;\n\
                 \x20   unsigned int* gpu_spike_count;\n",
            );
            code.initializer.push_str(
                "    cudaMalloc((void**)&gpu_last_spike, size * sizeof(long int));\n\
                 \x20   cudaMemcpy(gpu_last_spike, last_spike.data(), size * sizeof(long int), cudaMemcpyHostToDevice);\n\
                 \x20   cudaMalloc((void**)&gpu_spiked, size * sizeof(int));\n\
                 \x20   cudaMalloc((void**)&gpu_spike_count, sizeof(unsigned int));\n\
                 \x20   cudaMemset(gpu_spike_count, 0, sizeof(unsigned int));\n",
            );
            code.device_to_host.push_str(
                "    unsigned int spike_count = 0;\n\
                 \x20   cudaMemcpy(&spike_count, gpu_spike_count, sizeof(unsigned int), cudaMemcpyDeviceToHost);\n\
                 \x20   spiked.resize(spike_count);\n\
                 \x20   cudaMemcpy(spiked.data(), gpu_spiked, spike_count * sizeof(int), cudaMemcpyDeviceToHost);\n\
                 \x20   cudaMemcpy(last_spike.data(), gpu_last_spike, size * sizeof(long int), cudaMemcpyDeviceToHost);\n",
            );
            code.clear.push_str(
                "    cudaFree(gpu_last_spike);\n    cudaFree(gpu_spiked);\n    cudaFree(gpu_spike_count);\n",
            );
            if spike.refractory.is_some() {
                code.declaration.push_str(
                    "    int* gpu_refractory;\n    int* gpu_refractory_remaining;\n",
                );
                code.initializer.push_str(
                    "    cudaMalloc((void**)&gpu_refractory, size * sizeof(int));\n\
                     \x20   cudaMemcpy(gpu_refractory, refractory.data(), size * sizeof(int), cudaMemcpyHostToDevice);\n\
                     \x20   cudaMalloc((void**)&gpu_refractory_remaining, size * sizeof(int));\n\
                     \x20   cudaMemset(gpu_refractory_remaining, 0, size * sizeof(int));\n",
                );
                code.clear.push_str(
                    "    cudaFree(gpu_refractory);\n    cudaFree(gpu_refractory_remaining);\n",
                );
            }
        }
        Ok(())
    }

    /// Ring buffers holding the last `max_delay` values of delayed variables
    fn delays(&self, pop: &Population, info: &PopulationInfo, code: &mut StructCode) -> Result<()> {
        if info.max_delay <= 1 {
            return Ok(());
        }
        let object = ObjectId::Population(pop.id);
        code.declaration
            .push_str("    // Delays\n    int max_delay;\n");
        code.initializer
            .push_str(&format!("    max_delay = {};\n", info.max_delay));

        let mut update = String::new();
        for var in &info.delayed_variables {
            let attr = pop.attribute(var).ok_or_else(|| NeurogenError::UnresolvedSymbol {
                object,
                symbol: format!("pre.{}", var),
                context: "delayed variable".into(),
            })?;
            let (t, init) = (&attr.ctype, &attr.init);
            if self.cuda() {
                code.declaration
                    .push_str(&format!("    std::deque<{t}*> gpu_delayed_{var};\n"));
                code.initializer.push_str(&format!(
                    "    for (int d = 0; d < max_delay; d++) {{\n\
                     \x20       {t}* buffer;\n\
                     \x20       cudaMalloc((void**)&buffer, size * sizeof({t}));\n\
                     \x20       std::vector<{t}> values(size, static_cast<{t}>({init}));\n\
                     \x20       cudaMemcpy(buffer, values.data(), size * sizeof({t}), cudaMemcpyHostToDevice);\n\
                     \x20       gpu_delayed_{var}.push_back(buffer);\n\
                     \x20   }}\n"
                ));
                update.push_str(&format!(
                    "        {t}* last_{var} = gpu_delayed_{var}.back();\n\
                     \x20       gpu_delayed_{var}.pop_back();\n\
                     \x20       cudaMemcpy(last_{var}, gpu_{var}, size * sizeof({t}), cudaMemcpyDeviceToDevice);\n\
                     \x20       gpu_delayed_{var}.push_front(last_{var});\n"
                ));
                code.clear.push_str(&format!(
                    "    for (auto it = gpu_delayed_{var}.begin(); it != gpu_delayed_{var}.end(); it++)\n\
                     \x20       cudaFree(*it);\n\
                     \x20   gpu_delayed_{var}.clear();\n"
                ));
                code.size_in_bytes.push_str(&format!(
                    "    size_in_bytes += sizeof({t}) * size * gpu_delayed_{var}.size();\n"
                ));
            } else {
                code.declaration
                    .push_str(&format!("    std::deque<std::vector<{t}>> _delayed_{var};\n"));
                code.initializer.push_str(&format!(
                    "    _delayed_{var} = std::deque<std::vector<{t}>>(max_delay, std::vector<{t}>(size, static_cast<{t}>({init})));\n"
                ));
                update.push_str(&format!(
                    "        _delayed_{var}.push_front({var});\n\
                     \x20       _delayed_{var}.pop_back();\n"
                ));
                code.clear.push_str(&format!("    _delayed_{var}.clear();\n"));
                code.size_in_bytes.push_str(&format!(
                    "    for (auto it = _delayed_{var}.cbegin(); it != _delayed_{var}.cend(); it++)\n\
                     \x20       size_in_bytes += sizeof({t}) * it->capacity();\n"
                ));
            }
        }

        if info.delayed_spikes {
            code.declaration
                .push_str("    std::deque<std::vector<int>> _delayed_spike;\n");
            code.initializer.push_str(
                "    _delayed_spike = std::deque<std::vector<int>>(max_delay, std::vector<int>());\n",
            );
            update.push_str(
                "        _delayed_spike.push_front(spiked);\n\
                 \x20       _delayed_spike.pop_back();\n",
            );
            code.clear.push_str("    _delayed_spike.clear();\n");
        }

        code.methods
            .push_str(&format!("    void update_delay() {{\n{}    }}\n", update));
        Ok(())
    }

    fn global_operations(
        &self,
        pop: &Population,
        info: &PopulationInfo,
        code: &mut StructCode,
    ) -> Result<()> {
        if info.global_operations.is_empty() {
            return Ok(());
        }
        code.declaration.push_str("    // Global operations\n");
        let mut calls = String::new();
        for op in &info.global_operations {
            let ctype = pop
                .attribute(&op.variable)
                .map(|a| a.ctype.as_str())
                .unwrap_or(self.real());
            if self.cuda() {
                code.declaration
                    .push_str(&globalops::device_declaration(op, ctype));
                code.initializer
                    .push_str(&globalops::device_initializer(op, ctype));
                code.device_to_host
                    .push_str(&globalops::device_to_host(op, ctype));
                code.clear
                    .push_str(&format!("    cudaFree(gpu_{});\n", op.member()));
            } else {
                code.declaration.push_str(&globalops::declaration(op, ctype));
                code.initializer
                    .push_str(&format!("    {} = 0;\n", op.member()));
                code.methods.push_str(&globalops::host_routine(op, ctype));
                calls.push_str(&format!("        {}();\n", globalops::routine(op)));
            }
            code.accessors.push_str(&format!(
                "    {t} get{r}() {{ return {r}; }}\n",
                t = ctype,
                r = op.member()
            ));
        }
        if !self.cuda() {
            code.methods
                .push_str(&format!("    void update_global_ops() {{\n{}    }}\n", calls));
        }
        Ok(())
    }

    fn host_update(&self, pop: &Population, info: &PopulationInfo, attrs: &[Attribute]) -> Result<String> {
        let object = ObjectId::Population(pop.id);
        let scope = PopulationScope {
            pop,
            info,
            attrs,
            site: Site::Host,
        };
        let render_eq = |eq: &str, attr: &Attribute| {
            render(eq, &scope, object, &format!("update of '{}'", attr.name))
        };

        let globals: Vec<&Attribute> = attrs.iter().filter(|a| a.locality == Locality::Global).collect();
        let locals: Vec<&Attribute> = attrs.iter().filter(|a| a.locality == Locality::Local).collect();
        let global_code = update_block(&globals, render_eq)?;
        let local_code = update_block(&locals, render_eq)?;
        let neuron = self.neuron_body(pop, &scope, &local_code, Site::Host)?;

        let mut body = String::from("        if (!_active)\n            return;\n");
        if pop.kind == NeuronKind::Spike {
            body.push_str("        spiked.clear();\n");
        }
        if !global_code.is_empty() {
            body.push_str("\n        // Global variables\n");
            body.push_str(&indent(&global_code, 2));
        }
        if !neuron.trim().is_empty() {
            body.push_str("\n        // Local variables\n");
            body.push_str(&indent(&crate::backend::openmp::parallel_for(self.config), 2));
            body.push_str("        for (int i = 0; i < size; i++) {\n");
            body.push_str(&indent(&neuron, 3));
            body.push_str("        }\n");
        }
        Ok(format!("    void update() {{\n{}    }}\n", body))
    }

    /// Per-neuron statements: refractory gate, equations, spike emission
    fn neuron_body(
        &self,
        pop: &Population,
        scope: &PopulationScope,
        equations: &str,
        site: Site,
    ) -> Result<String> {
        let Some(spike) = &pop.spike else {
            return Ok(equations.to_string());
        };
        let object = ObjectId::Population(pop.id);

        let condition = render(&spike.condition, scope, object, "spike condition")?;
        let mut emit = String::new();
        for reset in &spike.reset {
            emit.push_str(&statement(&render(reset, scope, object, "spike reset")?));
            emit.push('\n');
        }
        emit.push_str("last_spike[i] = t;\n");
        if spike.refractory.is_some() {
            emit.push_str("refractory_remaining[i] = refractory[i];\n");
        }
        match site {
            Site::Host => emit.push_str("#pragma omp critical\nspiked.push_back(i);\n"),
            Site::Device => emit.push_str("spiked[atomicAdd(_spike_count, 1)] = i;\n"),
        }

        let fire = format!("if ({}) {{\n{}}}\n", condition.trim(), indent(&emit, 1));
        let step = format!("{}{}", equations, fire);
        if spike.refractory.is_some() {
            Ok(format!(
                "if (refractory_remaining[i] > 0) {{\n\
                 \x20   refractory_remaining[i]--;\n\
                 }} else {{\n\
                 {}\
                 }}\n",
                indent(&step, 1)
            ))
        } else {
            Ok(step)
        }
    }

    /// Kernel arguments carrying the population state
    fn kernel_args(&self, pop: &Population, info: &PopulationInfo, attrs: &[Attribute]) -> Vec<KernelArg> {
        let mut args = Vec::new();
        for attr in attrs {
            let param = match attr.locality {
                Locality::Global => format!("{}* {}_ptr", attr.ctype, attr.name),
                _ => format!("{}* {}", attr.ctype, attr.name),
            };
            args.push(KernelArg::new(param, format!("gpu_{}", attr.name)));
        }
        if pop.kind == NeuronKind::Rate {
            for target in &info.targets {
                args.push(KernelArg::new(
                    format!("{}* _sum_{}", self.real(), target),
                    format!("gpu__sum_{}", target),
                ));
            }
        }
        for op in &info.global_operations {
            let ctype = attr_ctype(attrs, &op.variable, self.real());
            args.push(KernelArg::new(
                format!("{}* {}_ptr", ctype, op.member()),
                format!("gpu_{}", op.member()),
            ));
        }
        if let Some(spike) = &pop.spike {
            args.push(KernelArg::new("long int* last_spike", "gpu_last_spike"));
            args.push(KernelArg::new("int* spiked", "gpu_spiked"));
            args.push(KernelArg::new("unsigned int* _spike_count", "gpu_spike_count"));
            if spike.refractory.is_some() {
                args.push(KernelArg::new("int* refractory", "gpu_refractory"));
                args.push(KernelArg::new("int* refractory_remaining", "gpu_refractory_remaining"));
            }
        }
        args
    }

    fn device_update(&self, pop: &Population, info: &PopulationInfo, attrs: &[Attribute]) -> Result<String> {
        let object = ObjectId::Population(pop.id);
        let name = instance(pop);
        let scope = PopulationScope {
            pop,
            info,
            attrs,
            site: Site::Device,
        };
        let render_eq = |eq: &str, attr: &Attribute| {
            render(eq, &scope, object, &format!("update of '{}'", attr.name))
        };

        let globals: Vec<&Attribute> = attrs.iter().filter(|a| a.locality == Locality::Global).collect();
        let locals: Vec<&Attribute> = attrs.iter().filter(|a| a.locality == Locality::Local).collect();
        let global_code = update_block(&globals, render_eq)?;
        let local_code = update_block(&locals, render_eq)?;
        let neuron = self.neuron_body(pop, &scope, &local_code, Site::Device)?;

        let args = self.kernel_args(pop, info, attrs);
        let params: Vec<&str> = args.iter().map(|a| a.decl.as_str()).collect();
        let values: Vec<String> = args.iter().map(|a| format!("{}.{}", name, a.member)).collect();
        let params = params.join(", ");
        let values = values.join(", ");
        let tpb = self.config.threads_per_block;

        let mut code = format!("// Population {} ({})\n", pop.id, pop.name);
        let mut launch = String::new();
        if pop.kind == NeuronKind::Spike {
            launch.push_str(&format!(
                "    cudaMemset({}.gpu_spike_count, 0, sizeof(unsigned int));\n",
                name
            ));
        }

        if !global_code.is_empty() {
            code.push_str(&format!(
                "__global__ void cuda_{name}_global_step(long int t, {real} dt, {params}) {{\n{}}}\n\n",
                indent(&global_code, 1),
                real = self.real()
            ));
            launch.push_str(&format!(
                "    cuda_{name}_global_step<<<1, 1>>>(t, dt, {values});\n"
            ));
        }

        if !neuron.trim().is_empty() {
            code.push_str(&format!(
                "__global__ void cuda_{name}_local_step(int size, long int t, {real} dt, {params}) {{\n\
                 \x20   int i = threadIdx.x + blockIdx.x * blockDim.x;\n\
                 \x20   while (i < size) {{\n\
                 {}\
                 \x20       i += blockDim.x * gridDim.x;\n\
                 \x20   }}\n\
                 }}\n\n",
                indent(&neuron, 2),
                real = self.real()
            ));
            launch.push_str(&format!(
                "    int nb_blocks = std::min<int>(({name}.size + {tpb} - 1) / {tpb}, {max});\n\
                 \x20   if (nb_blocks > 0)\n\
                 \x20       cuda_{name}_local_step<<<nb_blocks, {tpb}>>>({name}.size, t, dt, {values});\n",
                max = self.config.max_blocks
            ));
        }

        code.push_str(&format!("void cuda_{name}_step() {{\n{launch}}}\n\n"));
        Ok(code)
    }

    fn header(&self, pop: &Population, code: StructCode) -> String {
        let kind = match pop.kind {
            NeuronKind::Rate => "rate-coded",
            NeuronKind::Spike => "spiking",
        };
        let mut text = format!(
            "/*\n *  pop{id}.hpp\n *\n *  Population {id} ({name}): {size} {kind} neurons\n */\n\
             #pragma once\n\
             #include <vector>\n\
             #include <deque>\n\
             #include <cmath>\n\
             #include <algorithm>\n",
            id = pop.id,
            name = pop.name,
            size = pop.size,
        );
        if self.cuda() {
            text.push_str("#include <cuda_runtime_api.h>\n");
        }
        text.push_str(&format!(
            "\nextern long int t;\nextern {} dt;\n\nstruct {} {{\n    int size;\n    bool _active;\n\n",
            self.real(),
            struct_name(pop)
        ));
        text.push_str(&code.declaration);
        text.push_str(&format!(
            "\n    void init_population() {{\n        size = {};\n        _active = true;\n{}    }}\n\n",
            pop.size,
            indent(&code.initializer, 1)
        ));
        text.push_str(&code.methods);
        text.push('\n');
        text.push_str(&code.accessors);
        if self.cuda() {
            text.push_str(&format!(
                "\n    void host_to_device() {{\n{}    }}\n\n    void device_to_host() {{\n{}    }}\n",
                indent(&code.host_to_device, 1),
                indent(&code.device_to_host, 1)
            ));
        }
        text.push_str(&format!(
            "\n    long int size_in_bytes() {{\n        long int size_in_bytes = 0;\n{}        return size_in_bytes;\n    }}\n",
            indent(&code.size_in_bytes, 1)
        ));
        text.push_str(&format!("\n    void clear() {{\n{}    }}\n}};\n", indent(&code.clear, 1)));
        text
    }
}

fn attr_ctype<'a>(attrs: &'a [Attribute], name: &str, fallback: &'a str) -> &'a str {
    attrs
        .iter()
        .find(|a| a.name == name)
        .map(|a| a.ctype.as_str())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagate::propagate;
    use neurogen_core::{Network, NetworkDescription};

    const NETWORK: &str = r#"{
        "populations": [
            {"id": 0, "name": "input", "size": 8, "neuron_type": "rate",
             "attributes": [{"name": "r", "locality": "local"}],
             "global_operations": [{"function": "max", "variable": "r"}]},
            {"id": 1, "name": "hidden", "size": 4, "neuron_type": "rate",
             "attributes": [
                {"name": "tau", "locality": "global", "attr_type": "parameter", "init": "10.0"},
                {"name": "v", "locality": "local", "method": "explicit",
                 "eq": "(${sum.exc} - ${v}) / ${tau}"},
                {"name": "r", "locality": "local", "method": "exact",
                 "eq": "${r} = fmax(${v}, 0.0)"}],
             "stop_condition": "${r} > 1.0"},
            {"id": 2, "name": "spikes", "size": 5, "neuron_type": "spike",
             "attributes": [{"name": "v", "locality": "local", "method": "explicit",
                             "eq": "-${v} + ${g_exc}"}],
             "spike": {"condition": "${v} > 1.0", "reset": ["${v} = 0.0"], "refractory": "2"}}
        ],
        "projections": [
            {"id": 0, "pre": 0, "post": 1, "target": "exc",
             "synapse": {"attributes": [{"name": "w", "locality": "local"}]},
             "delay": {"uniform": 4}},
            {"id": 1, "pre": 0, "post": 2, "target": "exc",
             "synapse": {"attributes": [{"name": "w", "locality": "local"}]}}
        ]
    }"#;

    fn generate(config: &GeneratorConfig, id: usize) -> FragmentSet {
        let desc = NetworkDescription::from_json(NETWORK).unwrap();
        let net = Network::from_description(&desc, config).unwrap();
        let table = propagate(&net).unwrap();
        let pop = net.population(id).unwrap();
        PopulationGenerator::new(config)
            .build(pop, table.population(id).unwrap())
            .unwrap()
    }

    #[test]
    fn test_rate_population_openmp() {
        let set = generate(&GeneratorConfig::default(), 1);
        let header = set.concat(FragmentKind::Header);
        assert!(header.contains("struct PopStruct1 {"));
        assert!(header.contains("std::vector<double> _sum_exc;"));
        assert!(header.contains("double _v = (_sum_exc[i] - v[i]) / tau;"));
        assert!(header.contains("r[i] = fmax(v[i], 0.0);"));
        assert!(header.contains("v[i] += dt * _v;"));
        assert!(header.contains("if (r[i] > 1.0)"));
        assert_eq!(
            set.concat(FragmentKind::ResetInputs),
            "    std::fill(pop1._sum_exc.begin(), pop1._sum_exc.end(), 0.0);\n"
        );
        assert!(set.concat(FragmentKind::StopCondition).contains("pop_stop = pop1.stop_condition();"));
    }

    #[test]
    fn test_delay_buffer_and_reduction() {
        let set = generate(&GeneratorConfig::default(), 0);
        let header = set.concat(FragmentKind::Header);
        assert!(header.contains("max_delay = 4;"));
        assert!(header.contains("std::deque<std::vector<double>> _delayed_r;"));
        assert!(header.contains("_delayed_r.push_front(r);"));
        assert_eq!(header.matches("void compute_max_r()").count(), 1);
        assert_eq!(set.concat(FragmentKind::UpdateDelay), "    pop0.update_delay();\n");
        assert_eq!(set.concat(FragmentKind::GlobalOps), "    pop0.update_global_ops();\n");
    }

    #[test]
    fn test_spiking_population() {
        let set = generate(&GeneratorConfig::default(), 2);
        let header = set.concat(FragmentKind::Header);
        assert!(header.contains("std::vector<double> g_exc;"));
        assert!(header.contains("if (refractory_remaining[i] > 0) {"));
        assert!(header.contains("if (v[i] > 1.0) {"));
        assert!(header.contains("last_spike[i] = t;"));
        assert!(header.contains("spiked.push_back(i);"));
        assert!(set.concat(FragmentKind::ResetInputs).is_empty());
    }

    #[test]
    fn test_cuda_population_kernels() {
        let config = GeneratorConfig {
            backend: Backend::Cuda,
            ..GeneratorConfig::default()
        };
        let desc = NetworkDescription::from_json(NETWORK).unwrap();
        // CUDA only accepts CSR and ELL-R
        let mut desc = desc;
        for proj in &mut desc.projections {
            proj.storage_format = "csr".into();
        }
        let net = Network::from_description(&desc, &config).unwrap();
        let table = propagate(&net).unwrap();
        let set = PopulationGenerator::new(&config)
            .build(net.population(1).unwrap(), table.population(1).unwrap())
            .unwrap();

        let device = set.concat(FragmentKind::DeviceCode);
        assert!(device.contains("__global__ void cuda_pop1_local_step(int size, long int t, double dt,"));
        assert!(device.contains("double* tau_ptr"));
        assert!(device.contains("double _v = (_sum_exc[i] - v[i]) / (*tau_ptr);"));
        assert!(device.contains("if (nb_blocks > 0)"));
        assert_eq!(set.concat(FragmentKind::UpdateNeurons), "    cuda_pop1_step();\n");
        assert!(set.concat(FragmentKind::ResetInputs).contains("cudaMemset(pop1.gpu__sum_exc, 0"));
        assert!(set.concat(FragmentKind::Header).contains("void host_to_device() {"));
    }
}
