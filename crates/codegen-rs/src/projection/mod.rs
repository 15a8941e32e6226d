//! Projection generator.
//!
//! A standard projection is assembled from its connectivity strategy, the
//! attribute code families and the synaptic bodies (transmission, update,
//! events, structural plasticity). Transpose and weight-sharing projections
//! replace the connectivity and transmission pieces and delegate the rest.

use std::cell::RefCell;

use neurogen_core::{
    AttrKind, Attribute, Backend, Delay, GeneratorConfig, Locality, Method, Network, NeuronKind,
    ObjectId, Population, Projection, ProjectionKind, Result,
};
use tracing::debug;

use crate::attributes::{attribute_code, AttributeRequest, Owner};
use crate::connectivity::{self, ConnectivityContext, ConnectivityStrategy, KernelArg};
use crate::fragment::{FragmentKind, FragmentSet};
use crate::globalops;
use crate::population;
use crate::propagate::{DerivedTable, PopulationInfo};
use crate::template::{event_block, indent, render, statement, update_block, Scope, Site};

mod structural;
mod transpose;
mod weight_sharing;

pub fn instance(proj: &Projection) -> String {
    format!("proj{}", proj.id)
}

pub fn struct_name(proj: &Projection) -> String {
    format!("ProjStruct{}", proj.id)
}

/// Synaptic attributes as stored: effective locality applied, plus the
/// per-synapse delay of non-uniform projections and the event timestamps
/// of event-driven synapses.
pub fn storage_attributes(proj: &Projection) -> Vec<Attribute> {
    let mut attrs: Vec<Attribute> = proj
        .synapse
        .attributes
        .iter()
        .map(|a| Attribute {
            locality: proj.effective_locality(a),
            ..a.clone()
        })
        .collect();

    if matches!(proj.delay, Delay::NonUniform(_)) && proj.attribute("delay").is_none() {
        attrs.push(Attribute {
            name: "delay".into(),
            ctype: "int".into(),
            locality: Locality::Local,
            kind: AttrKind::Parameter,
            method: Method::Exact,
            init: "1".into(),
            eq: None,
        });
    }
    if has_event_driven(proj) {
        attrs.push(Attribute {
            name: "_last_event".into(),
            ctype: "long int".into(),
            locality: Locality::Local,
            kind: AttrKind::Variable,
            method: Method::Exact,
            init: "-10000".into(),
            eq: None,
        });
    }
    attrs
}

fn has_event_driven(proj: &Projection) -> bool {
    proj.synapse
        .attributes
        .iter()
        .any(|a| a.is_updated() && a.method == Method::EventDriven)
}

// ============================================================================
// SYMBOLS
// ============================================================================

/// One side of a projection as seen from its code
pub(crate) struct Side<'a> {
    pub pop: &'a Population,
    pub info: &'a PopulationInfo,
    pub attrs: Vec<Attribute>,
    pub real: &'static str,
    /// `pre` or `post`, prefix of device arguments
    pub label: &'static str,
    /// Rank variable in scope, `rk_pre` or `rk_post`
    pub rank: &'static str,
}

impl<'a> Side<'a> {
    pub fn new(
        pop: &'a Population,
        info: &'a PopulationInfo,
        real: &'static str,
        label: &'static str,
        rank: &'static str,
    ) -> Self {
        Self {
            pop,
            info,
            attrs: population::storage_attributes(pop, info, real),
            real,
            label,
            rank,
        }
    }

    fn instance(&self) -> String {
        population::instance(self.pop)
    }
}

/// Addressing of the projection's own attributes
#[derive(Clone, Copy)]
pub(crate) enum Own<'a> {
    /// Through the connectivity strategy (`w[n][j]`, `w[j]`)
    Strategy(&'a dyn ConnectivityStrategy),
    /// Shared kernel indexed by `k`
    Kernel,
}

pub(crate) struct ProjectionScope<'a> {
    pub proj: &'a Projection,
    pub attrs: &'a [Attribute],
    pub pre: &'a Side<'a>,
    pub post: &'a Side<'a>,
    pub own: Own<'a>,
    pub site: Site,
    /// Pre-synaptic reads go through the delay buffers
    pub delayed: bool,
    /// Device arguments requested by resolved symbols
    pub args: RefCell<Vec<KernelArg>>,
}

impl<'a> ProjectionScope<'a> {
    pub fn new(
        proj: &'a Projection,
        attrs: &'a [Attribute],
        pre: &'a Side<'a>,
        post: &'a Side<'a>,
        own: Own<'a>,
        site: Site,
    ) -> Self {
        Self {
            proj,
            attrs,
            pre,
            post,
            own,
            site,
            delayed: false,
            args: RefCell::new(Vec::new()),
        }
    }

    pub fn delayed(mut self) -> Self {
        self.delayed = true;
        self
    }

    fn request(&self, decl: String, member: String) {
        let mut args = self.args.borrow_mut();
        if !args.iter().any(|a| a.decl == decl) {
            args.push(KernelArg::new(decl, member));
        }
    }

    /// Kernel arguments collected so far
    pub fn take_args(&self) -> Vec<KernelArg> {
        self.args.borrow_mut().drain(..).collect()
    }

    fn synapse_index(&self) -> &'static str {
        match self.own {
            Own::Strategy(strategy) => match self.site {
                Site::Host => strategy.synapse(),
                Site::Device => "[j]",
            },
            Own::Kernel => "[k]",
        }
    }

    fn own_attribute(&self, attr: &Attribute) -> String {
        let x = &attr.name;
        let member = format!("{}.gpu_{}", instance(self.proj), x);
        match (attr.locality, self.site) {
            (Locality::Global, Site::Host) => x.clone(),
            (Locality::Global, Site::Device) => {
                self.request(format!("{}* {}_ptr", attr.ctype, x), member);
                format!("(*{}_ptr)", x)
            }
            (Locality::Semiglobal, Site::Host) => format!("{}[n]", x),
            (Locality::Semiglobal, Site::Device) => {
                self.request(format!("{}* {}", attr.ctype, x), member);
                format!("{}[n]", x)
            }
            (Locality::Local, Site::Host) => format!("{}{}", x, self.synapse_index()),
            (Locality::Local, Site::Device) => {
                self.request(format!("{}* {}", attr.ctype, x), member);
                format!("{}{}", x, self.synapse_index())
            }
        }
    }

    fn side(&self, side: &Side, name: &str, is_pre: bool) -> Option<String> {
        let pop = side.instance();
        let l = side.label;

        if name == "g_target" && !is_pre {
            let buffer = match side.pop.kind {
                NeuronKind::Rate => format!("_sum_{}", self.proj.target),
                NeuronKind::Spike => format!("g_{}", self.proj.target),
            };
            return Some(match self.site {
                Site::Host => format!("{}.{}[{}]", pop, buffer, side.rank),
                Site::Device => {
                    let ctype = side
                        .attrs
                        .iter()
                        .find(|a| a.name == buffer)
                        .map(|a| a.ctype.as_str())
                        .unwrap_or(side.real);
                    self.request(
                        format!("{}* {}_{}", ctype, l, buffer),
                        format!("{}.gpu_{}", pop, buffer),
                    );
                    format!("{}_{}[{}]", l, buffer, side.rank)
                }
            });
        }

        if let Some(op) = globalops::parse_symbol(name) {
            if !side.info.global_operations.contains(&op) {
                return None;
            }
            let member = op.member();
            return Some(match self.site {
                Site::Host => format!("{}.{}", pop, member),
                Site::Device => {
                    let ctype = side
                        .pop
                        .attribute(&op.variable)
                        .map(|a| a.ctype.as_str())
                        .unwrap_or(side.real);
                    self.request(
                        format!("{}* {}_{}_ptr", ctype, l, member),
                        format!("{}.gpu_{}", pop, member),
                    );
                    format!("(*{}_{}_ptr)", l, member)
                }
            });
        }

        let attr = side.attrs.iter().find(|a| a.name == name)?;
        let t = &attr.ctype;
        if attr.locality == Locality::Global {
            return Some(match self.site {
                Site::Host => format!("{}.{}", pop, name),
                Site::Device => {
                    self.request(format!("{t}* {l}_{name}_ptr"), format!("{pop}.gpu_{name}"));
                    format!("(*{l}_{name}_ptr)")
                }
            });
        }

        let rank = side.rank;
        let buffered = is_pre
            && self.delayed
            && self.proj.delay.needs_buffer()
            && side.info.delayed_variables.contains(name);
        if buffered {
            return Some(match (self.proj.delay, self.site) {
                (Delay::NonUniform(_), _) => {
                    format!("{pop}._delayed_{name}[delay{} - 1][{rank}]", self.synapse_index())
                }
                (delay, Site::Host) => {
                    format!("{pop}._delayed_{name}[{}][{rank}]", delay.max_delay() - 1)
                }
                (delay, Site::Device) => {
                    self.request(
                        format!("{t}* {l}_delayed_{name}"),
                        format!("{pop}.gpu_delayed_{name}[{}]", delay.max_delay() - 1),
                    );
                    format!("{l}_delayed_{name}[{rank}]")
                }
            });
        }

        Some(match self.site {
            Site::Host => format!("{pop}.{name}[{rank}]"),
            Site::Device => {
                self.request(format!("{t}* {l}_{name}"), format!("{pop}.gpu_{name}"));
                format!("{l}_{name}[{rank}]")
            }
        })
    }
}

impl Scope for ProjectionScope<'_> {
    fn resolve(&self, symbol: &str) -> Option<String> {
        match symbol {
            "t" => return Some("t".into()),
            "dt" => return Some("dt".into()),
            _ => {}
        }
        if let Some(name) = symbol.strip_prefix("pre.") {
            return self.side(self.pre, name, true);
        }
        if let Some(name) = symbol.strip_prefix("post.") {
            return self.side(self.post, name, false);
        }
        let attr = self.attrs.iter().find(|a| a.name == symbol)?;
        Some(self.own_attribute(attr))
    }
}

// ============================================================================
// GENERATOR
// ============================================================================

/// Pieces of the projection structure, assembled by [`header`]
#[derive(Default)]
pub(crate) struct StructCode {
    pub includes: String,
    pub declaration: String,
    pub initializer: String,
    pub connect: String,
    pub methods: String,
    pub accessors: String,
    pub size_in_bytes: String,
    pub clear: String,
    pub host_to_device: String,
    pub device_to_host: String,
}

pub struct ProjectionGenerator<'a> {
    config: &'a GeneratorConfig,
    network: &'a Network,
    table: &'a DerivedTable,
}

impl<'a> ProjectionGenerator<'a> {
    pub fn new(config: &'a GeneratorConfig, network: &'a Network, table: &'a DerivedTable) -> Self {
        Self {
            config,
            network,
            table,
        }
    }

    pub(crate) fn cuda(&self) -> bool {
        self.config.backend == Backend::Cuda
    }

    /// Synapses can be added and removed at run time
    fn structural(&self, proj: &Projection) -> bool {
        !self.cuda() && self.config.structural_plasticity && proj.format.supports_dynamic_edges()
    }

    pub(crate) fn real(&self) -> &'static str {
        self.config.precision.ctype()
    }

    pub(crate) fn sides(&self, proj: &Projection) -> Result<(Side<'a>, Side<'a>)> {
        let pre = self.network.population(proj.pre.population)?;
        let post = self.network.population(proj.post.population)?;
        Ok((
            Side::new(pre, self.table.population(pre.id)?, self.real(), "pre", "rk_pre"),
            Side::new(post, self.table.population(post.id)?, self.real(), "post", "rk_post"),
        ))
    }

    pub fn build(&self, proj: &Projection) -> Result<FragmentSet> {
        let fragments = match proj.kind {
            ProjectionKind::Standard => self.standard(proj)?,
            ProjectionKind::Transpose { forward } => {
                transpose::build(self, proj, self.network.projection(forward)?)?
            }
            ProjectionKind::WeightSharing { kernel_size } => {
                weight_sharing::build(self, proj, kernel_size)?
            }
        };
        debug!(
            projection = proj.id,
            format = %proj.format,
            kind = ?proj.kind,
            fragments = fragments.len(),
            "generated projection"
        );
        Ok(fragments)
    }

    /// Fragments every projection kind contributes the same way
    pub(crate) fn common_fragments(&self, proj: &Projection, fragments: &mut FragmentSet) {
        let object = proj.object();
        let name = instance(proj);
        fragments.push(
            object,
            FragmentKind::Instance,
            format!("extern {} {};\n", struct_name(proj), name),
        );
        // a transpose inverts its forward projection, which must be ready
        let kind = match proj.kind {
            ProjectionKind::Transpose { .. } => FragmentKind::LateInitialize,
            _ => FragmentKind::Initialize,
        };
        fragments.push(object, kind, format!("    {}.init_projection();\n", name));
    }

    fn standard(&self, proj: &Projection) -> Result<FragmentSet> {
        let object = proj.object();
        let name = instance(proj);
        let strategy = connectivity::strategy(proj.format);
        let (pre, post) = self.sides(proj)?;
        let attrs = storage_attributes(proj);

        let ctx = ConnectivityContext {
            backend: self.config.backend,
            threads_per_block: self.config.threads_per_block,
            max_blocks: self.config.max_blocks,
            inverse: proj.is_spiking(),
        };
        let conn = strategy.code(&ctx);

        let mut code = StructCode {
            includes: includes(&[pre.pop, post.pop]),
            ..StructCode::default()
        };
        code.declaration.push_str(&conn.declaration);
        code.declaration.push_str(LEARNING_FLAGS);
        code.initializer.push_str(LEARNING_DEFAULTS);
        code.methods.push_str(&conn.construction);
        code.accessors.push_str(&conn.accessors);
        code.methods.push_str(&conn.inverse);
        code.methods.push_str(&conn.device_upload);
        code.size_in_bytes.push_str(&conn.size_in_bytes);
        code.clear.push_str(&conn.clear);

        let mut attribute_init = String::new();
        for attr in &attrs {
            let request = AttributeRequest {
                name: &attr.name,
                ctype: &attr.ctype,
                locality: attr.locality,
                kind: attr.kind,
                init: &attr.init,
                layout: strategy.layout(),
            };
            let c = attribute_code(object, self.config.backend, Owner::Projection, &request)?;
            code.declaration.push_str(&c.declaration);
            attribute_init.push_str(&c.initializer);
            code.accessors.push_str(&c.accessors);
            code.size_in_bytes.push_str(&c.size_in_bytes);
            code.clear.push_str(&c.clear);
            code.host_to_device.push_str(&c.host_to_device);
            code.device_to_host.push_str(&c.device_to_host);
        }

        code.methods.push_str(&self.init_connectivity(proj, &attrs, &conn.launch_config, &attribute_init));

        let mut fragments = FragmentSet::new();
        let scope = |site| ProjectionScope::new(proj, &attrs, &pre, &post, Own::Strategy(strategy), site);

        if self.cuda() {
            let mut device = DeviceCode::new(proj, &format!(
                "// Projection {} ({} -> {}, {})\n",
                proj.id, pre.pop.name, post.pop.name, proj.target
            ));
            let (kernels, launch) = self.device_psp(proj, strategy, &scope(Site::Device).delayed())?;
            device.phase("psp", FragmentKind::ComputePsp, kernels, launch);
            if let Some((kernels, launch)) = self.device_update(proj, strategy, &scope(Site::Device))? {
                device.phase("update", FragmentKind::UpdateSynapses, kernels, launch);
            }
            if let Some((kernels, launch)) = self.device_post_event(proj, strategy, &scope(Site::Device))? {
                device.phase("post_event", FragmentKind::PostEvents, kernels, launch);
            }
            device.finish(&mut fragments);
            fragments.push(object, FragmentKind::HostToDevice, format!("    {}.host_to_device();\n", name));
            fragments.push(object, FragmentKind::DeviceToHost, format!("    {}.device_to_host();\n", name));
        } else {
            code.methods.push_str(&self.host_psp(proj, strategy, &scope(Site::Host).delayed())?);
            fragments.push(object, FragmentKind::ComputePsp, format!("    {}.compute_psp();\n", name));

            if let Some(update) = self.host_update(proj, strategy, &scope(Site::Host))? {
                code.methods.push_str(&update);
                fragments.push(object, FragmentKind::UpdateSynapses, format!("    {}.update_synapse();\n", name));
            }
            if let Some(event) = self.host_post_event(proj, strategy, &scope(Site::Host))? {
                code.methods.push_str(&event);
                fragments.push(object, FragmentKind::PostEvents, format!("    {}.post_event();\n", name));
            }
            if self.structural(proj) {
                let s = structural::build(proj, &attrs, &scope(Site::Host), &pre)?;
                code.declaration.push_str(&s.declaration);
                code.initializer.push_str(&s.initializer);
                code.methods.push_str(&s.methods);
                fragments.push(object, FragmentKind::StructuralPlasticity, s.calls);
            }
        }

        self.common_fragments(proj, &mut fragments);
        fragments.push(object, FragmentKind::Header, header(proj, self.cuda(), code));
        Ok(fragments)
    }

    /// `init_connectivity`: builds the connectivity, allocates the
    /// attributes and stores the initial weights and delays.
    fn init_connectivity(
        &self,
        proj: &Projection,
        attrs: &[Attribute],
        launch_config: &str,
        attribute_init: &str,
    ) -> String {
        let mut params = vec![
            "std::vector<int> post_ranks".to_string(),
            "std::vector<std::vector<int>> pre_ranks".to_string(),
        ];
        let mut body = String::new();
        if self.structural(proj) {
            body.push_str(&indent(&structural::sort_rows(proj, attrs), 2));
        }
        body.push_str("        init_from_lil(post_ranks, pre_ranks);\n");
        body.push_str(&indent(launch_config, 1));
        body.push_str(&indent(attribute_init, 1));

        if let Some(w) = attrs.iter().find(|a| a.name == "w") {
            let t = &w.ctype;
            match w.locality {
                Locality::Local => {
                    params.push(format!("std::vector<std::vector<{t}>> values"));
                    body.push_str(&format!("        update_matrix_variable_all<{t}>(w, values);\n"));
                }
                Locality::Semiglobal => {
                    params.push(format!("std::vector<{t}> values"));
                    body.push_str("        w = values;\n");
                }
                Locality::Global => {
                    params.push(format!("{t} values"));
                    body.push_str("        w = values;\n");
                }
            }
        }
        if matches!(proj.delay, Delay::NonUniform(_)) {
            params.push("std::vector<std::vector<int>> delays".into());
            body.push_str("        update_matrix_variable_all<int>(delay, delays);\n");
        }
        if proj.is_spiking() {
            body.push_str("        inverse_connectivity_matrix();\n");
        }
        if self.cuda() {
            body.push_str("        connectivity_to_device();\n");
        }

        format!(
            "    void init_connectivity({}) {{\n{}    }}\n",
            params.join(", "),
            body
        )
    }

    // ------------------------------------------------------------------------
    // Transmission
    // ------------------------------------------------------------------------

    /// Body executed for one synapse `(n, j)` receiving a pre-synaptic spike
    fn spike_event(&self, proj: &Projection, attrs: &[Attribute], scope: &ProjectionScope) -> Result<String> {
        let object = proj.object();
        let events: Vec<&Attribute> = attrs.iter().collect();
        let index = scope.synapse_index();
        let mut body = String::new();

        if has_event_driven(proj) {
            body.push_str(&format!("long int _elapsed = t - _last_event{};\n", index));
            body.push_str(&event_block(&events, |eq, a| {
                render(eq, scope, object, &format!("event-driven update of '{}'", a.name))
            })?);
        }
        if proj.synapse.pre_spike.is_empty() {
            let psp = render(psp_term(proj), scope, object, "pre-synaptic event")?;
            let target = render("${post.g_target}", scope, object, "pre-synaptic event")?;
            body.push_str(&format!("{} += {};\n", target, psp.trim().trim_end_matches(';')));
        } else {
            for line in &proj.synapse.pre_spike {
                body.push_str(&statement(&render(line, scope, object, "pre-synaptic event")?));
                body.push('\n');
            }
        }
        if has_event_driven(proj) {
            body.push_str(&format!("_last_event{} = t;\n", index));
        }
        Ok(body)
    }

    fn host_psp(
        &self,
        proj: &Projection,
        strategy: &dyn ConnectivityStrategy,
        scope: &ProjectionScope,
    ) -> Result<String> {
        let object = proj.object();
        let mut body = String::from("        if (!_transmission)\n            return;\n");

        if proj.is_spiking() {
            let pre = population::instance(scope.pre.pop);
            let spikes = match proj.delay {
                Delay::Uniform(d) if d > 1 => format!("{}._delayed_spike[{}]", pre, d - 1),
                _ => format!("{}.spiked", pre),
            };
            let event = self.spike_event(proj, scope.attrs, scope)?;
            body.push_str(&format!(
                "        for (int _idx = 0; _idx < {spikes}.size(); _idx++) {{\n\
                 \x20           int rk_pre = {spikes}[_idx];\n\
                 \x20           auto inv = inv_pre_rank.find(rk_pre);\n\
                 \x20           if (inv == inv_pre_rank.end())\n\
                 \x20               continue;\n\
                 \x20           for (auto it = inv->second.begin(); it != inv->second.end(); it++) {{\n\
                 \x20               int n = it->first;\n\
                 \x20               int j = it->second;\n\
                 \x20               int rk_post = {};\n\
                 {}\
                 \x20           }}\n\
                 \x20       }}\n",
                strategy.post_rank(),
                indent(&event, 4)
            ));
        } else {
            let psp = render(psp_term(proj), scope, object, "weighted sum")?;
            let target = render("${post.g_target}", scope, object, "weighted sum")?;
            let real = self.real();
            let accumulate = format!("sum += {};\n", psp.trim().trim_end_matches(';'));
            body.push_str(&indent(&crate::backend::openmp::parallel_for(self.config), 2));
            body.push_str(&format!(
                "        for (int n = 0; n < nb_dendrites(); n++) {{\n\
                 \x20           int rk_post = {};\n\
                 \x20           {real} sum = 0.0;\n\
                 {}\
                 \x20           {target} += sum;\n\
                 \x20       }}\n",
                strategy.post_rank(),
                indent(&strategy.row_loop(&accumulate), 3)
            ));
        }
        Ok(format!("    void compute_psp() {{\n{}    }}\n", body))
    }

    fn device_psp(
        &self,
        proj: &Projection,
        strategy: &dyn ConnectivityStrategy,
        scope: &ProjectionScope,
    ) -> Result<(String, String)> {
        let object = proj.object();
        let name = instance(proj);
        let real = self.real();

        let inner = if proj.is_spiking() {
            let event = self.spike_event(proj, scope.attrs, scope)?;
            scope.request(
                "long int* pre_last_spike".into(),
                format!("{}.gpu_last_spike", population::instance(scope.pre.pop)),
            );
            let fire = format!("if (pre_last_spike[rk_pre] == t - 1) {{\n{}}}\n", indent(&event, 1));
            strategy.row_loop(&fire)
        } else {
            let psp = render(psp_term(proj), scope, object, "weighted sum")?;
            let target = render("${post.g_target}", scope, object, "weighted sum")?;
            let accumulate = format!("sum += {};\n", psp.trim().trim_end_matches(';'));
            format!(
                "{real} sum = 0.0;\n{}{target} += sum;\n",
                strategy.row_loop(&accumulate)
            )
        };

        let kernel = format!("cuda_{}_psp", name);
        let (text, launch) = self.dendrite_kernel(proj, strategy, scope, &kernel, &inner);
        let launch = format!(
            "    if ({name}._transmission) {{\n{}    }}\n",
            indent(&launch, 1)
        );
        Ok((text, launch))
    }

    /// Kernel with one thread per dendrite and its host-side launch
    fn dendrite_kernel(
        &self,
        proj: &Projection,
        strategy: &dyn ConnectivityStrategy,
        scope: &ProjectionScope,
        kernel: &str,
        inner: &str,
    ) -> (String, String) {
        let name = instance(proj);
        let mut args: Vec<KernelArg> = strategy
            .kernel_args()
            .into_iter()
            .map(|a| KernelArg::new(a.decl, format!("{}.{}", name, a.member)))
            .collect();
        args.extend(scope.take_args());

        let params: Vec<&str> = args.iter().map(|a| a.decl.as_str()).collect();
        let values: Vec<&str> = args.iter().map(|a| a.member.as_str()).collect();

        let text = format!(
            "__global__ void {kernel}(long int t, {real} dt, int nb_dendrites, {params}) {{\n\
             \x20   int n = threadIdx.x + blockIdx.x * blockDim.x;\n\
             \x20   while (n < nb_dendrites) {{\n\
             \x20       int rk_post = {rank};\n\
             {body}\
             \x20       n += blockDim.x * gridDim.x;\n\
             \x20   }}\n\
             }}\n\n",
            real = self.real(),
            params = params.join(", "),
            rank = strategy.post_rank(),
            body = indent(inner, 2)
        );
        let launch = format!(
            "    if ({name}._nb_blocks > 0)\n\
             \x20       {kernel}<<<{name}._nb_blocks, {name}._threads_per_block>>>(t, dt, {name}.nb_dendrites(), {});\n",
            values.join(", ")
        );
        (text, launch)
    }

    // ------------------------------------------------------------------------
    // Synaptic update
    // ------------------------------------------------------------------------

    fn grouped<'b>(&self, attrs: &'b [Attribute], locality: Locality) -> Vec<&'b Attribute> {
        attrs
            .iter()
            .filter(|a| a.locality == locality && a.is_updated() && a.method != Method::EventDriven)
            .collect()
    }

    fn host_update(
        &self,
        proj: &Projection,
        strategy: &dyn ConnectivityStrategy,
        scope: &ProjectionScope,
    ) -> Result<Option<String>> {
        let object = proj.object();
        let render_eq = |eq: &str, a: &Attribute| {
            render(eq, scope, object, &format!("update of '{}'", a.name))
        };
        let global = update_block(&self.grouped(scope.attrs, Locality::Global), render_eq)?;
        let semiglobal = update_block(&self.grouped(scope.attrs, Locality::Semiglobal), render_eq)?;
        let local = update_block(&self.grouped(scope.attrs, Locality::Local), render_eq)?;
        if global.is_empty() && semiglobal.is_empty() && local.is_empty() {
            return Ok(None);
        }

        let mut body = String::from(
            "        if (!_update || !_plasticity)\n\
             \x20           return;\n\
             \x20       if ((_update_period > 1) && ((t - _update_offset) % _update_period != 0))\n\
             \x20           return;\n",
        );
        body.push_str(&indent(&global, 2));
        if !semiglobal.is_empty() || !local.is_empty() {
            let mut dendrite = semiglobal;
            if !local.is_empty() {
                dendrite.push_str(&strategy.row_loop(&local));
            }
            body.push_str(&indent(&crate::backend::openmp::parallel_for(self.config), 2));
            body.push_str(&format!(
                "        for (int n = 0; n < nb_dendrites(); n++) {{\n\
                 \x20           int rk_post = {};\n\
                 {}\
                 \x20       }}\n",
                strategy.post_rank(),
                indent(&dendrite, 3)
            ));
        }
        Ok(Some(format!("    void update_synapse() {{\n{}    }}\n", body)))
    }

    fn device_update(
        &self,
        proj: &Projection,
        strategy: &dyn ConnectivityStrategy,
        scope: &ProjectionScope,
    ) -> Result<Option<(String, String)>> {
        let object = proj.object();
        let name = instance(proj);
        let render_eq = |eq: &str, a: &Attribute| {
            render(eq, scope, object, &format!("update of '{}'", a.name))
        };

        let global = update_block(&self.grouped(scope.attrs, Locality::Global), render_eq)?;
        let global_args = scope.take_args();
        let semiglobal = update_block(&self.grouped(scope.attrs, Locality::Semiglobal), render_eq)?;
        let local = update_block(&self.grouped(scope.attrs, Locality::Local), render_eq)?;
        if global.is_empty() && semiglobal.is_empty() && local.is_empty() {
            return Ok(None);
        }

        let mut text = String::new();
        let mut launch = String::new();
        if !global.is_empty() {
            let params: Vec<&str> = global_args.iter().map(|a| a.decl.as_str()).collect();
            let values: Vec<&str> = global_args.iter().map(|a| a.member.as_str()).collect();
            let (params, values) = (params.join(", "), values.join(", "));
            let (params, values) = if params.is_empty() {
                (String::new(), String::new())
            } else {
                (format!(", {params}"), format!(", {values}"))
            };
            text.push_str(&format!(
                "__global__ void cuda_{name}_global_update(long int t, {real} dt{params}) {{\n{}}}\n\n",
                indent(&global, 1),
                real = self.real()
            ));
            launch.push_str(&format!(
                "    cuda_{name}_global_update<<<1, 1>>>(t, dt{values});\n"
            ));
        }
        if !semiglobal.is_empty() || !local.is_empty() {
            let mut inner = semiglobal;
            if !local.is_empty() {
                inner.push_str(&strategy.row_loop(&local));
            }
            let kernel = format!("cuda_{}_local_update", name);
            let (kernels, call) = self.dendrite_kernel(proj, strategy, scope, &kernel, &inner);
            text.push_str(&kernels);
            launch.push_str(&call);
        }

        let launch = format!(
            "    if ({name}._update && {name}._plasticity && \
             (({name}._update_period <= 1) || ((t - {name}._update_offset) % {name}._update_period == 0))) {{\n{}    }}\n",
            indent(&launch, 1)
        );
        Ok(Some((text, launch)))
    }

    // ------------------------------------------------------------------------
    // Post-synaptic events
    // ------------------------------------------------------------------------

    fn post_event_body(&self, proj: &Projection, scope: &ProjectionScope) -> Result<String> {
        let object = proj.object();
        let index = scope.synapse_index();
        let events: Vec<&Attribute> = scope.attrs.iter().collect();
        let mut body = String::new();
        if has_event_driven(proj) {
            body.push_str(&format!("long int _elapsed = t - _last_event{};\n", index));
            body.push_str(&event_block(&events, |eq, a| {
                render(eq, scope, object, &format!("event-driven update of '{}'", a.name))
            })?);
        }
        for line in &proj.synapse.post_spike {
            body.push_str(&statement(&render(line, scope, object, "post-synaptic event")?));
            body.push('\n');
        }
        if has_event_driven(proj) {
            body.push_str(&format!("_last_event{} = t;\n", index));
        }
        Ok(body)
    }

    fn host_post_event(
        &self,
        proj: &Projection,
        strategy: &dyn ConnectivityStrategy,
        scope: &ProjectionScope,
    ) -> Result<Option<String>> {
        if proj.synapse.post_spike.is_empty() || !scope.post.pop.is_spiking() {
            return Ok(None);
        }
        let post = population::instance(scope.post.pop);
        let body = self.post_event_body(proj, scope)?;
        Ok(Some(format!(
            "    void post_event() {{\n\
             \x20       if (!_plasticity)\n\
             \x20           return;\n\
             \x20       for (int _idx = 0; _idx < {post}.spiked.size(); _idx++) {{\n\
             \x20           int rk_post = {post}.spiked[_idx];\n\
             \x20           int n = dendrite_index(rk_post);\n\
             \x20           if (n < 0)\n\
             \x20               continue;\n\
             {}\
             \x20       }}\n\
             \x20   }}\n",
            indent(&strategy.row_loop(&body), 3)
        )))
    }

    fn device_post_event(
        &self,
        proj: &Projection,
        strategy: &dyn ConnectivityStrategy,
        scope: &ProjectionScope,
    ) -> Result<Option<(String, String)>> {
        if proj.synapse.post_spike.is_empty() || !scope.post.pop.is_spiking() {
            return Ok(None);
        }
        let name = instance(proj);
        let body = self.post_event_body(proj, scope)?;
        scope.request(
            "long int* post_last_spike".into(),
            format!("{}.gpu_last_spike", population::instance(scope.post.pop)),
        );
        let inner = format!(
            "if (post_last_spike[rk_post] == t) {{\n{}}}\n",
            indent(&strategy.row_loop(&body), 1)
        );
        let kernel = format!("cuda_{}_post_event", name);
        let (text, launch) = self.dendrite_kernel(proj, strategy, scope, &kernel, &inner);
        Ok(Some((
            text,
            format!("    if ({name}._plasticity) {{\n{}    }}\n", indent(&launch, 1)),
        )))
    }
}

/// Transmitted term of one synapse
pub(crate) fn psp_term(proj: &Projection) -> &str {
    match (&proj.synapse.psp, proj.is_spiking()) {
        (Some(psp), _) => psp,
        (None, false) => crate::DEFAULT_RATE_PSP,
        (None, true) => crate::DEFAULT_SPIKE_PSP,
    }
}

const LEARNING_FLAGS: &str = "    // Learning switches
    bool _transmission;
    bool _plasticity;
    bool _update;
    int _update_period;
    long int _update_offset;
";

const LEARNING_DEFAULTS: &str = "    _transmission = true;
    _plasticity = true;
    _update = true;
    _update_period = 1;
    _update_offset = 0L;
";

/// Headers and instances of the populations a projection reads
pub(crate) fn includes(pops: &[&Population]) -> String {
    let mut ids: Vec<usize> = pops.iter().map(|p| p.id).collect();
    ids.sort_unstable();
    ids.dedup();
    let mut text = String::new();
    for id in &ids {
        text.push_str(&format!("#include \"pop{}.hpp\"\n", id));
    }
    text.push('\n');
    for id in &ids {
        text.push_str(&format!("extern PopStruct{id} pop{id};\n"));
    }
    text
}

/// Device file content of one projection. Each phase gets a host launcher
/// `cuda_proj<id>_<phase>_step()` called from the step function.
struct DeviceCode {
    object: ObjectId,
    name: String,
    text: String,
    prototypes: String,
    calls: Vec<(FragmentKind, String)>,
}

impl DeviceCode {
    fn new(proj: &Projection, banner: &str) -> Self {
        Self {
            object: proj.object(),
            name: instance(proj),
            text: banner.to_string(),
            prototypes: String::new(),
            calls: Vec::new(),
        }
    }

    fn phase(&mut self, phase: &str, kind: FragmentKind, kernels: String, launch: String) {
        let launcher = format!("cuda_{}_{}_step", self.name, phase);
        self.text.push_str(&kernels);
        self.text
            .push_str(&format!("void {launcher}() {{\n{launch}}}\n\n"));
        self.prototypes.push_str(&format!("void {launcher}();\n"));
        self.calls.push((kind, format!("    {launcher}();\n")));
    }

    fn finish(self, fragments: &mut FragmentSet) {
        for (kind, call) in self.calls {
            fragments.push(self.object, kind, call);
        }
        fragments.push(self.object, FragmentKind::DeviceCode, self.text);
        fragments.push(self.object, FragmentKind::DevicePrototypes, self.prototypes);
    }
}

pub(crate) fn header(proj: &Projection, cuda: bool, code: StructCode) -> String {
    let mut text = format!(
        "/*\n *  proj{id}.hpp\n *\n *  Projection {id}: pop{pre} -> pop{post}, target {target}, {format}\n */\n\
         #pragma once\n\
         #include <vector>\n\
         #include <deque>\n\
         #include <map>\n\
         #include <cmath>\n\
         #include <algorithm>\n\
         #include <iostream>\n\
         #include <cassert>\n",
        id = proj.id,
        pre = proj.pre.population,
        post = proj.post.population,
        target = proj.target,
        format = proj.format,
    );
    if cuda {
        text.push_str("#include <cuda_runtime_api.h>\n");
    }
    text.push_str(&code.includes);
    text.push_str(&format!("\nextern long int t;\n\nstruct {} {{\n", struct_name(proj)));
    text.push_str(&code.declaration);
    text.push_str(&format!(
        "\n    void init_projection() {{\n{}    }}\n\n",
        indent(&code.initializer, 1)
    ));
    text.push_str(&code.methods);
    text.push('\n');
    text.push_str(&code.accessors);
    if cuda {
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

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::propagate::propagate;
    use neurogen_core::NetworkDescription;

    pub(crate) fn generate(json: &str, config: &GeneratorConfig, id: usize) -> Result<FragmentSet> {
        let desc = NetworkDescription::from_json(json)?;
        let net = Network::from_description(&desc, config)?;
        let table = propagate(&net)?;
        ProjectionGenerator::new(config, &net, &table).build(net.projection(id)?)
    }

    pub(crate) const RATE: &str = r#"{
        "populations": [
            {"id": 0, "name": "in", "size": 10, "neuron_type": "rate",
             "attributes": [{"name": "r", "locality": "local"}]},
            {"id": 1, "name": "out", "size": 10, "neuron_type": "rate",
             "attributes": [{"name": "r", "locality": "local", "method": "exact", "eq": "${r} = ${sum.exc}"}]}
        ],
        "projections": [
            {"id": 0, "pre": 0, "post": 1, "target": "exc",
             "synapse": {"attributes": [
                {"name": "eta", "locality": "global", "attr_type": "parameter", "init": "0.01"},
                {"name": "w", "locality": "local"},
                {"name": "trace", "locality": "semiglobal", "method": "explicit", "eq": "${post.r} - ${trace}"},
                {"name": "w_new", "locality": "local", "method": "exact",
                 "eq": "${w} += ${eta} * ${pre.r} * ${post.r}"}]}}
        ]
    }"#;

    pub(crate) const SPIKE: &str = r#"{
        "populations": [
            {"id": 0, "name": "in", "size": 10, "neuron_type": "spike",
             "attributes": [{"name": "v", "locality": "local"}],
             "spike": {"condition": "${v} > 1.0"}},
            {"id": 1, "name": "out", "size": 10, "neuron_type": "spike",
             "attributes": [{"name": "v", "locality": "local", "eq": "-${v} + ${g_exc}"}],
             "spike": {"condition": "${v} > 1.0", "reset": ["${v} = 0.0"]}}
        ],
        "projections": [
            {"id": 0, "pre": 0, "post": 1, "target": "exc",
             "synapse": {"synapse_type": "spike",
                         "attributes": [
                            {"name": "w", "locality": "local"},
                            {"name": "x", "locality": "local", "method": "event-driven",
                             "eq": "${x} = ${x} * exp(-_elapsed / 20.0)"}],
                         "pre_spike": ["${post.g_target} += ${w}", "${x} += 1.0"],
                         "post_spike": ["${w} += 0.01 * ${x}"]}}
        ]
    }"#;

    #[test]
    fn test_rate_transmission_lil() {
        let set = generate(RATE, &GeneratorConfig::default(), 0).unwrap();
        let header = set.concat(FragmentKind::Header);
        assert!(header.contains("struct ProjStruct0 {"));
        assert!(header.contains("sum += w[n][j] * pop0.r[rk_pre];"));
        assert!(header.contains("pop1._sum_exc[rk_post] += sum;"));
        assert!(header.contains("void init_connectivity(std::vector<int> post_ranks, std::vector<std::vector<int>> pre_ranks, std::vector<std::vector<double>> values)"));
        assert_eq!(set.concat(FragmentKind::ComputePsp), "    proj0.compute_psp();\n");
    }

    #[test]
    fn test_synaptic_update_by_locality() {
        let set = generate(RATE, &GeneratorConfig::default(), 0).unwrap();
        let header = set.concat(FragmentKind::Header);
        assert!(header.contains("double _trace = pop1.r[rk_post] - trace[n];"));
        assert!(header.contains("trace[n] += dt * _trace;"));
        assert!(header.contains("w[n][j] += eta * pop0.r[rk_pre] * pop1.r[rk_post];"));
        assert!(header.contains("((t - _update_offset) % _update_period != 0)"));
        assert_eq!(set.concat(FragmentKind::UpdateSynapses), "    proj0.update_synapse();\n");
    }

    #[test]
    fn test_single_weight_uses_scalar() {
        let json = RATE.replace("\"target\": \"exc\",", "\"target\": \"exc\", \"single_weight\": true,");
        let set = generate(&json, &GeneratorConfig::default(), 0).unwrap();
        let header = set.concat(FragmentKind::Header);
        assert!(header.contains("sum += w * pop0.r[rk_pre];"));
        assert!(header.contains("    double w;\n"));
        assert!(header.contains("double values)"));
    }

    #[test]
    fn test_rate_transmission_csr_and_delays() {
        let json = RATE.replace(
            "\"target\": \"exc\",",
            "\"target\": \"exc\", \"storage_format\": \"csr\", \"delay\": {\"uniform\": 3},",
        );
        let set = generate(&json, &GeneratorConfig::default(), 0).unwrap();
        let header = set.concat(FragmentKind::Header);
        assert!(header.contains("for (int j = row_ptr_[n]; j < row_ptr_[n+1]; j++) {"));
        assert!(header.contains("sum += w[j] * pop0._delayed_r[2][rk_pre];"));
        // Learning rules read the current value
        assert!(header.contains("w[j] += eta * pop0.r[rk_pre] * pop1.r[rk_post];"));
    }

    #[test]
    fn test_non_uniform_delay_attribute() {
        let json = RATE.replace("\"target\": \"exc\",", "\"target\": \"exc\", \"delay\": {\"non_uniform\": 4},");
        let set = generate(&json, &GeneratorConfig::default(), 0).unwrap();
        let header = set.concat(FragmentKind::Header);
        assert!(header.contains("pop0._delayed_r[delay[n][j] - 1][rk_pre]"));
        assert!(header.contains("std::vector<std::vector<int>> delays"));
        assert!(header.contains("update_matrix_variable_all<int>(delay, delays);"));
    }

    #[test]
    fn test_spiking_events() {
        let set = generate(SPIKE, &GeneratorConfig::default(), 0).unwrap();
        let header = set.concat(FragmentKind::Header);
        assert!(header.contains("std::map<int, std::vector<std::pair<int, int>>> inv_pre_rank;"));
        assert!(header.contains("auto inv = inv_pre_rank.find(rk_pre);"));
        assert!(header.contains("long int _elapsed = t - _last_event[n][j];"));
        assert!(header.contains("x[n][j] = x[n][j] * exp(-_elapsed / 20.0);"));
        assert!(header.contains("pop1.g_exc[rk_post] += w[n][j];"));
        assert!(header.contains("int n = dendrite_index(rk_post);"));
        assert!(header.contains("w[n][j] += 0.01 * x[n][j];"));
        assert_eq!(set.concat(FragmentKind::PostEvents), "    proj0.post_event();\n");
        // Event-driven attributes are not updated every step
        assert!(set.concat(FragmentKind::UpdateSynapses).is_empty());
    }

    #[test]
    fn test_cuda_kernels() {
        let config = GeneratorConfig {
            backend: Backend::Cuda,
            ..GeneratorConfig::default()
        };
        let json = RATE.replace("\"target\": \"exc\",", "\"target\": \"exc\", \"storage_format\": \"csr\",");
        let set = generate(&json, &config, 0).unwrap();
        let device = set.concat(FragmentKind::DeviceCode);
        assert!(device.contains("__global__ void cuda_proj0_psp(long int t, double dt, int nb_dendrites, int* post_ranks_, int* row_ptr_, int* col_idx_, double* w, double* pre_r, double* post__sum_exc)"));
        assert!(device.contains("sum += w[j] * pre_r[rk_pre];"));
        assert!(device.contains("post__sum_exc[rk_post] += sum;"));
        assert!(device.contains("(*eta_ptr)"));
        assert!(device.contains("cuda_proj0_psp<<<proj0._nb_blocks, proj0._threads_per_block>>>(t, dt, proj0.nb_dendrites(), proj0.gpu_post_ranks_"));
        assert!(device.contains("pop0.gpu_r, pop1.gpu__sum_exc);"));
        assert!(device.contains("void cuda_proj0_psp_step() {"));
        assert_eq!(set.concat(FragmentKind::ComputePsp), "    cuda_proj0_psp_step();\n");
        assert_eq!(
            set.concat(FragmentKind::DevicePrototypes),
            "void cuda_proj0_psp_step();\nvoid cuda_proj0_update_step();\n"
        );
        assert!(set.concat(FragmentKind::Header).contains("connectivity_to_device();"));
    }

    #[test]
    fn test_unknown_symbol_reported() {
        let json = RATE.replace("${post.r} - ${trace}", "${post.missing} - ${trace}");
        let err = generate(&json, &GeneratorConfig::default(), 0).unwrap_err();
        assert!(err.to_string().contains("proj0: unresolved symbol '${post.missing}'"));
    }
}
