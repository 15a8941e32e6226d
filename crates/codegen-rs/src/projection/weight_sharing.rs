//! Weight-sharing projections.
//!
//! Every dendrite applies the same kernel of `kernel_size` weights to its own
//! list of pre-synaptic coordinates. Local attributes are stored once per
//! kernel position instead of once per synapse; a negative coordinate marks
//! a kernel position falling outside the pre-synaptic population.

use neurogen_core::{Locality, Projection, Result};

use super::{
    header, includes, instance, psp_term, storage_attributes, Own, ProjectionGenerator,
    ProjectionScope, StructCode, LEARNING_DEFAULTS, LEARNING_FLAGS,
};
use crate::attributes::{attribute_code, AttributeRequest, LocalLayout, Owner};
use crate::fragment::{FragmentKind, FragmentSet};
use crate::template::{indent, render, Site};

pub(super) fn build(
    gen: &ProjectionGenerator,
    proj: &Projection,
    kernel_size: usize,
) -> Result<FragmentSet> {
    let object = proj.object();
    let name = instance(proj);
    let (pre, post) = gen.sides(proj)?;
    let attrs = storage_attributes(proj);
    let real = gen.real();

    let mut code = StructCode {
        includes: includes(&[pre.pop, post.pop]),
        ..StructCode::default()
    };
    code.declaration.push_str(
        "    // Shared kernel\n\
         \x20   std::vector<int> post_rank;\n\
         \x20   std::vector<std::vector<int>> pre_coords;\n\
         \x20   int kernel_size;\n",
    );
    code.declaration.push_str(LEARNING_FLAGS);
    code.initializer.push_str(LEARNING_DEFAULTS);
    code.initializer
        .push_str(&format!("    kernel_size = {};\n", kernel_size));
    code.size_in_bytes.push_str(
        "    size_in_bytes += sizeof(int) * post_rank.capacity();\n\
         \x20   for (auto it = pre_coords.cbegin(); it != pre_coords.cend(); it++)\n\
         \x20       size_in_bytes += sizeof(int) * it->capacity();\n",
    );
    code.clear.push_str("    post_rank.clear();\n    pre_coords.clear();\n");

    let mut allocation = String::new();
    for attr in &attrs {
        let (x, t, init) = (&attr.name, &attr.ctype, &attr.init);
        match attr.locality {
            Locality::Global => {
                let request = AttributeRequest {
                    name: x,
                    ctype: t,
                    locality: attr.locality,
                    kind: attr.kind,
                    init,
                    layout: LocalLayout::Flat,
                };
                let c = attribute_code(object, gen.config.backend, Owner::Projection, &request)?;
                code.declaration.push_str(&c.declaration);
                allocation.push_str(&c.initializer);
                code.accessors.push_str(&c.accessors);
                code.size_in_bytes.push_str(&c.size_in_bytes);
            }
            Locality::Semiglobal => {
                code.declaration
                    .push_str(&format!("    // Semiglobal {} {x}\n    std::vector<{t}> {x};\n", attr.kind.as_str()));
                allocation.push_str(&format!(
                    "    {x} = std::vector<{t}>(post_rank.size(), static_cast<{t}>({init}));\n"
                ));
                code.accessors.push_str(&format!(
                    "    std::vector<{t}> get_{x}() {{ return {x}; }}\n\
                     \x20   void set_{x}(std::vector<{t}> value) {{ {x} = value; }}\n\
                     \x20   {t} get_dendrite_{x}(int n) {{ return {x}[n]; }}\n\
                     \x20   void set_dendrite_{x}(int n, {t} value) {{ {x}[n] = value; }}\n"
                ));
                code.size_in_bytes
                    .push_str(&format!("    size_in_bytes += sizeof({t}) * {x}.capacity();\n"));
                code.clear.push_str(&format!("    {x}.clear();\n"));
            }
            Locality::Local => {
                code.declaration.push_str(&format!(
                    "    // Kernel {} {x}\n    std::vector<{t}> {x};\n",
                    attr.kind.as_str()
                ));
                allocation.push_str(&format!(
                    "    {x} = std::vector<{t}>(kernel_size, static_cast<{t}>({init}));\n"
                ));
                code.accessors.push_str(&format!(
                    "    std::vector<{t}> get_{x}() {{ return {x}; }}\n\
                     \x20   void set_{x}(std::vector<{t}> value) {{ {x} = value; }}\n"
                ));
                code.size_in_bytes
                    .push_str(&format!("    size_in_bytes += sizeof({t}) * {x}.capacity();\n"));
                code.clear.push_str(&format!("    {x}.clear();\n"));
            }
        }
    }

    // init_connectivity(post_ranks, coords, kernel)
    let mut params = vec![
        "std::vector<int> post_ranks".to_string(),
        "std::vector<std::vector<int>> coords".to_string(),
    ];
    let mut body = String::from(
        "        post_rank = post_ranks;\n\
         \x20       pre_coords = coords;\n",
    );
    body.push_str(&indent(&allocation, 1));
    if let Some(w) = attrs.iter().find(|a| a.name == "w") {
        let t = &w.ctype;
        match w.locality {
            Locality::Local => {
                params.push(format!("std::vector<{t}> kernel"));
                body.push_str("        assert(kernel.size() == kernel_size);\n        w = kernel;\n");
            }
            Locality::Semiglobal => {
                params.push(format!("std::vector<{t}> kernel"));
                body.push_str("        w = kernel;\n");
            }
            Locality::Global => {
                params.push(format!("{t} kernel"));
                body.push_str("        w = kernel;\n");
            }
        }
    }
    code.methods.push_str(&format!(
        "    void init_connectivity({}) {{\n{}    }}\n\n",
        params.join(", "),
        body
    ));

    let scope = ProjectionScope::new(proj, &attrs, &pre, &post, Own::Kernel, Site::Host);
    let psp = render(psp_term(proj), &scope, object, "shared weighted sum")?;
    let target = render("${post.g_target}", &scope, object, "shared weighted sum")?;
    let accumulate = format!("sum += {};\n", psp.trim().trim_end_matches(';'));
    code.methods.push_str(&format!(
        "    void compute_psp() {{\n\
         \x20       if (!_transmission)\n\
         \x20           return;\n\
         {pragma}\
         \x20       for (int n = 0; n < post_rank.size(); n++) {{\n\
         \x20           int rk_post = post_rank[n];\n\
         \x20           {real} sum = 0.0;\n\
         \x20           for (int k = 0; k < kernel_size; k++) {{\n\
         \x20               int rk_pre = pre_coords[n][k];\n\
         \x20               if (rk_pre < 0)\n\
         \x20                   continue;\n\
         {body}\
         \x20           }}\n\
         \x20           {target} += sum;\n\
         \x20       }}\n\
         \x20   }}\n",
        pragma = indent(&crate::backend::openmp::parallel_for(gen.config), 2),
        body = indent(&accumulate, 4),
    ));

    code.accessors.push_str(
        "    std::vector<int> get_post_rank() { return post_rank; }\n\
         \x20   std::vector<std::vector<int>> get_pre_coords() { return pre_coords; }\n\
         \x20   std::vector<int> get_dendrite_pre_coords(int n) { return pre_coords[n]; }\n\
         \x20   int nb_dendrites() { return post_rank.size(); }\n\
         \x20   int dendrite_size(int n) { return kernel_size; }\n\
         \x20   int nb_synapses() { return post_rank.size() * kernel_size; }\n\
         \x20   int dendrite_index(int rk_post) {\n\
         \x20       auto it = std::find(post_rank.begin(), post_rank.end(), rk_post);\n\
         \x20       return it == post_rank.end() ? -1 : std::distance(post_rank.begin(), it);\n\
         \x20   }\n",
    );

    let mut fragments = FragmentSet::new();
    fragments.push(object, FragmentKind::ComputePsp, format!("    {}.compute_psp();\n", name));
    gen.common_fragments(proj, &mut fragments);
    fragments.push(object, FragmentKind::Header, header(proj, false, code));
    Ok(fragments)
}
