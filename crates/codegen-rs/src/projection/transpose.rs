//! Transpose projections.
//!
//! No connectivity of their own: at initialization the forward projection's
//! connectivity is inverted into a pre-rank keyed `std::map`, which yields
//! the transposed dendrites in ascending rank order. Transmission reads the
//! forward weights in place through the coordinates kept for every entry.

use neurogen_core::{Attribute, Locality, Projection, Result, StorageFormat};

use super::{
    header, includes, instance, psp_term, storage_attributes, struct_name, Own,
    ProjectionGenerator, ProjectionScope, StructCode, LEARNING_DEFAULTS, LEARNING_FLAGS,
};
use crate::fragment::{FragmentKind, FragmentSet};
use crate::template::{indent, render, Scope, Site};

/// Own symbols resolve to the forward projection's attributes, addressed by
/// the forward coordinates `(n, k)`.
struct TransposeScope<'a> {
    inner: &'a ProjectionScope<'a>,
    forward: &'a Projection,
    attrs: Vec<Attribute>,
}

impl Scope for TransposeScope<'_> {
    fn resolve(&self, symbol: &str) -> Option<String> {
        if symbol.starts_with("pre.") || symbol.starts_with("post.") || symbol == "t" || symbol == "dt" {
            return self.inner.resolve(symbol);
        }
        let attr = self.attrs.iter().find(|a| a.name == symbol)?;
        let fwd = instance(self.forward);
        let x = &attr.name;
        Some(match attr.locality {
            Locality::Global => format!("{fwd}.{x}"),
            Locality::Semiglobal => format!("{fwd}.{x}[n]"),
            Locality::Local if self.forward.format == StorageFormat::Lil => {
                format!("{fwd}.{x}[n][k]")
            }
            Locality::Local => format!(
                "{fwd}.get_matrix_variable<{t}>({fwd}.{x}, n, k)",
                t = attr.ctype
            ),
        })
    }
}

pub(super) fn build(
    gen: &ProjectionGenerator,
    proj: &Projection,
    forward: &Projection,
) -> Result<FragmentSet> {
    let object = proj.object();
    let name = instance(proj);
    let fwd = instance(forward);
    let (pre, post) = gen.sides(proj)?;

    let inner = ProjectionScope::new(proj, &[], &pre, &post, Own::Kernel, Site::Host);
    let scope = TransposeScope {
        inner: &inner,
        forward,
        attrs: storage_attributes(forward),
    };
    let psp = render(psp_term(proj), &scope, object, "transposed weighted sum")?;
    let target = render("${post.g_target}", &scope, object, "transposed weighted sum")?;

    let mut code = StructCode {
        includes: format!(
            "{}#include \"{fwd}.hpp\"\nextern {} {fwd};\n",
            includes(&[pre.pop, post.pop]),
            struct_name(forward)
        ),
        ..StructCode::default()
    };
    code.declaration.push_str(&format!(
        "    // Transpose of {fwd}\n\
         \x20   std::vector<int> post_rank;\n\
         \x20   std::vector<std::vector<int>> pre_rank;\n\
         \x20   std::vector<std::vector<int>> _fwd_dendrite;\n\
         \x20   std::vector<std::vector<int>> _fwd_synapse;\n"
    ));
    code.declaration.push_str(LEARNING_FLAGS);
    code.initializer.push_str(LEARNING_DEFAULTS);
    code.initializer.push_str(&format!(
        "    // forward pre rank -> (forward post rank, dendrite, synapse)\n\
         \x20   std::map<int, std::vector<std::vector<int>>> inverse;\n\
         \x20   std::vector<int> fwd_post = {fwd}.get_post_rank();\n\
         \x20   for (int n = 0; n < {fwd}.nb_dendrites(); n++) {{\n\
         \x20       std::vector<int> fwd_pre = {fwd}.get_dendrite_pre_rank(n);\n\
         \x20       for (int k = 0; k < fwd_pre.size(); k++)\n\
         \x20           inverse[fwd_pre[k]].push_back(std::vector<int>{{fwd_post[n], n, k}});\n\
         \x20   }}\n\
         \x20   post_rank.clear();\n\
         \x20   pre_rank.clear();\n\
         \x20   _fwd_dendrite.clear();\n\
         \x20   _fwd_synapse.clear();\n\
         \x20   int total = 0;\n\
         \x20   for (auto it = inverse.begin(); it != inverse.end(); it++) {{\n\
         \x20       post_rank.push_back(it->first);\n\
         \x20       std::vector<int> ranks, dendrites, synapses;\n\
         \x20       for (auto entry = it->second.begin(); entry != it->second.end(); entry++) {{\n\
         \x20           ranks.push_back((*entry)[0]);\n\
         \x20           dendrites.push_back((*entry)[1]);\n\
         \x20           synapses.push_back((*entry)[2]);\n\
         \x20       }}\n\
         \x20       total += ranks.size();\n\
         \x20       pre_rank.push_back(ranks);\n\
         \x20       _fwd_dendrite.push_back(dendrites);\n\
         \x20       _fwd_synapse.push_back(synapses);\n\
         \x20   }}\n\
         \x20   assert(total == {fwd}.nb_synapses());\n"
    ));

    let real = gen.real();
    let accumulate = format!("sum += {};\n", psp.trim().trim_end_matches(';'));
    code.methods.push_str(&format!(
        "    void compute_psp() {{\n\
         \x20       if (!_transmission)\n\
         \x20           return;\n\
         {pragma}\
         \x20       for (int i = 0; i < post_rank.size(); i++) {{\n\
         \x20           int rk_post = post_rank[i];\n\
         \x20           {real} sum = 0.0;\n\
         \x20           for (int j = 0; j < pre_rank[i].size(); j++) {{\n\
         \x20               int rk_pre = pre_rank[i][j];\n\
         \x20               int n = _fwd_dendrite[i][j];\n\
         \x20               int k = _fwd_synapse[i][j];\n\
         {body}\
         \x20           }}\n\
         \x20           {target} += sum;\n\
         \x20       }}\n\
         \x20   }}\n",
        pragma = indent(&crate::backend::openmp::parallel_for(gen.config), 2),
        body = indent(&accumulate, 4),
    ));

    code.accessors.push_str(&format!(
        "    std::vector<int> get_post_rank() {{ return post_rank; }}\n\
         \x20   std::vector<std::vector<int>> get_pre_ranks() {{ return pre_rank; }}\n\
         \x20   std::vector<int> get_dendrite_pre_rank(int n) {{ return pre_rank[n]; }}\n\
         \x20   int nb_dendrites() {{ return post_rank.size(); }}\n\
         \x20   int dendrite_size(int n) {{ return pre_rank[n].size(); }}\n\
         \x20   int nb_synapses() {{\n\
         \x20       int size = 0;\n\
         \x20       for (auto it = pre_rank.cbegin(); it != pre_rank.cend(); it++)\n\
         \x20           size += it->size();\n\
         \x20       return size;\n\
         \x20   }}\n\n\
         {}",
        not_available(&struct_name(proj), real)
    ));
    code.size_in_bytes.push_str(
        "    size_in_bytes += sizeof(int) * post_rank.capacity();\n\
         \x20   for (int i = 0; i < pre_rank.size(); i++)\n\
         \x20       size_in_bytes += 3 * sizeof(int) * pre_rank[i].capacity();\n",
    );
    code.clear.push_str(
        "    post_rank.clear();\n\
         \x20   pre_rank.clear();\n\
         \x20   _fwd_dendrite.clear();\n\
         \x20   _fwd_synapse.clear();\n",
    );

    let mut fragments = FragmentSet::new();
    fragments.push(object, FragmentKind::ComputePsp, format!("    {}.compute_psp();\n", name));
    gen.common_fragments(proj, &mut fragments);
    fragments.push(object, FragmentKind::Header, header(proj, false, code));
    Ok(fragments)
}

/// Queries a transposed projection cannot answer from its own data
fn not_available(owner: &str, real: &str) -> String {
    let notice = |method: &str| {
        format!(
            "std::cout << \"{owner}::{method}(): not available for transposed projections.\" << std::endl;"
        )
    };
    format!(
        "    std::vector<std::vector<{real}>> connectivity_matrix() {{\n\
         \x20       {}\n\
         \x20       return std::vector<std::vector<{real}>>();\n\
         \x20   }}\n\
         \x20   std::vector<std::vector<{real}>> receptive_fields() {{\n\
         \x20       {}\n\
         \x20       return std::vector<std::vector<{real}>>();\n\
         \x20   }}\n\
         \x20   bool save(std::string filename) {{\n\
         \x20       {}\n\
         \x20       return false;\n\
         \x20   }}\n\
         \x20   bool load(std::string filename) {{\n\
         \x20       {}\n\
         \x20       return false;\n\
         \x20   }}\n",
        notice("connectivity_matrix"),
        notice("receptive_fields"),
        notice("save"),
        notice("load"),
    )
}
