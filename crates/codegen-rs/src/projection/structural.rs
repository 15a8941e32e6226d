//! Structural plasticity on list-of-lists connectivity.
//!
//! `addSynapse`/`removeSynapse` edit one dendrite and apply the identical
//! index operation to every per-synapse array, so the connectivity, the
//! attributes and the inverse index never disagree. Pre-synaptic ranks stay
//! sorted ascending within a dendrite.

use neurogen_core::{Attribute, Delay, Locality, Projection, Result};

use super::{instance, ProjectionScope, Side};
use crate::population;
use crate::template::{indent, render};

pub(super) struct StructuralCode {
    pub declaration: String,
    pub initializer: String,
    pub methods: String,
    /// Statements of the structural plasticity phase
    pub calls: String,
}

/// Statements of `init_connectivity` putting every dendrite of the edge list
/// in ascending pre-synaptic order, the initial weights and delays
/// permuted along, before `init_from_lil` stores it
pub(super) fn sort_rows(proj: &Projection, attrs: &[Attribute]) -> String {
    let mut arrays = vec![("pre_ranks", "int".to_string())];
    if let Some(w) = attrs.iter().find(|a| a.name == "w" && a.locality == Locality::Local) {
        arrays.push(("values", w.ctype.clone()));
    }
    if matches!(proj.delay, Delay::NonUniform(_)) {
        arrays.push(("delays", "int".to_string()));
    }

    let mut permute = String::new();
    for (x, t) in &arrays {
        permute.push_str(&format!(
            "std::vector<{t}> sorted_{x};\n\
             for (int k : order)\n\
             \x20   sorted_{x}.push_back({x}[n][k]);\n\
             {x}[n] = sorted_{x};\n"
        ));
    }
    format!(
        "for (int n = 0; n < pre_ranks.size(); n++) {{\n\
         \x20   std::vector<int> order(pre_ranks[n].size());\n\
         \x20   for (int k = 0; k < order.size(); k++)\n\
         \x20       order[k] = k;\n\
         \x20   std::sort(order.begin(), order.end(), [&](int a, int b) {{ return pre_ranks[n][a] < pre_ranks[n][b]; }});\n\
         {}\
         }}\n",
        indent(&permute, 1)
    )
}

pub(super) fn build(
    proj: &Projection,
    attrs: &[Attribute],
    scope: &ProjectionScope,
    pre: &Side,
) -> Result<StructuralCode> {
    let object = proj.object();
    let name = instance(proj);
    let locals: Vec<&Attribute> = attrs
        .iter()
        .filter(|a| a.locality == Locality::Local)
        .collect();
    let weight = attrs.iter().find(|a| a.name == "w");

    let mut code = StructuralCode {
        declaration: String::new(),
        initializer: String::new(),
        methods: String::new(),
        calls: String::new(),
    };

    // addSynapse(n, rk_pre, w, delay)
    let wtype = weight.map(|w| w.ctype.as_str()).unwrap_or("double");
    let mut insert = String::from(
        "auto it = std::lower_bound(pre_rank[n].begin(), pre_rank[n].end(), rk_pre);\n\
         if (it != pre_rank[n].end() && *it == rk_pre)\n\
         \x20   return false;\n\
         int j = std::distance(pre_rank[n].begin(), it);\n\
         pre_rank[n].insert(it, rk_pre);\n",
    );
    let mut erase = String::from("pre_rank[n].erase(pre_rank[n].begin() + j);\n");
    for attr in &locals {
        let x = &attr.name;
        let value = match x.as_str() {
            "w" => "weight".to_string(),
            "delay" => "d".to_string(),
            "_last_event" => "-10000L".to_string(),
            _ => format!("static_cast<{}>({})", attr.ctype, attr.init),
        };
        insert.push_str(&format!("{x}[n].insert({x}[n].begin() + j, {value});\n"));
        erase.push_str(&format!("{x}[n].erase({x}[n].begin() + j);\n"));
    }
    if proj.is_spiking() {
        insert.push_str("inverse_connectivity_matrix();\n");
        erase.push_str("inverse_connectivity_matrix();\n");
    }

    code.methods.push_str(&format!(
        "    // Structural plasticity\n\
         \x20   bool addSynapse(int n, int rk_pre, {wtype} weight, int d) {{\n\
         {}\
         \x20       return true;\n\
         \x20   }}\n\n\
         \x20   void removeSynapse(int n, int j) {{\n\
         {}\
         \x20   }}\n\n\
         \x20   bool add_synapse(int rk_post, int rk_pre, {wtype} weight, int d) {{\n\
         \x20       int n = dendrite_index(rk_post);\n\
         \x20       if (n < 0)\n\
         \x20           return false;\n\
         \x20       return addSynapse(n, rk_pre, weight, d);\n\
         \x20   }}\n\n\
         \x20   bool remove_synapse(int rk_post, int rk_pre) {{\n\
         \x20       int n = dendrite_index(rk_post);\n\
         \x20       if (n < 0)\n\
         \x20           return false;\n\
         \x20       auto it = std::lower_bound(pre_rank[n].begin(), pre_rank[n].end(), rk_pre);\n\
         \x20       if (it == pre_rank[n].end() || *it != rk_pre)\n\
         \x20           return false;\n\
         \x20       removeSynapse(n, std::distance(pre_rank[n].begin(), it));\n\
         \x20       return true;\n\
         \x20   }}\n",
        indent(&insert, 2),
        indent(&erase, 2),
    ));

    if let Some(condition) = &proj.synapse.pruning {
        let cond = render(condition, scope, object, "pruning condition")?;
        code.declaration.push_str(
            "    bool _pruning;\n    int _pruning_period;\n    long int _pruning_offset;\n",
        );
        code.initializer
            .push_str("    _pruning = false;\n    _pruning_period = 1;\n    _pruning_offset = 0L;\n");
        code.methods.push_str(&format!(
            "\n    void start_pruning(int period, long int offset) {{\n\
             \x20       _pruning = true;\n\
             \x20       _pruning_period = period > 0 ? period : 1;\n\
             \x20       _pruning_offset = offset;\n\
             \x20   }}\n\
             \x20   void stop_pruning() {{ _pruning = false; }}\n\n\
             \x20   void pruning() {{\n\
             \x20       if (!_pruning || ((t - _pruning_offset) % _pruning_period != 0))\n\
             \x20           return;\n\
             \x20       for (int n = 0; n < nb_dendrites(); n++) {{\n\
             \x20           int rk_post = post_rank[n];\n\
             \x20           for (int j = pre_rank[n].size() - 1; j >= 0; j--) {{\n\
             \x20               int rk_pre = pre_rank[n][j];\n\
             \x20               if ({})\n\
             \x20                   removeSynapse(n, j);\n\
             \x20           }}\n\
             \x20       }}\n\
             \x20   }}\n",
            cond.trim()
        ));
        code.calls.push_str(&format!("    {}.pruning();\n", name));
    }

    if let Some(condition) = &proj.synapse.creating {
        let cond = render(condition, scope, object, "creating condition")?;
        let init = weight.map(|w| w.init.as_str()).unwrap_or("0.0");
        let delay = match proj.delay {
            Delay::Uniform(d) | Delay::NonUniform(d) => d,
            Delay::None => 0,
        };
        code.declaration.push_str(
            "    bool _creating;\n    int _creating_period;\n    long int _creating_offset;\n",
        );
        code.initializer
            .push_str("    _creating = false;\n    _creating_period = 1;\n    _creating_offset = 0L;\n");
        code.methods.push_str(&format!(
            "\n    void start_creating(int period, long int offset) {{\n\
             \x20       _creating = true;\n\
             \x20       _creating_period = period > 0 ? period : 1;\n\
             \x20       _creating_offset = offset;\n\
             \x20   }}\n\
             \x20   void stop_creating() {{ _creating = false; }}\n\n\
             \x20   void creating() {{\n\
             \x20       if (!_creating || ((t - _creating_offset) % _creating_period != 0))\n\
             \x20           return;\n\
             \x20       for (int n = 0; n < nb_dendrites(); n++) {{\n\
             \x20           int rk_post = post_rank[n];\n\
             \x20           for (int rk_pre = 0; rk_pre < {pre}.size; rk_pre++) {{\n\
             \x20               if (std::binary_search(pre_rank[n].begin(), pre_rank[n].end(), rk_pre))\n\
             \x20                   continue;\n\
             \x20               if ({cond})\n\
             \x20                   addSynapse(n, rk_pre, static_cast<{wtype}>({init}), {delay});\n\
             \x20           }}\n\
             \x20       }}\n\
             \x20   }}\n",
            pre = population::instance(pre.pop),
            cond = cond.trim(),
        ));
        code.calls.push_str(&format!("    {}.creating();\n", name));
    }

    Ok(code)
}

#[cfg(test)]
mod tests {
    use crate::fragment::FragmentKind;
    use crate::projection::tests::{generate, RATE, SPIKE};
    use neurogen_core::GeneratorConfig;

    fn config() -> GeneratorConfig {
        GeneratorConfig {
            structural_plasticity: true,
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn test_add_and_remove_touch_every_local_array() {
        let set = generate(RATE, &config(), 0).unwrap();
        let header = set.concat(FragmentKind::Header);
        assert!(header.contains("bool addSynapse(int n, int rk_pre, double weight, int d) {"));
        assert!(header.contains("w[n].insert(w[n].begin() + j, weight);"));
        assert!(header.contains("w_new[n].insert(w_new[n].begin() + j, static_cast<double>(0.0));"));
        assert!(header.contains("w[n].erase(w[n].begin() + j);"));
        assert!(header.contains("w_new[n].erase(w_new[n].begin() + j);"));
        // Semiglobal and global attributes are per dendrite or shared
        assert!(!header.contains("trace[n].insert"));
        assert!(!header.contains("eta[n].insert"));
        assert!(header.contains("std::lower_bound(pre_rank[n].begin(), pre_rank[n].end(), rk_pre);"));
    }

    #[test]
    fn test_unsorted_edge_list_sorted_before_storage() {
        let json = RATE.replace(
            "\"target\": \"exc\",",
            "\"target\": \"exc\", \"delay\": {\"non_uniform\": 3},",
        );
        let set = generate(&json, &config(), 0).unwrap();
        let header = set.concat(FragmentKind::Header);
        let init = &header[header.find("void init_connectivity(").unwrap()..];
        let sort = init
            .find("std::sort(order.begin(), order.end(), [&](int a, int b) { return pre_ranks[n][a] < pre_ranks[n][b]; });")
            .unwrap();
        let store = init.find("init_from_lil(post_ranks, pre_ranks);").unwrap();
        assert!(sort < store);
        assert!(init.contains(
            "            for (int k : order)\n                sorted_pre_ranks.push_back(pre_ranks[n][k]);\n            pre_ranks[n] = sorted_pre_ranks;\n"
        ));
        assert!(init.contains("sorted_values.push_back(values[n][k]);"));
        assert!(init.contains("sorted_delays.push_back(delays[n][k]);"));

        // Static connectivity keeps the given order
        let set = generate(RATE, &GeneratorConfig::default(), 0).unwrap();
        let header = set.concat(FragmentKind::Header);
        assert!(!header.contains("std::sort(order.begin()"));
    }

    #[test]
    fn test_spiking_synapses_rebuild_inverse_index() {
        let set = generate(SPIKE, &config(), 0).unwrap();
        let header = set.concat(FragmentKind::Header);
        assert!(header.contains("_last_event[n].insert(_last_event[n].begin() + j, -10000L);"));
        assert_eq!(header.matches("        inverse_connectivity_matrix();\n").count(), 3);
    }

    #[test]
    fn test_pruning_and_creating() {
        let json = RATE.replace(
            "\"synapse\": {\"attributes\"",
            "\"synapse\": {\"pruning\": \"${w} < 0.001\", \"creating\": \"${pre.r} * ${post.r} > 0.9\", \"attributes\"",
        );
        let set = generate(&json, &config(), 0).unwrap();
        let header = set.concat(FragmentKind::Header);
        assert!(header.contains("for (int j = pre_rank[n].size() - 1; j >= 0; j--) {"));
        assert!(header.contains("if (w[n][j] < 0.001)"));
        assert!(header.contains("if (pop0.r[rk_pre] * pop1.r[rk_post] > 0.9)"));
        assert!(header.contains("addSynapse(n, rk_pre, static_cast<double>(0.0), 0);"));
        assert!(header.contains("_pruning_period = period > 0 ? period : 1;"));
        assert!(header.contains("_creating_period = period > 0 ? period : 1;"));
        assert_eq!(
            set.concat(FragmentKind::StructuralPlasticity),
            "    proj0.pruning();\n    proj0.creating();\n"
        );

        // Switched off globally: nothing is generated
        let set = generate(&json, &GeneratorConfig::default(), 0).unwrap();
        assert!(set.concat(FragmentKind::StructuralPlasticity).is_empty());
        assert!(!set.concat(FragmentKind::Header).contains("addSynapse"));
    }
}
