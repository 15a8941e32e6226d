//! Shared-memory skeleton: `network.cpp`.
//!
//! Phases run one after the other; work inside a phase is split across
//! threads by the `parallel for` loops of the object code, whose implicit
//! barrier separates the phases.

use neurogen_core::{Backend, GeneratorConfig};

use super::{api, definitions, phase, ProfilingHooks, RECORD};
use crate::fragment::{FragmentKind, FragmentSet};

/// Pragma preceding a parallel loop, empty for a single thread
pub fn parallel_for(config: &GeneratorConfig) -> String {
    if config.backend == Backend::OpenMp && config.num_threads > 1 {
        "#pragma omp parallel for\n".into()
    } else {
        String::new()
    }
}

/// OpenMP header, only needed with more than one thread
pub fn include(config: &GeneratorConfig) -> String {
    if config.backend == Backend::OpenMp && config.num_threads > 1 {
        "#include <omp.h>\n".into()
    } else {
        String::new()
    }
}

fn set_number_threads(config: &GeneratorConfig) -> String {
    let body = if config.num_threads > 1 {
        "    omp_set_num_threads(threads);\n"
    } else {
        ""
    };
    format!("void setNumberThreads(int threads) {{\n{body}}}\n")
}

pub fn body(config: &GeneratorConfig, fragments: &FragmentSet, hooks: &ProfilingHooks) -> String {
    let mut text = String::from("/*\n *  network.cpp\n */\n#include \"network.h\"\n\n");
    text.push_str(&definitions(config, fragments, hooks));

    text.push_str("void single_step() {\n");
    text.push_str(&hooks.step_pre);
    text.push_str(&phase("Reset inputs", &fragments.concat(FragmentKind::ResetInputs)));
    text.push_str(&phase("Synaptic transmission", &fragments.concat(FragmentKind::ComputePsp)));
    text.push_str(&phase("Neuron updates", &fragments.concat(FragmentKind::UpdateNeurons)));
    text.push_str(&phase("Delay buffers", &fragments.concat(FragmentKind::UpdateDelay)));
    text.push_str(&phase("Global operations", &fragments.concat(FragmentKind::GlobalOps)));
    text.push_str(&phase("Synaptic updates", &fragments.concat(FragmentKind::UpdateSynapses)));
    text.push_str(&phase("Post-synaptic events", &fragments.concat(FragmentKind::PostEvents)));
    text.push_str(&phase(
        "Structural plasticity",
        &fragments.concat(FragmentKind::StructuralPlasticity),
    ));
    text.push_str(RECORD);
    text.push_str(&hooks.step_post);
    text.push_str("    t++;\n}\n\n");

    text.push_str(&format!(
        "void run(int nbSteps) {{\n\
         {}\
         \x20   for (int i = 0; i < nbSteps; i++)\n\
         \x20       single_step();\n\
         {}\
         }}\n\n",
        hooks.run_pre, hooks.run_post
    ));
    text.push_str(&api(config, fragments, hooks));
    text.push_str(&set_number_threads(config));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurogen_core::ObjectId;

    fn threads(n: usize) -> GeneratorConfig {
        GeneratorConfig {
            num_threads: n,
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn test_thread_count_only_with_several_threads() {
        assert_eq!(parallel_for(&threads(1)), "");
        assert_eq!(include(&threads(1)), "");
        assert_eq!(set_number_threads(&threads(1)), "void setNumberThreads(int threads) {\n}\n");
        assert_eq!(parallel_for(&threads(4)), "#pragma omp parallel for\n");
        assert!(set_number_threads(&threads(4)).contains("omp_set_num_threads(threads);"));
    }

    #[test]
    fn test_phase_order() {
        let mut set = FragmentSet::new();
        let pop = ObjectId::Population(0);
        let proj = ObjectId::Projection(0);
        set.push(proj, FragmentKind::PostEvents, "    proj0.post_event();\n");
        set.push(proj, FragmentKind::UpdateSynapses, "    proj0.update_synapse();\n");
        set.push(pop, FragmentKind::GlobalOps, "    pop0.update_global_ops();\n");
        set.push(pop, FragmentKind::UpdateDelay, "    pop0.update_delay();\n");
        set.push(pop, FragmentKind::UpdateNeurons, "    pop0.update();\n");
        set.push(proj, FragmentKind::ComputePsp, "    proj0.compute_psp();\n");
        set.push(pop, FragmentKind::ResetInputs, "    std::fill(pop0._sum_exc.begin(), pop0._sum_exc.end(), 0.0);\n");

        let text = body(&GeneratorConfig::default(), &set, &ProfilingHooks::default());
        let order = [
            "std::fill(pop0._sum_exc",
            "proj0.compute_psp();",
            "pop0.update();",
            "pop0.update_delay();",
            "pop0.update_global_ops();",
            "proj0.update_synapse();",
            "proj0.post_event();",
            "recorders[i]->record();",
            "t++;",
        ];
        let positions: Vec<usize> = order.iter().map(|s| text.find(s).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        // Empty phases leave no trace
        assert!(!text.contains("// Structural plasticity"));
    }
}
