//! Network assembly.
//!
//! Splices the fragments of every object into one of the two program
//! skeletons. Both run the phases of a step in the same order:
//!
//! 1. reset the weighted sums of rate-coded populations
//! 2. synaptic transmission
//! 3. neuron updates
//! 4. delay buffers
//! 5. global operations
//! 6. synaptic updates
//! 7. post-synaptic events
//! 8. structural plasticity
//! 9. recorders
//! 10. `t++`

use neurogen_core::{Backend, GeneratorConfig, Network};

use crate::artifacts::Artifacts;
use crate::fragment::{FragmentKind, FragmentSet};
use crate::population;
use crate::projection;

pub mod cuda;
pub mod openmp;

/// Text injected around the simulation loop when profiling is enabled
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilingHooks {
    pub include: String,
    pub declaration: String,
    pub init: String,
    pub step_pre: String,
    pub step_post: String,
    pub run_pre: String,
    pub run_post: String,
}

impl ProfilingHooks {
    pub fn new(config: &GeneratorConfig) -> Self {
        if !config.profiling {
            return Self::default();
        }
        Self {
            include: "#include <chrono>\n#include <iostream>\n".into(),
            declaration: "double _profile_step_time;\nlong int _profile_steps;\n".into(),
            init: "    _profile_step_time = 0.0;\n    _profile_steps = 0;\n".into(),
            step_pre: "    auto _step_start = std::chrono::steady_clock::now();\n".into(),
            step_post: "    _profile_step_time += std::chrono::duration<double, std::milli>(std::chrono::steady_clock::now() - _step_start).count();\n\
                        \x20   _profile_steps++;\n"
                .into(),
            run_pre: "    auto _run_start = std::chrono::steady_clock::now();\n".into(),
            run_post: "    double _run_time = std::chrono::duration<double, std::milli>(std::chrono::steady_clock::now() - _run_start).count();\n\
                       \x20   std::cout << \"run(\" << nbSteps << \"): \" << _run_time << \" ms, \"\n\
                       \x20             << (_profile_steps > 0 ? _profile_step_time / _profile_steps : 0.0) << \" ms per step\" << std::endl;\n"
                .into(),
        }
    }
}

/// Add the network files of the configured backend to `artifacts`
pub fn assemble(config: &GeneratorConfig, network: &Network, fragments: &FragmentSet, artifacts: &mut Artifacts) {
    let hooks = ProfilingHooks::new(config);
    artifacts.insert("network.h", network_header(config, network, fragments, &hooks));
    match config.backend {
        Backend::OpenMp => {
            artifacts.insert("network.cpp", openmp::body(config, fragments, &hooks));
        }
        Backend::Cuda => {
            artifacts.insert("network_host.cu", cuda::host_body(config, fragments, &hooks));
            artifacts.insert("network_device.cu", cuda::device_body(fragments));
        }
    }
}

/// `network.h`: object headers, global instances and the simulation API
pub fn network_header(
    config: &GeneratorConfig,
    network: &Network,
    fragments: &FragmentSet,
    hooks: &ProfilingHooks,
) -> String {
    let real = config.precision.ctype();
    let mut includes = String::new();
    for pop in &network.populations {
        includes.push_str(&format!("#include \"{}.hpp\"\n", population::instance(pop)));
    }
    for proj in &network.projections {
        includes.push_str(&format!("#include \"{}.hpp\"\n", projection::instance(proj)));
    }

    let mut text = format!(
        "/*\n *  network.h\n *\n *  {} populations, {} projections, {} backend\n */\n\
         #pragma once\n\
         #include <vector>\n\
         #include <map>\n\
         #include <deque>\n\
         #include <cmath>\n\
         #include <random>\n\
         #include <ctime>\n",
        network.populations.len(),
        network.projections.len(),
        config.backend,
    );
    text.push_str(&openmp::include(config));
    if config.backend == Backend::Cuda {
        text.push_str("#include <cuda_runtime_api.h>\n");
    }
    text.push_str(&hooks.include);
    text.push('\n');
    text.push_str(&includes);
    text.push_str("#include \"recorder.h\"\n\n");
    text.push_str(&format!(
        "extern long int t;\nextern {real} dt;\nextern std::mt19937 rng;\n\n"
    ));
    text.push_str("// Objects\n");
    text.push_str(&fragments.concat(FragmentKind::Instance));
    text.push_str(
        "\n// Recorders\n\
         extern std::vector<Monitor*> recorders;\n\
         void addRecorder(Monitor* recorder);\n\
         void removeRecorder(Monitor* recorder);\n\n",
    );
    text.push_str(&format!(
        "// Simulation\n\
         void initialize({real} dt_, long int seed);\n\
         void single_step();\n\
         void step();\n\
         void run(int nbSteps);\n\
         int run_until(int steps, std::vector<int> populations, bool or_and);\n\
         long int getTime();\n\
         void setTime(long int t_);\n\
         {real} getDt();\n\
         void setDt({real} dt_);\n\
         void setNumberThreads(int threads);\n"
    ));
    if config.backend == Backend::Cuda {
        text.push_str("void host_to_device();\nvoid device_to_host();\n\n// Device launchers\n");
        text.push_str(&fragments.concat(FragmentKind::DevicePrototypes));
        if !fragments.concat(FragmentKind::GlobalOps).is_empty() {
            text.push_str("void cuda_global_ops_step();\n");
        }
    }
    text
}

/// Global variables, instances and recorder registry shared by both skeletons
pub(crate) fn definitions(config: &GeneratorConfig, fragments: &FragmentSet, hooks: &ProfilingHooks) -> String {
    let instances: String = fragments
        .concat(FragmentKind::Instance)
        .lines()
        .map(|line| format!("{}\n", line.trim_start_matches("extern ")))
        .collect();
    format!(
        "long int t;\n\
         {real} dt;\n\
         std::mt19937 rng;\n\
         {declaration}\n\
         {instances}\n\
         std::vector<Monitor*> recorders;\n\n\
         void addRecorder(Monitor* recorder) {{\n\
         \x20   recorders.push_back(recorder);\n\
         }}\n\n\
         void removeRecorder(Monitor* recorder) {{\n\
         \x20   for (unsigned int i = 0; i < recorders.size(); i++) {{\n\
         \x20       if (recorders[i] == recorder) {{\n\
         \x20           recorders.erase(recorders.begin() + i);\n\
         \x20           break;\n\
         \x20       }}\n\
         \x20   }}\n\
         }}\n\n",
        real = config.precision.ctype(),
        declaration = hooks.declaration,
    )
}

/// One commented section of the step function, omitted when empty
pub(crate) fn phase(title: &str, code: &str) -> String {
    if code.trim().is_empty() {
        String::new()
    } else {
        format!("    // {}\n{}\n", title, code)
    }
}

pub(crate) const RECORD: &str = "    // Recording\n\
    \x20   for (unsigned int i = 0; i < recorders.size(); i++)\n\
    \x20       recorders[i]->record();\n\n";

/// `initialize`, `run_until`, `step` and the time accessors. On the device
/// backend `run_until` and `step` bracket their steps with transfers like
/// `run` does.
pub(crate) fn api(config: &GeneratorConfig, fragments: &FragmentSet, hooks: &ProfilingHooks) -> String {
    let cuda = config.backend == Backend::Cuda;
    let real = config.precision.ctype();
    let mut text = format!(
        "void initialize({real} dt_, long int seed) {{\n\
         \x20   dt = dt_;\n\
         \x20   t = 0;\n\
         \x20   if (seed == -1)\n\
         \x20       rng.seed(time(NULL));\n\
         \x20   else\n\
         \x20       rng.seed(seed);\n\
         {}\
         {}\
         {}\
         }}\n\n",
        fragments.concat(FragmentKind::Initialize),
        fragments.concat(FragmentKind::LateInitialize),
        hooks.init,
    );
    text.push_str(&run_until(fragments, cuda));
    let step = if cuda { "    run(1);\n" } else { "    single_step();\n" };
    text.push_str(&format!(
        "void step() {{\n\
         {step}\
         }}\n\n\
         long int getTime() {{ return t; }}\n\
         void setTime(long int t_) {{ t = t_; }}\n\
         {real} getDt() {{ return dt; }}\n\
         void setDt({real} dt_) {{ dt = dt_; }}\n\n"
    ));
    text
}

/// Early-stop run loop. `or_and` true requires every listed population to
/// meet its stop condition, false any of them.
fn run_until(fragments: &FragmentSet, cuda: bool) -> String {
    let cases = fragments.concat(FragmentKind::StopCondition);
    let (upload, download) = if cuda {
        ("    host_to_device();\n", "    device_to_host();\n")
    } else {
        ("", "")
    };
    if cases.is_empty() {
        return "int run_until(int steps, std::vector<int> populations, bool or_and) {\n\
                \x20   run(steps);\n\
                \x20   return steps;\n\
                }\n\n"
            .into();
    }
    format!(
        "int run_until(int steps, std::vector<int> populations, bool or_and) {{\n\
         \x20   bool stop = false;\n\
         \x20   bool pop_stop = false;\n\
         \x20   int nb = 0;\n\
         {upload}\
         \x20   for (int n = 0; n < steps; n++) {{\n\
         \x20       single_step();\n\
         \x20       nb++;\n\
         \x20       stop = or_and;\n\
         \x20       for (unsigned int i = 0; i < populations.size(); i++) {{\n\
         \x20           pop_stop = false;\n\
         \x20           switch (populations[i]) {{\n\
         {cases}\
         \x20           default:\n\
         \x20               break;\n\
         \x20           }}\n\
         \x20           if (or_and)\n\
         \x20               stop = stop && pop_stop;\n\
         \x20           else\n\
         \x20               stop = stop || pop_stop;\n\
         \x20       }}\n\
         \x20       if (stop)\n\
         \x20           break;\n\
         \x20   }}\n\
         {download}\
         \x20   return nb;\n\
         }}\n\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurogen_core::ObjectId;

    #[test]
    fn test_profiling_hooks_empty_when_disabled() {
        assert_eq!(ProfilingHooks::new(&GeneratorConfig::default()), ProfilingHooks::default());
        let config = GeneratorConfig {
            profiling: true,
            ..GeneratorConfig::default()
        };
        let hooks = ProfilingHooks::new(&config);
        assert!(hooks.include.contains("<chrono>"));
        assert!(hooks.run_post.contains("nbSteps"));
    }

    #[test]
    fn test_run_until_degenerates_without_conditions() {
        let text = run_until(&FragmentSet::new(), false);
        assert!(text.contains("    run(steps);\n    return steps;\n"));
        assert!(!text.contains("switch"));
    }

    #[test]
    fn test_run_until_combines_conditions() {
        let mut set = FragmentSet::new();
        set.push(
            ObjectId::Population(2),
            FragmentKind::StopCondition,
            "            case 2:\n                pop_stop = pop2.stop_condition();\n                break;\n",
        );
        let text = run_until(&set, false);
        assert!(text.contains("case 2:\n                pop_stop = pop2.stop_condition();"));
        assert!(text.contains("stop = stop && pop_stop;"));
        assert!(text.contains("stop = stop || pop_stop;"));
        assert!(text.contains("    return nb;\n"));
    }

    #[test]
    fn test_definitions_strip_extern() {
        let mut set = FragmentSet::new();
        set.push(ObjectId::Population(0), FragmentKind::Instance, "extern PopStruct0 pop0;\n");
        set.push(ObjectId::Projection(0), FragmentKind::Instance, "extern ProjStruct0 proj0;\n");
        let text = definitions(&GeneratorConfig::default(), &set, &ProfilingHooks::default());
        assert!(text.contains("PopStruct0 pop0;\nProjStruct0 proj0;\n"));
        assert!(!text.contains("extern"));
        assert!(text.starts_with("long int t;\ndouble dt;\n"));
    }
}
