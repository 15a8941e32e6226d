//! Host/device skeleton: `network_host.cu` and `network_device.cu`.
//!
//! The host file drives the step; every phase is a set of launcher calls
//! whose kernels live in the device file. Transfers bracket a whole `run()`
//! instead of each step, and the device is synchronized where a phase
//! consumes the complete output of an earlier one: after transmission, and
//! after the neuron updates and global operations that feed the synaptic
//! updates.

use neurogen_core::GeneratorConfig;

use super::{api, definitions, phase, ProfilingHooks, RECORD};
use crate::fragment::{FragmentKind, FragmentSet};
use crate::globalops;

const SYNC: &str = "    cudaDeviceSynchronize();\n\n";

pub fn host_body(config: &GeneratorConfig, fragments: &FragmentSet, hooks: &ProfilingHooks) -> String {
    let mut text = String::from("/*\n *  network_host.cu\n */\n#include \"network.h\"\n\n");
    text.push_str(&definitions(config, fragments, hooks));

    text.push_str("void single_step() {\n");
    text.push_str(&hooks.step_pre);
    text.push_str(&phase("Reset inputs", &fragments.concat(FragmentKind::ResetInputs)));
    text.push_str(&phase("Synaptic transmission", &fragments.concat(FragmentKind::ComputePsp)));
    text.push_str(SYNC);
    text.push_str(&phase("Neuron updates", &fragments.concat(FragmentKind::UpdateNeurons)));
    text.push_str(&phase("Delay buffers", &fragments.concat(FragmentKind::UpdateDelay)));
    if !fragments.concat(FragmentKind::GlobalOps).is_empty() {
        text.push_str(&phase("Global operations", "    cuda_global_ops_step();\n"));
    }
    text.push_str(SYNC);
    text.push_str(&phase("Synaptic updates", &fragments.concat(FragmentKind::UpdateSynapses)));
    text.push_str(&phase("Post-synaptic events", &fragments.concat(FragmentKind::PostEvents)));
    text.push_str(RECORD);
    text.push_str(&hooks.step_post);
    text.push_str("    t++;\n}\n\n");

    text.push_str(&format!(
        "void host_to_device() {{\n{}}}\n\n\
         void device_to_host() {{\n\
         \x20   cudaDeviceSynchronize();\n\
         {}\
         }}\n\n",
        fragments.concat(FragmentKind::HostToDevice),
        fragments.concat(FragmentKind::DeviceToHost)
    ));
    text.push_str(&format!(
        "void run(int nbSteps) {{\n\
         {}\
         \x20   host_to_device();\n\
         \x20   for (int i = 0; i < nbSteps; i++)\n\
         \x20       single_step();\n\
         \x20   device_to_host();\n\
         {}\
         }}\n\n",
        hooks.run_pre, hooks.run_post
    ));
    text.push_str(&api(config, fragments, hooks));
    text.push_str("void setNumberThreads(int threads) {\n}\n");
    text
}

pub fn device_body(fragments: &FragmentSet) -> String {
    let mut text = String::from(
        "/*\n *  network_device.cu\n */\n#include \"network.h\"\n#include <cuda_runtime_api.h>\n\n",
    );
    let reductions = fragments.concat(FragmentKind::GlobalOps);
    if !reductions.is_empty() {
        text.push_str(globalops::DEVICE_KERNEL);
        text.push('\n');
    }
    text.push_str(&fragments.concat(FragmentKind::DeviceCode));
    if !reductions.is_empty() {
        text.push_str(&format!("void cuda_global_ops_step() {{\n{}}}\n", reductions));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurogen_core::{Backend, ObjectId};

    fn config() -> GeneratorConfig {
        GeneratorConfig {
            backend: Backend::Cuda,
            ..GeneratorConfig::default()
        }
    }

    fn fragments() -> FragmentSet {
        let mut set = FragmentSet::new();
        let pop = ObjectId::Population(0);
        let proj = ObjectId::Projection(0);
        set.push(proj, FragmentKind::ComputePsp, "    cuda_proj0_psp_step();\n");
        set.push(pop, FragmentKind::UpdateNeurons, "    cuda_pop0_step();\n");
        set.push(
            pop,
            FragmentKind::GlobalOps,
            "    global_op_kernel<double><<<1, 32, 32 * sizeof(double)>>>(pop0.gpu_r, pop0.size, GLOBAL_OP_MAX, pop0.gpu__max_r);\n",
        );
        set.push(proj, FragmentKind::UpdateSynapses, "    cuda_proj0_update_step();\n");
        set.push(pop, FragmentKind::HostToDevice, "    pop0.host_to_device();\n");
        set.push(pop, FragmentKind::DeviceToHost, "    pop0.device_to_host();\n");
        set.push(pop, FragmentKind::DeviceCode, "void cuda_pop0_step() {\n}\n");
        set
    }

    #[test]
    fn test_synchronization_between_dependent_phases() {
        let text = host_body(&config(), &fragments(), &ProfilingHooks::default());
        let psp = text.find("cuda_proj0_psp_step();").unwrap();
        let update = text.find("cuda_pop0_step();").unwrap();
        let ops = text.find("cuda_global_ops_step();").unwrap();
        let learn = text.find("cuda_proj0_update_step();").unwrap();
        let sync: Vec<usize> = text.match_indices("cudaDeviceSynchronize();").map(|(i, _)| i).collect();
        assert!(psp < sync[0] && sync[0] < update);
        assert!(ops < sync[1] && sync[1] < learn);
    }

    #[test]
    fn test_transfers_bracket_the_run() {
        let text = host_body(&config(), &fragments(), &ProfilingHooks::default());
        assert!(text.contains(
            "    host_to_device();\n    for (int i = 0; i < nbSteps; i++)\n        single_step();\n    device_to_host();\n"
        ));
        assert!(text.contains("void host_to_device() {\n    pop0.host_to_device();\n}"));
        assert!(text.contains("void setNumberThreads(int threads) {\n}\n"));
    }

    #[test]
    fn test_device_file_holds_reductions() {
        let text = device_body(&fragments());
        assert!(text.contains("__global__ void global_op_kernel"));
        assert!(text.contains("void cuda_global_ops_step() {\n    global_op_kernel<double>"));
        assert!(text.contains("void cuda_pop0_step() {"));
        assert!(!device_body(&FragmentSet::new()).contains("global_op_kernel"));
    }
}
