//! Connectivity storage strategies.
//!
//! Each format owns its member layout, the construction from a list of
//! lists, and the variable helpers that convert per-synapse data to and from
//! the list-of-lists shape. All of them expose the same C++ accessor
//! signatures:
//!
//! | Accessor | Meaning |
//! |----------|---------|
//! | `init_from_lil(post_ranks, pre_ranks)` | build from an edge list |
//! | `get_post_rank()` | post-synaptic rank of every dendrite |
//! | `get_pre_ranks()` / `get_dendrite_pre_rank(n)` | pre-synaptic ranks |
//! | `nb_dendrites()`, `dendrite_size(n)`, `nb_synapses()` | counts |
//! | `dendrite_index(rk_post)` | dendrite of a post neuron, -1 if none |
//!
//! Loops emitted by [`ConnectivityStrategy::row_loop`] bind `j` (synapse
//! coordinate, see [`ConnectivityStrategy::synapse`]) and `rk_pre` for the
//! dendrite `n`.

use neurogen_core::{Backend, StorageFormat};

use crate::attributes::LocalLayout;
use crate::template::indent;

mod csr;
mod ell;
mod ellr;
mod lil;

pub use csr::Csr;
pub use ell::Ell;
pub use ellr::EllR;
pub use lil::Lil;

/// Settings shared by all strategies
#[derive(Debug, Clone, Copy)]
pub struct ConnectivityContext {
    pub backend: Backend,
    pub threads_per_block: u32,
    pub max_blocks: u32,
    /// Build a pre-rank to synapse index for spike routing
    pub inverse: bool,
}

/// Connectivity code of one projection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectivityCode {
    pub declaration: String,
    /// `init_from_lil`
    pub construction: String,
    /// Uniform read accessors and variable helpers
    pub accessors: String,
    /// Statements computing the kernel launch configuration
    pub launch_config: String,
    /// `connectivity_to_device()`
    pub device_upload: String,
    /// Pre-rank to synapse index and its builder
    pub inverse: String,
    pub size_in_bytes: String,
    pub clear: String,
}

/// Kernel parameter and the struct member passed for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelArg {
    pub decl: String,
    pub member: String,
}

impl KernelArg {
    pub fn new(decl: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            decl: decl.into(),
            member: member.into(),
        }
    }
}

pub trait ConnectivityStrategy: Sync {
    fn format(&self) -> StorageFormat;

    /// Container used for local attributes
    fn layout(&self) -> LocalLayout;

    fn code(&self, ctx: &ConnectivityContext) -> ConnectivityCode;

    /// Loop over the synapses of dendrite `n`
    fn row_loop(&self, body: &str) -> String;

    /// Subscript of a local attribute for the synapse `j` of dendrite `n`
    fn synapse(&self) -> &'static str;

    /// Post-synaptic rank of dendrite `n`
    fn post_rank(&self) -> &'static str;

    /// Connectivity arrays needed by a device kernel
    fn kernel_args(&self) -> Vec<KernelArg> {
        Vec::new()
    }
}

pub fn strategy(format: StorageFormat) -> &'static dyn ConnectivityStrategy {
    match format {
        StorageFormat::Lil => &Lil,
        StorageFormat::Csr => &Csr,
        StorageFormat::Ell => &Ell,
        StorageFormat::EllR => &EllR,
    }
}

/// Inverse index shared by the formats able to route spikes
pub(crate) fn inverse_index(strategy: &dyn ConnectivityStrategy) -> String {
    let fill = "inv_pre_rank[rk_pre].push_back(std::pair<int, int>(n, j));\n";
    format!(
        "    // Inverse connectivity: pre-synaptic rank -> (dendrite, synapse)\n\
         \x20   std::map<int, std::vector<std::pair<int, int>>> inv_pre_rank;\n\
         \n\
         \x20   void inverse_connectivity_matrix() {{\n\
         \x20       inv_pre_rank.clear();\n\
         \x20       for (int n = 0; n < nb_dendrites(); n++) {{\n\
         {}\
         \x20       }}\n\
         \x20   }}\n",
        indent(&strategy.row_loop(fill), 3)
    )
}

/// One thread per dendrite, grid capped by the device limit
pub(crate) fn launch_config(ctx: &ConnectivityContext) -> String {
    if ctx.backend != Backend::Cuda {
        return String::new();
    }
    format!(
        "    _threads_per_block = {tpb};\n\
         \x20   _nb_blocks = std::min<int>((nb_dendrites() + {tpb} - 1) / {tpb}, {max});\n",
        tpb = ctx.threads_per_block,
        max = ctx.max_blocks
    )
}

pub(crate) fn launch_members(ctx: &ConnectivityContext) -> &'static str {
    match ctx.backend {
        Backend::Cuda => "    int _threads_per_block;\n    int _nb_blocks;\n",
        Backend::OpenMp => "",
    }
}

/// Upload of integer index arrays
pub(crate) fn upload_arrays(arrays: &[&str]) -> String {
    let mut code = String::from("    void connectivity_to_device() {\n");
    for array in arrays {
        code.push_str(&format!(
            "        cudaMalloc((void**)&gpu_{a}, {a}.size() * sizeof(int));\n\
             \x20       cudaMemcpy(gpu_{a}, {a}.data(), {a}.size() * sizeof(int), cudaMemcpyHostToDevice);\n",
            a = array
        ));
    }
    code.push_str("    }\n");
    code
}

pub(crate) fn device_members(arrays: &[&str]) -> String {
    arrays
        .iter()
        .map(|a| format!("    int* gpu_{};\n", a))
        .collect()
}

pub(crate) fn device_clear(arrays: &[&str]) -> String {
    arrays
        .iter()
        .map(|a| format!("    cudaFree(gpu_{});\n", a))
        .collect()
}

/// Helpers shared by the flat formats: semiglobal vectors and the
/// single-element update through `get_matrix_variable`'s addressing.
pub(crate) fn vector_helper() -> &'static str {
    "    template<typename T>\n\
     \x20   std::vector<T> init_vector_variable(T value) {\n\
     \x20       return std::vector<T>(nb_dendrites(), value);\n\
     \x20   }\n"
}

pub(crate) fn dendrite_index_by_search(post_ranks: &str) -> String {
    format!(
        "    int dendrite_index(int rk_post) {{\n\
         \x20       auto it = std::find({p}.begin(), {p}.end(), rk_post);\n\
         \x20       if (it == {p}.end())\n\
         \x20           return -1;\n\
         \x20       return std::distance({p}.begin(), it);\n\
         \x20   }}\n",
        p = post_ranks
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(backend: Backend) -> ConnectivityContext {
        ConnectivityContext {
            backend,
            threads_per_block: 32,
            max_blocks: 65535,
            inverse: false,
        }
    }

    const ACCESSORS: [&str; 8] = [
        "void init_from_lil(std::vector<int> post_ranks, std::vector<std::vector<int>> pre_ranks)",
        "std::vector<int> get_post_rank()",
        "std::vector<std::vector<int>> get_pre_ranks()",
        "std::vector<int> get_dendrite_pre_rank(int n)",
        "int nb_dendrites()",
        "int dendrite_size(int n)",
        "int nb_synapses()",
        "int dendrite_index(int rk_post)",
    ];

    #[test]
    fn test_identical_accessor_signatures() {
        for format in [
            StorageFormat::Lil,
            StorageFormat::Csr,
            StorageFormat::Ell,
            StorageFormat::EllR,
        ] {
            let code = strategy(format).code(&ctx(Backend::OpenMp));
            let text = format!("{}{}", code.construction, code.accessors);
            for signature in ACCESSORS {
                assert!(text.contains(signature), "{} lacks {}", format, signature);
            }
            for helper in [
                "init_matrix_variable(T value)",
                "get_matrix_variable_all(",
                "get_matrix_variable_row(",
                "get_matrix_variable(",
                "update_matrix_variable_all(",
                "update_matrix_variable_row(",
                "update_matrix_variable(",
                "init_vector_variable(T value)",
            ] {
                assert!(text.contains(helper), "{} lacks {}", format, helper);
            }
        }
    }

    #[test]
    fn test_launch_config_only_on_device() {
        assert!(launch_config(&ctx(Backend::OpenMp)).is_empty());
        let cuda = launch_config(&ctx(Backend::Cuda));
        assert!(cuda.contains("_threads_per_block = 32;"));
        assert!(cuda.contains("std::min<int>((nb_dendrites() + 32 - 1) / 32, 65535)"));
    }

    #[test]
    fn test_inverse_index_uses_row_loop() {
        let mut context = ctx(Backend::OpenMp);
        context.inverse = true;
        let lil = strategy(StorageFormat::Lil).code(&context);
        assert!(lil.inverse.contains("std::map<int, std::vector<std::pair<int, int>>> inv_pre_rank;"));
        assert!(lil.inverse.contains("int rk_pre = pre_rank[n][j];"));
        let csr = strategy(StorageFormat::Csr).code(&context);
        assert!(csr.inverse.contains("int rk_pre = col_idx_[j];"));
    }
}
