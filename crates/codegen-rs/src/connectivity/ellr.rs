//! ELLPACK-R: padded like ELL but stored column-major, with explicit row
//! lengths so that neighbouring device threads read neighbouring memory.

use neurogen_core::{Backend, StorageFormat};

use super::{
    dendrite_index_by_search, device_clear, device_members, launch_config, launch_members,
    upload_arrays, vector_helper, ConnectivityCode, ConnectivityContext, ConnectivityStrategy,
    KernelArg,
};
use crate::attributes::LocalLayout;
use crate::template::indent;

pub struct EllR;

const ARRAYS: [&str; 3] = ["post_ranks_", "col_idx_", "rl_"];

impl ConnectivityStrategy for EllR {
    fn format(&self) -> StorageFormat {
        StorageFormat::EllR
    }

    fn layout(&self) -> LocalLayout {
        LocalLayout::Flat
    }

    fn code(&self, ctx: &ConnectivityContext) -> ConnectivityCode {
        let cuda = ctx.backend == Backend::Cuda;

        let mut declaration = String::from(
            "    // Connectivity (ELL-R)\n\
             \x20   std::vector<int> post_ranks_;\n\
             \x20   std::vector<int> col_idx_;\n\
             \x20   std::vector<int> rl_;\n\
             \x20   int nb_post_;\n\
             \x20   int maxnzr_;\n",
        );
        declaration.push_str(launch_members(ctx));
        if cuda {
            declaration.push_str(&device_members(&ARRAYS));
        }

        let mut clear = String::from(
            "    post_ranks_.clear();\n\
             \x20   col_idx_.clear();\n\
             \x20   rl_.clear();\n",
        );
        if cuda {
            clear.push_str(&device_clear(&ARRAYS));
        }

        ConnectivityCode {
            declaration,
            construction: CONSTRUCTION.to_string(),
            accessors: format!(
                "{}\n{}\n{}{}",
                ACCESSORS,
                dendrite_index_by_search("post_ranks_"),
                vector_helper(),
                HELPERS
            ),
            launch_config: launch_config(ctx),
            device_upload: if cuda {
                upload_arrays(&ARRAYS)
            } else {
                String::new()
            },
            inverse: String::new(),
            size_in_bytes: "    size_in_bytes += sizeof(int) * (post_ranks_.capacity() + col_idx_.capacity() + rl_.capacity() + 2);\n"
                .to_string(),
            clear,
        }
    }

    fn row_loop(&self, body: &str) -> String {
        format!(
            "for (int k = 0; k < rl_[n]; k++) {{\n\
             \x20   int j = k * nb_post_ + n;\n\
             \x20   int rk_pre = col_idx_[j];\n\
             {}\
             }}\n",
            indent(body, 1)
        )
    }

    fn synapse(&self) -> &'static str {
        "[j]"
    }

    fn post_rank(&self) -> &'static str {
        "post_ranks_[n]"
    }

    fn kernel_args(&self) -> Vec<KernelArg> {
        let mut args: Vec<KernelArg> = ARRAYS
            .iter()
            .map(|a| KernelArg::new(format!("int* {}", a), format!("gpu_{}", a)))
            .collect();
        args.push(KernelArg::new("int nb_post_", "nb_post_"));
        args
    }
}

const CONSTRUCTION: &str = "    void init_from_lil(std::vector<int> post_ranks, std::vector<std::vector<int>> pre_ranks) {
        post_ranks_ = post_ranks;
        nb_post_ = post_ranks.size();
        maxnzr_ = 0;
        rl_ = std::vector<int>(nb_post_, 0);
        for (int n = 0; n < nb_post_; n++) {
            rl_[n] = pre_ranks[n].size();
            maxnzr_ = std::max<int>(maxnzr_, rl_[n]);
        }
        col_idx_ = std::vector<int>(maxnzr_ * nb_post_, -1);
        for (int n = 0; n < nb_post_; n++)
            for (int k = 0; k < rl_[n]; k++)
                col_idx_[k * nb_post_ + n] = pre_ranks[n][k];
    }
";

const ACCESSORS: &str = "    std::vector<int> get_post_rank() { return post_ranks_; }
    int nb_dendrites() { return nb_post_; }
    int dendrite_size(int n) { return rl_[n]; }

    int nb_synapses() {
        int size = 0;
        for (int n = 0; n < nb_post_; n++)
            size += rl_[n];
        return size;
    }

    std::vector<int> get_dendrite_pre_rank(int n) {
        std::vector<int> ranks;
        for (int k = 0; k < rl_[n]; k++)
            ranks.push_back(col_idx_[k * nb_post_ + n]);
        return ranks;
    }

    std::vector<std::vector<int>> get_pre_ranks() {
        std::vector<std::vector<int>> pre_ranks;
        for (int n = 0; n < nb_post_; n++)
            pre_ranks.push_back(get_dendrite_pre_rank(n));
        return pre_ranks;
    }
";

const HELPERS: &str = "
    template<typename T>
    std::vector<T> init_matrix_variable(T value) {
        return std::vector<T>(maxnzr_ * nb_post_, value);
    }

    template<typename T>
    std::vector<std::vector<T>> get_matrix_variable_all(const std::vector<T> &variable) {
        std::vector<std::vector<T>> values;
        for (int n = 0; n < nb_post_; n++)
            values.push_back(get_matrix_variable_row<T>(variable, n));
        return values;
    }

    template<typename T>
    std::vector<T> get_matrix_variable_row(const std::vector<T> &variable, int n) {
        std::vector<T> values;
        for (int k = 0; k < rl_[n]; k++)
            values.push_back(variable[k * nb_post_ + n]);
        return values;
    }

    template<typename T>
    T get_matrix_variable(const std::vector<T> &variable, int n, int k) {
        return variable[k * nb_post_ + n];
    }

    template<typename T>
    void update_matrix_variable_all(std::vector<T> &variable, const std::vector<std::vector<T>> &data) {
        for (int n = 0; n < nb_post_; n++)
            update_matrix_variable_row<T>(variable, n, data[n]);
    }

    template<typename T>
    void update_matrix_variable_row(std::vector<T> &variable, int n, const std::vector<T> &data) {
        for (int k = 0; k < rl_[n]; k++)
            variable[k * nb_post_ + n] = data[k];
    }

    template<typename T>
    void update_matrix_variable(std::vector<T> &variable, int n, int k, T value) {
        variable[k * nb_post_ + n] = value;
    }
";
