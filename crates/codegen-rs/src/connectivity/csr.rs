//! Compressed sparse row: row pointers into one flat column index array.

use neurogen_core::{Backend, StorageFormat};

use super::{
    dendrite_index_by_search, device_clear, device_members, inverse_index, launch_config,
    launch_members, upload_arrays, vector_helper, ConnectivityCode, ConnectivityContext,
    ConnectivityStrategy, KernelArg,
};
use crate::attributes::LocalLayout;
use crate::template::indent;

pub struct Csr;

const ARRAYS: [&str; 3] = ["post_ranks_", "row_ptr_", "col_idx_"];

impl ConnectivityStrategy for Csr {
    fn format(&self) -> StorageFormat {
        StorageFormat::Csr
    }

    fn layout(&self) -> LocalLayout {
        LocalLayout::Flat
    }

    fn code(&self, ctx: &ConnectivityContext) -> ConnectivityCode {
        let cuda = ctx.backend == Backend::Cuda;

        let mut declaration = String::from(
            "    // Connectivity (CSR)\n\
             \x20   std::vector<int> post_ranks_;\n\
             \x20   std::vector<int> row_ptr_;\n\
             \x20   std::vector<int> col_idx_;\n",
        );
        declaration.push_str(launch_members(ctx));
        if cuda {
            declaration.push_str(&device_members(&ARRAYS));
        }

        let mut clear = String::from(
            "    post_ranks_.clear();\n\
             \x20   row_ptr_.clear();\n\
             \x20   col_idx_.clear();\n",
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
            inverse: if ctx.inverse {
                inverse_index(self)
            } else {
                String::new()
            },
            size_in_bytes: "    size_in_bytes += sizeof(int) * (post_ranks_.capacity() + row_ptr_.capacity() + col_idx_.capacity());\n"
                .to_string(),
            clear,
        }
    }

    fn row_loop(&self, body: &str) -> String {
        format!(
            "for (int j = row_ptr_[n]; j < row_ptr_[n+1]; j++) {{\n\
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
        ARRAYS
            .iter()
            .map(|a| KernelArg::new(format!("int* {}", a), format!("gpu_{}", a)))
            .collect()
    }
}

const CONSTRUCTION: &str = "    void init_from_lil(std::vector<int> post_ranks, std::vector<std::vector<int>> pre_ranks) {
        post_ranks_ = post_ranks;
        row_ptr_ = std::vector<int>(1, 0);
        col_idx_.clear();
        for (int n = 0; n < post_ranks.size(); n++) {
            col_idx_.insert(col_idx_.end(), pre_ranks[n].begin(), pre_ranks[n].end());
            row_ptr_.push_back(col_idx_.size());
        }
    }
";

const ACCESSORS: &str = "    std::vector<int> get_post_rank() { return post_ranks_; }
    int nb_dendrites() { return post_ranks_.size(); }
    int dendrite_size(int n) { return row_ptr_[n+1] - row_ptr_[n]; }
    int nb_synapses() { return col_idx_.size(); }

    std::vector<int> get_dendrite_pre_rank(int n) {
        return std::vector<int>(col_idx_.begin() + row_ptr_[n], col_idx_.begin() + row_ptr_[n+1]);
    }

    std::vector<std::vector<int>> get_pre_ranks() {
        std::vector<std::vector<int>> pre_ranks;
        for (int n = 0; n < nb_dendrites(); n++)
            pre_ranks.push_back(get_dendrite_pre_rank(n));
        return pre_ranks;
    }
";

const HELPERS: &str = "
    template<typename T>
    std::vector<T> init_matrix_variable(T value) {
        return std::vector<T>(col_idx_.size(), value);
    }

    template<typename T>
    std::vector<std::vector<T>> get_matrix_variable_all(const std::vector<T> &variable) {
        std::vector<std::vector<T>> values;
        for (int n = 0; n < nb_dendrites(); n++)
            values.push_back(get_matrix_variable_row<T>(variable, n));
        return values;
    }

    template<typename T>
    std::vector<T> get_matrix_variable_row(const std::vector<T> &variable, int n) {
        return std::vector<T>(variable.begin() + row_ptr_[n], variable.begin() + row_ptr_[n+1]);
    }

    template<typename T>
    T get_matrix_variable(const std::vector<T> &variable, int n, int k) {
        return variable[row_ptr_[n] + k];
    }

    template<typename T>
    void update_matrix_variable_all(std::vector<T> &variable, const std::vector<std::vector<T>> &data) {
        for (int n = 0; n < nb_dendrites(); n++)
            update_matrix_variable_row<T>(variable, n, data[n]);
    }

    template<typename T>
    void update_matrix_variable_row(std::vector<T> &variable, int n, const std::vector<T> &data) {
        std::copy(data.begin(), data.end(), variable.begin() + row_ptr_[n]);
    }

    template<typename T>
    void update_matrix_variable(std::vector<T> &variable, int n, int k, T value) {
        variable[row_ptr_[n] + k] = value;
    }
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_upload_on_cuda_only() {
        let mut ctx = ConnectivityContext {
            backend: Backend::OpenMp,
            threads_per_block: 32,
            max_blocks: 65535,
            inverse: false,
        };
        assert!(Csr.code(&ctx).device_upload.is_empty());

        ctx.backend = Backend::Cuda;
        let code = Csr.code(&ctx);
        assert!(code.declaration.contains("int* gpu_row_ptr_;"));
        assert!(code.device_upload.contains("cudaMemcpy(gpu_col_idx_, col_idx_.data()"));
        assert!(code.clear.contains("cudaFree(gpu_post_ranks_);"));
        assert_eq!(Csr.kernel_args()[1], KernelArg::new("int* row_ptr_", "gpu_row_ptr_"));
    }

    #[test]
    fn test_empty_edge_list_builds_sentinel_row_pointer() {
        // row_ptr_ always holds nb_dendrites + 1 entries
        assert!(CONSTRUCTION.contains("row_ptr_ = std::vector<int>(1, 0);"));
    }
}
