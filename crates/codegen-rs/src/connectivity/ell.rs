//! ELLPACK: every row padded to the longest one, row-major, unused slots
//! hold -1.

use neurogen_core::StorageFormat;

use super::{
    dendrite_index_by_search, inverse_index, vector_helper, ConnectivityCode,
    ConnectivityContext, ConnectivityStrategy,
};
use crate::attributes::LocalLayout;
use crate::template::indent;

pub struct Ell;

impl ConnectivityStrategy for Ell {
    fn format(&self) -> StorageFormat {
        StorageFormat::Ell
    }

    fn layout(&self) -> LocalLayout {
        LocalLayout::Flat
    }

    fn code(&self, ctx: &ConnectivityContext) -> ConnectivityCode {
        ConnectivityCode {
            declaration: "    // Connectivity (ELL)\n\
                          \x20   std::vector<int> post_ranks_;\n\
                          \x20   std::vector<int> col_idx_;\n\
                          \x20   int nb_post_;\n\
                          \x20   int maxnzr_;\n"
                .to_string(),
            construction: CONSTRUCTION.to_string(),
            accessors: format!(
                "{}\n{}\n{}{}",
                ACCESSORS,
                dendrite_index_by_search("post_ranks_"),
                vector_helper(),
                HELPERS
            ),
            inverse: if ctx.inverse {
                inverse_index(self)
            } else {
                String::new()
            },
            size_in_bytes: "    size_in_bytes += sizeof(int) * (post_ranks_.capacity() + col_idx_.capacity() + 2);\n"
                .to_string(),
            clear: "    post_ranks_.clear();\n\
                    \x20   col_idx_.clear();\n\
                    \x20   nb_post_ = 0;\n\
                    \x20   maxnzr_ = 0;\n"
                .to_string(),
            ..ConnectivityCode::default()
        }
    }

    fn row_loop(&self, body: &str) -> String {
        format!(
            "for (int j = n * maxnzr_; j < (n + 1) * maxnzr_; j++) {{\n\
             \x20   int rk_pre = col_idx_[j];\n\
             \x20   if (rk_pre == -1)\n\
             \x20       break;\n\
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
}

const CONSTRUCTION: &str = "    void init_from_lil(std::vector<int> post_ranks, std::vector<std::vector<int>> pre_ranks) {
        post_ranks_ = post_ranks;
        nb_post_ = post_ranks.size();
        maxnzr_ = 0;
        for (auto it = pre_ranks.cbegin(); it != pre_ranks.cend(); it++)
            maxnzr_ = std::max<int>(maxnzr_, it->size());
        col_idx_ = std::vector<int>(nb_post_ * maxnzr_, -1);
        for (int n = 0; n < nb_post_; n++)
            std::copy(pre_ranks[n].begin(), pre_ranks[n].end(), col_idx_.begin() + n * maxnzr_);
    }
";

const ACCESSORS: &str = "    std::vector<int> get_post_rank() { return post_ranks_; }
    int nb_dendrites() { return nb_post_; }

    int dendrite_size(int n) {
        int size = 0;
        while (size < maxnzr_ && col_idx_[n * maxnzr_ + size] != -1)
            size++;
        return size;
    }

    int nb_synapses() {
        int size = 0;
        for (int n = 0; n < nb_post_; n++)
            size += dendrite_size(n);
        return size;
    }

    std::vector<int> get_dendrite_pre_rank(int n) {
        return std::vector<int>(col_idx_.begin() + n * maxnzr_, col_idx_.begin() + n * maxnzr_ + dendrite_size(n));
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
        return std::vector<T>(nb_post_ * maxnzr_, value);
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
        return std::vector<T>(variable.begin() + n * maxnzr_, variable.begin() + n * maxnzr_ + dendrite_size(n));
    }

    template<typename T>
    T get_matrix_variable(const std::vector<T> &variable, int n, int k) {
        return variable[n * maxnzr_ + k];
    }

    template<typename T>
    void update_matrix_variable_all(std::vector<T> &variable, const std::vector<std::vector<T>> &data) {
        for (int n = 0; n < nb_post_; n++)
            update_matrix_variable_row<T>(variable, n, data[n]);
    }

    template<typename T>
    void update_matrix_variable_row(std::vector<T> &variable, int n, const std::vector<T> &data) {
        std::copy(data.begin(), data.end(), variable.begin() + n * maxnzr_);
    }

    template<typename T>
    void update_matrix_variable(std::vector<T> &variable, int n, int k, T value) {
        variable[n * maxnzr_ + k] = value;
    }
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_loop_stops_at_padding() {
        let code = Ell.row_loop("sum += w[j];\n");
        assert!(code.starts_with("for (int j = n * maxnzr_; j < (n + 1) * maxnzr_; j++) {"));
        assert!(code.contains("if (rk_pre == -1)\n        break;"));
    }
}
