//! List of lists: one vector of pre-synaptic ranks per dendrite.
//!
//! The only format with dynamic edges. Host only.

use neurogen_core::StorageFormat;

use super::{inverse_index, ConnectivityCode, ConnectivityContext, ConnectivityStrategy};
use crate::attributes::LocalLayout;

pub struct Lil;

impl ConnectivityStrategy for Lil {
    fn format(&self) -> StorageFormat {
        StorageFormat::Lil
    }

    fn layout(&self) -> LocalLayout {
        LocalLayout::Nested
    }

    fn code(&self, ctx: &ConnectivityContext) -> ConnectivityCode {
        ConnectivityCode {
            declaration: "    // Connectivity (LIL)\n\
                          \x20   std::vector<int> post_rank;\n\
                          \x20   std::vector<std::vector<int>> pre_rank;\n"
                .to_string(),
            construction: "    void init_from_lil(std::vector<int> post_ranks, std::vector<std::vector<int>> pre_ranks) {\n\
                           \x20       post_rank = post_ranks;\n\
                           \x20       pre_rank = pre_ranks;\n\
                           \x20   }\n"
                .to_string(),
            accessors: ACCESSORS.to_string(),
            inverse: if ctx.inverse {
                inverse_index(self)
            } else {
                String::new()
            },
            size_in_bytes: "    size_in_bytes += sizeof(int) * post_rank.capacity();\n\
                            \x20   for (auto it = pre_rank.cbegin(); it != pre_rank.cend(); it++)\n\
                            \x20       size_in_bytes += sizeof(int) * it->capacity();\n"
                .to_string(),
            clear: "    post_rank.clear();\n\
                    \x20   post_rank.shrink_to_fit();\n\
                    \x20   pre_rank.clear();\n\
                    \x20   pre_rank.shrink_to_fit();\n"
                .to_string(),
            ..ConnectivityCode::default()
        }
    }

    fn row_loop(&self, body: &str) -> String {
        format!(
            "for (int j = 0; j < pre_rank[n].size(); j++) {{\n\
             \x20   int rk_pre = pre_rank[n][j];\n\
             {}\
             }}\n",
            crate::template::indent(body, 1)
        )
    }

    fn synapse(&self) -> &'static str {
        "[n][j]"
    }

    fn post_rank(&self) -> &'static str {
        "post_rank[n]"
    }
}

const ACCESSORS: &str = "    std::vector<int> get_post_rank() { return post_rank; }
    std::vector<std::vector<int>> get_pre_ranks() { return pre_rank; }
    std::vector<int> get_dendrite_pre_rank(int n) { return pre_rank[n]; }
    int nb_dendrites() { return post_rank.size(); }
    int dendrite_size(int n) { return pre_rank[n].size(); }

    int nb_synapses() {
        int size = 0;
        for (auto it = pre_rank.cbegin(); it != pre_rank.cend(); it++)
            size += it->size();
        return size;
    }

    int dendrite_index(int rk_post) {
        auto it = std::find(post_rank.begin(), post_rank.end(), rk_post);
        if (it == post_rank.end())
            return -1;
        return std::distance(post_rank.begin(), it);
    }

    template<typename T>
    std::vector<std::vector<T>> init_matrix_variable(T value) {
        std::vector<std::vector<T>> variable;
        for (int n = 0; n < nb_dendrites(); n++)
            variable.push_back(std::vector<T>(pre_rank[n].size(), value));
        return variable;
    }

    template<typename T>
    std::vector<T> init_vector_variable(T value) {
        return std::vector<T>(nb_dendrites(), value);
    }

    template<typename T>
    std::vector<std::vector<T>> get_matrix_variable_all(const std::vector<std::vector<T>> &variable) {
        return variable;
    }

    template<typename T>
    std::vector<T> get_matrix_variable_row(const std::vector<std::vector<T>> &variable, int n) {
        return variable[n];
    }

    template<typename T>
    T get_matrix_variable(const std::vector<std::vector<T>> &variable, int n, int k) {
        return variable[n][k];
    }

    template<typename T>
    void update_matrix_variable_all(std::vector<std::vector<T>> &variable, const std::vector<std::vector<T>> &data) {
        variable = data;
    }

    template<typename T>
    void update_matrix_variable_row(std::vector<std::vector<T>> &variable, int n, const std::vector<T> &data) {
        variable[n] = data;
    }

    template<typename T>
    void update_matrix_variable(std::vector<std::vector<T>> &variable, int n, int k, T value) {
        variable[n][k] = value;
    }
";
