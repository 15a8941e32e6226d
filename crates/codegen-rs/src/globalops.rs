//! Reductions over a population variable.
//!
//! One routine per (operation, variable) pair; the pair set is deduplicated
//! by the propagation pass so each routine is emitted once.

use neurogen_core::{GlobalOp, GlobalOpKind};

fn code(kind: GlobalOpKind) -> &'static str {
    match kind {
        GlobalOpKind::Min => "GLOBAL_OP_MIN",
        GlobalOpKind::Max => "GLOBAL_OP_MAX",
        GlobalOpKind::Mean => "GLOBAL_OP_MEAN",
        GlobalOpKind::Sum => "GLOBAL_OP_SUM",
        GlobalOpKind::Norm1 => "GLOBAL_OP_NORM1",
        GlobalOpKind::Norm2 => "GLOBAL_OP_NORM2",
    }
}

/// Parse a reduction symbol such as `mean(r)`
pub fn parse_symbol(symbol: &str) -> Option<GlobalOp> {
    let (function, rest) = symbol.split_once('(')?;
    let variable = rest.strip_suffix(')')?.trim();
    let kind = GlobalOpKind::parse(function.trim())?;
    if variable.is_empty() {
        return None;
    }
    Some(GlobalOp {
        kind,
        variable: variable.to_string(),
    })
}

/// Result member, `T _mean_r;`
pub fn declaration(op: &GlobalOp, ctype: &str) -> String {
    format!("    {} {};\n", ctype, op.member())
}

/// Name of the host routine computing `op`
pub fn routine(op: &GlobalOp) -> String {
    format!("compute{}", op.member())
}

/// Host routine, a member function of the population structure
pub fn host_routine(op: &GlobalOp, ctype: &str) -> String {
    let r = op.member();
    let x = &op.variable;
    let body = match op.kind {
        GlobalOpKind::Min | GlobalOpKind::Max => {
            let cmp = if op.kind == GlobalOpKind::Min { "<" } else { ">" };
            format!(
                "        if (size == 0) {{\n\
                 \x20           {r} = 0;\n\
                 \x20           return;\n\
                 \x20       }}\n\
                 \x20       {r} = {x}[0];\n\
                 \x20       for (int i = 1; i < size; i++) {{\n\
                 \x20           if ({x}[i] {cmp} {r})\n\
                 \x20               {r} = {x}[i];\n\
                 \x20       }}\n"
            )
        }
        GlobalOpKind::Mean | GlobalOpKind::Sum => {
            let finish = if op.kind == GlobalOpKind::Mean {
                format!("        if (size > 0)\n            {r} /= static_cast<{ctype}>(size);\n")
            } else {
                String::new()
            };
            format!(
                "        {r} = 0;\n\
                 \x20       for (int i = 0; i < size; i++)\n\
                 \x20           {r} += {x}[i];\n\
                 {finish}"
            )
        }
        GlobalOpKind::Norm1 => format!(
            "        {r} = 0;\n\
             \x20       for (int i = 0; i < size; i++)\n\
             \x20           {r} += std::fabs({x}[i]);\n"
        ),
        GlobalOpKind::Norm2 => format!(
            "        {r} = 0;\n\
             \x20       for (int i = 0; i < size; i++)\n\
             \x20           {r} += {x}[i] * {x}[i];\n\
             \x20       {r} = std::sqrt({r});\n"
        ),
    };
    format!("    void {}() {{\n{}    }}\n", routine(op), body)
}

/// Single-block tree reduction shared by every device reduction
pub const DEVICE_KERNEL: &str = "// Global operations
#define GLOBAL_OP_MIN 0
#define GLOBAL_OP_MAX 1
#define GLOBAL_OP_MEAN 2
#define GLOBAL_OP_SUM 3
#define GLOBAL_OP_NORM1 4
#define GLOBAL_OP_NORM2 5

template<typename T>
__device__ T global_op_combine(int op, T a, T b) {
    switch (op) {
        case GLOBAL_OP_MIN: return b < a ? b : a;
        case GLOBAL_OP_MAX: return b > a ? b : a;
        default: return a + b;
    }
}

template<typename T>
__global__ void global_op_kernel(const T* data, int size, int op, T* result) {
    extern __shared__ unsigned char _shared[];
    T* partial = reinterpret_cast<T*>(_shared);
    int tid = threadIdx.x;

    T acc = 0;
    if ((op == GLOBAL_OP_MIN || op == GLOBAL_OP_MAX) && size > 0)
        acc = data[0];
    for (int i = tid; i < size; i += blockDim.x) {
        T value = data[i];
        if (op == GLOBAL_OP_NORM1)
            value = fabs(value);
        else if (op == GLOBAL_OP_NORM2)
            value = value * value;
        acc = global_op_combine<T>(op, acc, value);
    }
    partial[tid] = acc;
    __syncthreads();

    for (int s = blockDim.x / 2; s > 0; s >>= 1) {
        if (tid < s)
            partial[tid] = global_op_combine<T>(op, partial[tid], partial[tid + s]);
        __syncthreads();
    }

    if (tid == 0) {
        T value = partial[0];
        if (op == GLOBAL_OP_MEAN && size > 0)
            value /= static_cast<T>(size);
        if (op == GLOBAL_OP_NORM2)
            value = sqrt(value);
        *result = value;
    }
}
";

/// Device members of a reduction result
pub fn device_declaration(op: &GlobalOp, ctype: &str) -> String {
    format!("    {} {};\n    {}* gpu_{};\n", ctype, op.member(), ctype, op.member())
}

pub fn device_initializer(op: &GlobalOp, ctype: &str) -> String {
    format!(
        "    {r} = 0;\n    cudaMalloc((void**)&gpu_{r}, sizeof({t}));\n",
        r = op.member(),
        t = ctype
    )
}

pub fn device_to_host(op: &GlobalOp, ctype: &str) -> String {
    format!(
        "    cudaMemcpy(&{r}, gpu_{r}, sizeof({t}), cudaMemcpyDeviceToHost);\n",
        r = op.member(),
        t = ctype
    )
}

/// Launch of the reduction kernel for population instance `pop`
pub fn device_launch(pop: &str, op: &GlobalOp, ctype: &str, threads: u32) -> String {
    format!(
        "    global_op_kernel<{t}><<<1, {n}, {n} * sizeof({t})>>>({p}.gpu_{x}, {p}.size, {c}, {p}.gpu_{r});\n",
        t = ctype,
        n = threads,
        p = pop,
        x = op.variable,
        c = code(op.kind),
        r = op.member()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kind: GlobalOpKind) -> GlobalOp {
        GlobalOp {
            kind,
            variable: "r".into(),
        }
    }

    #[test]
    fn test_parse_symbol() {
        assert_eq!(parse_symbol("max( r )"), Some(op(GlobalOpKind::Max)));
        assert_eq!(parse_symbol("median(r)"), None);
        assert_eq!(parse_symbol("mean()"), None);
        assert_eq!(parse_symbol("r"), None);
    }

    #[test]
    fn test_host_routine_names() {
        let code = host_routine(&op(GlobalOpKind::Mean), "double");
        assert!(code.starts_with("    void compute_mean_r() {"));
        assert!(code.contains("_mean_r /= static_cast<double>(size);"));
        assert_eq!(declaration(&op(GlobalOpKind::Max), "float"), "    float _max_r;\n");
    }

    #[test]
    fn test_norm2_takes_square_root() {
        let code = host_routine(&op(GlobalOpKind::Norm2), "double");
        assert!(code.contains("_norm2_r += r[i] * r[i];"));
        assert!(code.contains("_norm2_r = std::sqrt(_norm2_r);"));
    }

    #[test]
    fn test_device_launch() {
        let code = device_launch("pop1", &op(GlobalOpKind::Min), "double", 32);
        assert_eq!(
            code,
            "    global_op_kernel<double><<<1, 32, 32 * sizeof(double)>>>(pop1.gpu_r, pop1.size, GLOBAL_OP_MIN, pop1.gpu__min_r);\n"
        );
    }
}
