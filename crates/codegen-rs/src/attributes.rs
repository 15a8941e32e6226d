//! Attribute code families.
//!
//! One pure function per (backend, owner, locality) produces every piece of
//! code an attribute needs inside its owning structure. Generators never
//! spell attribute storage themselves, so declaration, accessors, recorders
//! and transfers agree on the storage shape by construction.

use neurogen_core::{AttrKind, Backend, Locality, NeurogenError, ObjectId, Result};

/// Kind of structure holding the attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Population,
    Projection,
}

/// Container of per-synapse values inside a projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalLayout {
    /// One vector per dendrite (LIL)
    Nested,
    /// One flat vector, indexed by the connectivity format
    Flat,
}

#[derive(Debug, Clone, Copy)]
pub struct AttributeRequest<'a> {
    pub name: &'a str,
    pub ctype: &'a str,
    pub locality: Locality,
    pub kind: AttrKind,
    pub init: &'a str,
    pub layout: LocalLayout,
}

/// Code of one attribute, each field independently usable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeCode {
    /// Member declarations
    pub declaration: String,
    /// Statements run at construction time
    pub initializer: String,
    /// Host getter/setter methods
    pub accessors: String,
    /// Statements adding to a local `size_in_bytes`
    pub size_in_bytes: String,
    /// Statements releasing the storage
    pub clear: String,
    /// Lazy upload, gated by the dirty flag (device backends)
    pub host_to_device: String,
    /// Download after a run (device backends, variables only)
    pub device_to_host: String,
}

type Family = fn(&AttributeRequest) -> AttributeCode;

const LIBRARY: &[(Backend, Owner, Locality, Family)] = &[
    (Backend::OpenMp, Owner::Population, Locality::Local, omp_population_local),
    (Backend::OpenMp, Owner::Population, Locality::Global, omp_global),
    (Backend::OpenMp, Owner::Projection, Locality::Local, omp_projection_local),
    (Backend::OpenMp, Owner::Projection, Locality::Semiglobal, omp_projection_semiglobal),
    (Backend::OpenMp, Owner::Projection, Locality::Global, omp_global),
    (Backend::Cuda, Owner::Population, Locality::Local, cuda_population_local),
    (Backend::Cuda, Owner::Population, Locality::Global, cuda_global),
    (Backend::Cuda, Owner::Projection, Locality::Local, cuda_projection_local),
    (Backend::Cuda, Owner::Projection, Locality::Semiglobal, cuda_projection_semiglobal),
    (Backend::Cuda, Owner::Projection, Locality::Global, cuda_global),
];

pub fn lookup(backend: Backend, owner: Owner, locality: Locality) -> Option<Family> {
    LIBRARY
        .iter()
        .find(|(b, o, l, _)| *b == backend && *o == owner && *l == locality)
        .map(|(_, _, _, family)| *family)
}

/// Code family of one attribute. Combinations absent from the library are
/// unsupported configurations.
pub fn attribute_code(
    object: ObjectId,
    backend: Backend,
    owner: Owner,
    request: &AttributeRequest,
) -> Result<AttributeCode> {
    let family = lookup(backend, owner, request.locality).ok_or_else(|| {
        NeurogenError::UnsupportedLocality {
            object,
            attribute: request.name.to_string(),
            locality: request.locality.to_string(),
        }
    })?;
    Ok(family(request))
}

fn label(req: &AttributeRequest) -> String {
    let locality = match req.locality {
        Locality::Local => "Local",
        Locality::Semiglobal => "Semiglobal",
        Locality::Global => "Global",
    };
    format!("    // {} {} {}\n", locality, req.kind.as_str(), req.name)
}

// ============================================================================
// OPENMP
// ============================================================================

fn omp_population_local(req: &AttributeRequest) -> AttributeCode {
    let (x, t, init) = (req.name, req.ctype, req.init);
    AttributeCode {
        declaration: format!("{}    std::vector<{t}> {x};\n", label(req)),
        initializer: format!("    {x} = std::vector<{t}>(size, static_cast<{t}>({init}));\n"),
        accessors: format!(
            "    std::vector<{t}> get_{x}() {{ return {x}; }}\n\
             \x20   void set_{x}(std::vector<{t}> value) {{ {x} = value; }}\n\
             \x20   {t} get_single_{x}(int rk) {{ return {x}[rk]; }}\n\
             \x20   void set_single_{x}(int rk, {t} value) {{ {x}[rk] = value; }}\n"
        ),
        size_in_bytes: format!("    size_in_bytes += sizeof({t}) * {x}.capacity();\n"),
        clear: format!("    {x}.clear();\n    {x}.shrink_to_fit();\n"),
        ..AttributeCode::default()
    }
}

fn omp_global(req: &AttributeRequest) -> AttributeCode {
    let (x, t, init) = (req.name, req.ctype, req.init);
    AttributeCode {
        declaration: format!("{}    {t} {x};\n", label(req)),
        initializer: format!("    {x} = static_cast<{t}>({init});\n"),
        accessors: format!(
            "    {t} get_{x}() {{ return {x}; }}\n\
             \x20   void set_{x}({t} value) {{ {x} = value; }}\n"
        ),
        size_in_bytes: format!("    size_in_bytes += sizeof({t});\n"),
        ..AttributeCode::default()
    }
}

fn matrix_accessors(x: &str, t: &str, on_set: &str) -> String {
    format!(
        "    std::vector<std::vector<{t}>> get_{x}() {{ return get_matrix_variable_all<{t}>({x}); }}\n\
         \x20   void set_{x}(std::vector<std::vector<{t}>> value) {{ update_matrix_variable_all<{t}>({x}, value);{on_set} }}\n\
         \x20   std::vector<{t}> get_dendrite_{x}(int n) {{ return get_matrix_variable_row<{t}>({x}, n); }}\n\
         \x20   void set_dendrite_{x}(int n, std::vector<{t}> value) {{ update_matrix_variable_row<{t}>({x}, n, value);{on_set} }}\n\
         \x20   {t} get_synapse_{x}(int n, int k) {{ return get_matrix_variable<{t}>({x}, n, k); }}\n\
         \x20   void set_synapse_{x}(int n, int k, {t} value) {{ update_matrix_variable<{t}>({x}, n, k, value);{on_set} }}\n"
    )
}

fn omp_projection_local(req: &AttributeRequest) -> AttributeCode {
    let (x, t, init) = (req.name, req.ctype, req.init);
    let (container, size) = match req.layout {
        LocalLayout::Nested => (
            format!("std::vector<std::vector<{t}>>"),
            format!(
                "    for (auto it = {x}.cbegin(); it != {x}.cend(); it++)\n\
                 \x20       size_in_bytes += sizeof({t}) * it->capacity();\n"
            ),
        ),
        LocalLayout::Flat => (
            format!("std::vector<{t}>"),
            format!("    size_in_bytes += sizeof({t}) * {x}.capacity();\n"),
        ),
    };
    AttributeCode {
        declaration: format!("{}    {container} {x};\n", label(req)),
        initializer: format!("    {x} = init_matrix_variable<{t}>(static_cast<{t}>({init}));\n"),
        accessors: matrix_accessors(x, t, ""),
        size_in_bytes: size,
        clear: format!("    {x}.clear();\n    {x}.shrink_to_fit();\n"),
        ..AttributeCode::default()
    }
}

fn omp_projection_semiglobal(req: &AttributeRequest) -> AttributeCode {
    let (x, t, init) = (req.name, req.ctype, req.init);
    AttributeCode {
        declaration: format!("{}    std::vector<{t}> {x};\n", label(req)),
        initializer: format!("    {x} = init_vector_variable<{t}>(static_cast<{t}>({init}));\n"),
        accessors: format!(
            "    std::vector<{t}> get_{x}() {{ return {x}; }}\n\
             \x20   void set_{x}(std::vector<{t}> value) {{ {x} = value; }}\n\
             \x20   {t} get_dendrite_{x}(int n) {{ return {x}[n]; }}\n\
             \x20   void set_dendrite_{x}(int n, {t} value) {{ {x}[n] = value; }}\n"
        ),
        size_in_bytes: format!("    size_in_bytes += sizeof({t}) * {x}.capacity();\n"),
        clear: format!("    {x}.clear();\n    {x}.shrink_to_fit();\n"),
        ..AttributeCode::default()
    }
}

// ============================================================================
// CUDA
// ============================================================================

fn device_members(x: &str, t: &str) -> String {
    format!("    {t}* gpu_{x};\n    bool {x}_dirty;\n")
}

fn upload(x: &str, t: &str, count: &str, host: &str) -> String {
    format!(
        "    if ({x}_dirty) {{\n\
         \x20       cudaMemcpy(gpu_{x}, {host}, {count} * sizeof({t}), cudaMemcpyHostToDevice);\n\
         \x20       {x}_dirty = false;\n\
         \x20   }}\n"
    )
}

fn download(req: &AttributeRequest, count: &str, host: &str) -> String {
    if req.kind == AttrKind::Parameter {
        return String::new();
    }
    format!(
        "    cudaMemcpy({host}, gpu_{x}, {count} * sizeof({t}), cudaMemcpyDeviceToHost);\n",
        x = req.name,
        t = req.ctype
    )
}

fn cuda_population_local(req: &AttributeRequest) -> AttributeCode {
    let (x, t, init) = (req.name, req.ctype, req.init);
    AttributeCode {
        declaration: format!(
            "{}    std::vector<{t}> {x};\n{}",
            label(req),
            device_members(x, t)
        ),
        initializer: format!(
            "    {x} = std::vector<{t}>(size, static_cast<{t}>({init}));\n\
             \x20   cudaMalloc((void**)&gpu_{x}, size * sizeof({t}));\n\
             \x20   {x}_dirty = true;\n"
        ),
        accessors: format!(
            "    std::vector<{t}> get_{x}() {{ return {x}; }}\n\
             \x20   void set_{x}(std::vector<{t}> value) {{ {x} = value; {x}_dirty = true; }}\n\
             \x20   {t} get_single_{x}(int rk) {{ return {x}[rk]; }}\n\
             \x20   void set_single_{x}(int rk, {t} value) {{ {x}[rk] = value; {x}_dirty = true; }}\n"
        ),
        size_in_bytes: format!("    size_in_bytes += 2 * sizeof({t}) * {x}.capacity();\n"),
        clear: format!("    {x}.clear();\n    {x}.shrink_to_fit();\n    cudaFree(gpu_{x});\n"),
        host_to_device: upload(x, t, "size", &format!("{x}.data()")),
        device_to_host: download(req, "size", &format!("{x}.data()")),
    }
}

fn cuda_global(req: &AttributeRequest) -> AttributeCode {
    let (x, t, init) = (req.name, req.ctype, req.init);
    AttributeCode {
        declaration: format!("{}    {t} {x};\n{}", label(req), device_members(x, t)),
        initializer: format!(
            "    {x} = static_cast<{t}>({init});\n\
             \x20   cudaMalloc((void**)&gpu_{x}, sizeof({t}));\n\
             \x20   {x}_dirty = true;\n"
        ),
        accessors: format!(
            "    {t} get_{x}() {{ return {x}; }}\n\
             \x20   void set_{x}({t} value) {{ {x} = value; {x}_dirty = true; }}\n"
        ),
        size_in_bytes: format!("    size_in_bytes += 2 * sizeof({t});\n"),
        clear: format!("    cudaFree(gpu_{x});\n"),
        host_to_device: upload(x, t, "1", &format!("&{x}")),
        device_to_host: download(req, "1", &format!("&{x}")),
    }
}

fn cuda_projection_local(req: &AttributeRequest) -> AttributeCode {
    let (x, t, init) = (req.name, req.ctype, req.init);
    let count = format!("{x}.size()");
    AttributeCode {
        declaration: format!(
            "{}    std::vector<{t}> {x};\n{}",
            label(req),
            device_members(x, t)
        ),
        initializer: format!(
            "    {x} = init_matrix_variable<{t}>(static_cast<{t}>({init}));\n\
             \x20   cudaMalloc((void**)&gpu_{x}, {x}.size() * sizeof({t}));\n\
             \x20   {x}_dirty = true;\n"
        ),
        accessors: matrix_accessors(x, t, &format!(" {x}_dirty = true;")),
        size_in_bytes: format!("    size_in_bytes += 2 * sizeof({t}) * {x}.capacity();\n"),
        clear: format!("    {x}.clear();\n    {x}.shrink_to_fit();\n    cudaFree(gpu_{x});\n"),
        host_to_device: upload(x, t, &count, &format!("{x}.data()")),
        device_to_host: download(req, &count, &format!("{x}.data()")),
    }
}

fn cuda_projection_semiglobal(req: &AttributeRequest) -> AttributeCode {
    let (x, t, init) = (req.name, req.ctype, req.init);
    let count = format!("{x}.size()");
    AttributeCode {
        declaration: format!(
            "{}    std::vector<{t}> {x};\n{}",
            label(req),
            device_members(x, t)
        ),
        initializer: format!(
            "    {x} = init_vector_variable<{t}>(static_cast<{t}>({init}));\n\
             \x20   cudaMalloc((void**)&gpu_{x}, {x}.size() * sizeof({t}));\n\
             \x20   {x}_dirty = true;\n"
        ),
        accessors: format!(
            "    std::vector<{t}> get_{x}() {{ return {x}; }}\n\
             \x20   void set_{x}(std::vector<{t}> value) {{ {x} = value; {x}_dirty = true; }}\n\
             \x20   {t} get_dendrite_{x}(int n) {{ return {x}[n]; }}\n\
             \x20   void set_dendrite_{x}(int n, {t} value) {{ {x}[n] = value; {x}_dirty = true; }}\n"
        ),
        size_in_bytes: format!("    size_in_bytes += 2 * sizeof({t}) * {x}.capacity();\n"),
        clear: format!("    {x}.clear();\n    {x}.shrink_to_fit();\n    cudaFree(gpu_{x});\n"),
        host_to_device: upload(x, t, &count, &format!("{x}.data()")),
        device_to_host: download(req, &count, &format!("{x}.data()")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(locality: Locality) -> AttributeRequest<'static> {
        AttributeRequest {
            name: "w",
            ctype: "double",
            locality,
            kind: AttrKind::Variable,
            init: "0.5",
            layout: LocalLayout::Nested,
        }
    }

    #[test]
    fn test_semiglobal_population_is_unsupported() {
        let err = attribute_code(
            ObjectId::Population(4),
            Backend::OpenMp,
            Owner::Population,
            &request(Locality::Semiglobal),
        )
        .unwrap_err();
        assert!(matches!(err, NeurogenError::UnsupportedLocality { .. }));
        assert!(err.to_string().contains("pop4"));
    }

    #[test]
    fn test_every_projection_locality_available_on_both_backends() {
        for backend in [Backend::OpenMp, Backend::Cuda] {
            for locality in [Locality::Local, Locality::Semiglobal, Locality::Global] {
                assert!(lookup(backend, Owner::Projection, locality).is_some());
            }
        }
    }

    #[test]
    fn test_local_projection_lil_shape() {
        let code = attribute_code(
            ObjectId::Projection(0),
            Backend::OpenMp,
            Owner::Projection,
            &request(Locality::Local),
        )
        .unwrap();
        assert!(code
            .declaration
            .contains("std::vector<std::vector<double>> w;"));
        assert!(code
            .accessors
            .contains("std::vector<std::vector<double>> get_w() { return get_matrix_variable_all<double>(w); }"));
        assert!(code.accessors.contains("get_synapse_w(int n, int k)"));
        assert!(code.host_to_device.is_empty());
    }

    #[test]
    fn test_cuda_setters_mark_dirty() {
        let mut req = request(Locality::Local);
        req.layout = LocalLayout::Flat;
        let code =
            attribute_code(ObjectId::Projection(0), Backend::Cuda, Owner::Projection, &req).unwrap();
        assert!(code.declaration.contains("double* gpu_w;"));
        assert!(code.declaration.contains("bool w_dirty;"));
        for line in code.accessors.lines().filter(|l| l.contains("void set_")) {
            assert!(line.contains("w_dirty = true;"), "{}", line);
        }
        assert!(code.host_to_device.contains("if (w_dirty)"));
        assert!(code.host_to_device.contains("w_dirty = false;"));
    }

    #[test]
    fn test_parameters_never_downloaded() {
        let mut req = request(Locality::Global);
        req.kind = AttrKind::Parameter;
        let code =
            attribute_code(ObjectId::Population(0), Backend::Cuda, Owner::Population, &req).unwrap();
        assert!(code.device_to_host.is_empty());
        assert!(!code.host_to_device.is_empty());
    }
}
