//! Generated code fragments.
//!
//! A fragment is an opaque piece of target-language text owned by one
//! population or projection. Generators produce them, assembly concatenates
//! them by kind in object order. Fragment text is never edited afterwards.

use neurogen_core::ObjectId;
use serde::Serialize;

/// Slot of the program skeleton a fragment is spliced into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum FragmentKind {
    /// Complete content of the object's own header
    Header,
    /// Global instance declaration in `network.h`
    Instance,
    /// Statements in `initialize()`
    Initialize,
    /// Statements in `initialize()` that read other objects' state, run
    /// after every `Initialize` statement
    LateInitialize,
    ResetInputs,
    ComputePsp,
    UpdateNeurons,
    UpdateDelay,
    GlobalOps,
    UpdateSynapses,
    PostEvents,
    StructuralPlasticity,
    /// `case` arm of the run-until switch
    StopCondition,
    /// Kernels and launchers in the device file (CUDA)
    DeviceCode,
    /// Launcher prototypes in `network.h` (CUDA)
    DevicePrototypes,
    HostToDevice,
    DeviceToHost,
    /// Recorder class in `recorder.h`
    Recorder,
    /// Declarations and wrapper class in `bindings.pyx`
    BindingDecl,
    BindingWrapper,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fragment {
    owner: ObjectId,
    kind: FragmentKind,
    text: String,
}

impl Fragment {
    pub fn new(owner: ObjectId, kind: FragmentKind, text: impl Into<String>) -> Self {
        Self {
            owner,
            kind,
            text: text.into(),
        }
    }

    pub fn owner(&self) -> ObjectId {
        self.owner
    }

    pub fn kind(&self) -> FragmentKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// All fragments of one generation run
#[derive(Debug, Clone, Default, Serialize)]
pub struct FragmentSet {
    fragments: Vec<Fragment>,
}

impl FragmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment. Blank text is dropped so that assembly never has to
    /// care about features an object does not use.
    pub fn push(&mut self, owner: ObjectId, kind: FragmentKind, text: impl Into<String>) {
        let text = text.into();
        if !text.trim().is_empty() {
            self.fragments.push(Fragment::new(owner, kind, text));
        }
    }

    pub fn extend(&mut self, other: FragmentSet) {
        self.fragments.extend(other.fragments);
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter()
    }

    pub fn of_kind(&self, kind: FragmentKind) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter().filter(move |f| f.kind == kind)
    }

    pub fn of_owner(&self, owner: ObjectId) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter().filter(move |f| f.owner == owner)
    }

    /// Concatenate every fragment of one kind, populations before
    /// projections, each in id order.
    pub fn concat(&self, kind: FragmentKind) -> String {
        let mut selected: Vec<&Fragment> = self.of_kind(kind).collect();
        selected.sort_by_key(|f| f.owner);
        selected.iter().map(|f| f.text.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_fragments_dropped() {
        let mut set = FragmentSet::new();
        set.push(ObjectId::Population(0), FragmentKind::ResetInputs, "  \n");
        set.push(ObjectId::Population(0), FragmentKind::UpdateNeurons, "pop0.update();\n");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_concat_orders_by_owner() {
        let mut set = FragmentSet::new();
        set.push(ObjectId::Projection(0), FragmentKind::Initialize, "c;");
        set.push(ObjectId::Population(1), FragmentKind::Initialize, "b;");
        set.push(ObjectId::Population(0), FragmentKind::Initialize, "a;");
        set.push(ObjectId::Population(0), FragmentKind::UpdateNeurons, "x;");
        assert_eq!(set.concat(FragmentKind::Initialize), "a;b;c;");
        assert_eq!(set.of_owner(ObjectId::Population(0)).count(), 2);
    }
}
