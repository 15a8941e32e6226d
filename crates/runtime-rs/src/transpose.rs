//! Transposed projections.
//!
//! A transposed projection owns no weights. It inverts the connectivity of
//! its forward projection once and reads the forward weights through the
//! stored `(dendrite, synapse)` coordinates at every step.

use std::collections::BTreeMap;

use tracing::debug;

use crate::connectivity::{variable_at, Connectivity};
use crate::{Result, RuntimeError};

/// Forward connectivity seen from the other side: for every pre-synaptic
/// rank of the forward projection, the forward synapses it takes part in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvertedIndex {
    /// Post-synaptic ranks of the transpose, ascending
    post_ranks: Vec<usize>,
    /// Per transposed dendrite: (forward dendrite, forward synapse)
    entries: Vec<Vec<(usize, usize)>>,
}

impl InvertedIndex {
    pub fn from_forward<C: Connectivity + ?Sized>(forward: &C) -> Result<Self> {
        let mut inverse: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
        for n in 0..forward.nb_dendrites() {
            for (k, rk_pre) in forward.pre_ranks(n).into_iter().enumerate() {
                inverse.entry(rk_pre).or_default().push((n, k));
            }
        }
        let (post_ranks, entries): (Vec<usize>, Vec<Vec<(usize, usize)>>) = inverse.into_iter().unzip();

        let total: usize = entries.iter().map(Vec::len).sum();
        if total != forward.nb_synapses() {
            return Err(RuntimeError::Inconsistent(format!(
                "inverted index holds {} synapses, forward projection {}",
                total,
                forward.nb_synapses()
            )));
        }
        debug!(dendrites = post_ranks.len(), synapses = total, "inverted forward projection");
        Ok(Self { post_ranks, entries })
    }

    pub fn post_ranks(&self) -> &[usize] {
        &self.post_ranks
    }

    pub fn entries(&self, dendrite: usize) -> &[(usize, usize)] {
        self.entries.get(dendrite).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn nb_dendrites(&self) -> usize {
        self.post_ranks.len()
    }

    pub fn nb_synapses(&self) -> usize {
        self.entries.iter().map(Vec::len).sum()
    }
}

/// Weights of the forward projection
#[derive(Debug, Clone, PartialEq)]
pub enum Weights {
    Single(f64),
    /// Flat per-synapse storage of the forward connectivity
    PerSynapse(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransposeProjection {
    index: InvertedIndex,
    /// Post-synaptic ranks of the forward projection, pre-synaptic here
    forward_post: Vec<usize>,
}

impl TransposeProjection {
    pub fn new<C: Connectivity + ?Sized>(forward: &C) -> Result<Self> {
        Ok(Self {
            index: InvertedIndex::from_forward(forward)?,
            forward_post: forward.post_ranks().to_vec(),
        })
    }

    pub fn index(&self) -> &InvertedIndex {
        &self.index
    }

    pub fn post_rank(&self) -> &[usize] {
        self.index.post_ranks()
    }

    /// Weighted sums for every transposed dendrite: `pre` holds the rates of
    /// the forward post-synaptic population, the result is indexed like
    /// [`post_rank`](Self::post_rank).
    pub fn compute_psp<C: Connectivity + ?Sized>(
        &self,
        forward: &C,
        weights: &Weights,
        pre: &[f64],
    ) -> Result<Vec<f64>> {
        let mut sums = Vec::with_capacity(self.index.nb_dendrites());
        for i in 0..self.index.nb_dendrites() {
            let mut sum = 0.0;
            for &(n, k) in self.index.entries(i) {
                let w = match weights {
                    Weights::Single(w) => *w,
                    Weights::PerSynapse(values) => variable_at(forward, values, n, k)?,
                };
                let rk_pre = self.forward_post[n];
                let r = pre
                    .get(rk_pre)
                    .ok_or_else(|| RuntimeError::OutOfRange(format!("pre-synaptic rank {}", rk_pre)))?;
                sum += w * r;
            }
            sums.push(sum);
        }
        Ok(sums)
    }

    pub fn connectivity_matrix(&self) -> Result<Vec<Vec<f64>>> {
        Err(RuntimeError::NotAvailable {
            operation: "connectivity_matrix",
        })
    }

    pub fn receptive_fields(&self) -> Result<Vec<Vec<f64>>> {
        Err(RuntimeError::NotAvailable {
            operation: "receptive_fields",
        })
    }

    pub fn save(&self, _filename: &str) -> Result<()> {
        Err(RuntimeError::NotAvailable { operation: "save" })
    }

    pub fn load(&mut self, _filename: &str) -> Result<()> {
        Err(RuntimeError::NotAvailable { operation: "load" })
    }
}
