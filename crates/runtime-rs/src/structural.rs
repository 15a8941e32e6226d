//! Structural plasticity on list-of-lists projections.
//!
//! Synapses are inserted and removed one at a time. Every per-synapse array
//! (pre ranks, weights, delays, named variables) keeps the same shape, rows
//! stay sorted by pre-synaptic rank, and the inverse index is rebuilt after
//! each change so spike routing sees the new synapse set.

use std::collections::BTreeMap;

use tracing::trace;

use crate::{Result, RuntimeError};

#[derive(Debug, Clone, PartialEq)]
pub struct DynamicProjection {
    post_ranks: Vec<usize>,
    pre_ranks: Vec<Vec<usize>>,
    weights: Vec<Vec<f64>>,
    delays: Option<Vec<Vec<u32>>>,
    /// Named per-synapse variables and the value new synapses start from
    variables: BTreeMap<String, (f64, Vec<Vec<f64>>)>,
    /// Pre-synaptic rank -> (dendrite, position)
    inverse: BTreeMap<usize, Vec<(usize, usize)>>,
}

impl DynamicProjection {
    /// Build from an edge list. Rows are sorted by pre-synaptic rank, their
    /// weights and delays permuted along.
    pub fn new(
        post_ranks: Vec<usize>,
        pre_ranks: Vec<Vec<usize>>,
        weights: Vec<Vec<f64>>,
        delays: Option<Vec<Vec<u32>>>,
    ) -> Result<Self> {
        if pre_ranks.len() != post_ranks.len() || weights.len() != post_ranks.len() {
            return Err(RuntimeError::Inconsistent(
                "post ranks, pre ranks and weights differ in length".into(),
            ));
        }
        if let Some(d) = &delays {
            if d.len() != post_ranks.len() {
                return Err(RuntimeError::Inconsistent("delays differ in length".into()));
            }
        }

        let mut sorted_pre = Vec::with_capacity(pre_ranks.len());
        let mut sorted_w = Vec::with_capacity(pre_ranks.len());
        let mut sorted_d = delays.as_ref().map(|_| Vec::with_capacity(pre_ranks.len()));
        for (n, row) in pre_ranks.iter().enumerate() {
            if weights[n].len() != row.len() || delays.as_ref().is_some_and(|d| d[n].len() != row.len()) {
                return Err(RuntimeError::Inconsistent(format!("dendrite {} has mismatched arrays", n)));
            }
            let mut order: Vec<usize> = (0..row.len()).collect();
            order.sort_by_key(|&k| row[k]);
            if order.windows(2).any(|w| row[w[0]] == row[w[1]]) {
                return Err(RuntimeError::Inconsistent(format!("dendrite {} has duplicate synapses", n)));
            }
            sorted_pre.push(order.iter().map(|&k| row[k]).collect());
            sorted_w.push(order.iter().map(|&k| weights[n][k]).collect());
            if let (Some(out), Some(d)) = (sorted_d.as_mut(), delays.as_ref()) {
                out.push(order.iter().map(|&k| d[n][k]).collect());
            }
        }

        let mut proj = Self {
            post_ranks,
            pre_ranks: sorted_pre,
            weights: sorted_w,
            delays: sorted_d,
            variables: BTreeMap::new(),
            inverse: BTreeMap::new(),
        };
        proj.rebuild_inverse();
        Ok(proj)
    }

    /// Add a per-synapse variable, every existing and future synapse
    /// starting at `init`
    pub fn add_variable(&mut self, name: &str, init: f64) {
        let values = self.pre_ranks.iter().map(|row| vec![init; row.len()]).collect();
        self.variables.insert(name.to_string(), (init, values));
    }

    pub fn dendrite_index(&self, rk_post: usize) -> Option<usize> {
        self.post_ranks.iter().position(|&r| r == rk_post)
    }

    pub fn post_ranks(&self) -> &[usize] {
        &self.post_ranks
    }

    pub fn pre_ranks(&self) -> &[Vec<usize>] {
        &self.pre_ranks
    }

    pub fn weights(&self) -> &[Vec<f64>] {
        &self.weights
    }

    pub fn delays(&self) -> Option<&[Vec<u32>]> {
        self.delays.as_deref()
    }

    pub fn variable(&self, name: &str) -> Option<&[Vec<f64>]> {
        self.variables.get(name).map(|(_, v)| v.as_slice())
    }

    pub fn inverse(&self) -> &BTreeMap<usize, Vec<(usize, usize)>> {
        &self.inverse
    }

    pub fn nb_synapses(&self) -> usize {
        self.pre_ranks.iter().map(Vec::len).sum()
    }

    /// Insert the synapse `rk_pre -> rk_post` at its sorted position.
    /// Returns `false` when it already exists.
    pub fn add_synapse(&mut self, rk_post: usize, rk_pre: usize, weight: f64, delay: u32) -> Result<bool> {
        let n = self
            .dendrite_index(rk_post)
            .ok_or(RuntimeError::UnknownDendrite(rk_post))?;
        let j = match self.pre_ranks[n].binary_search(&rk_pre) {
            Ok(_) => return Ok(false),
            Err(j) => j,
        };
        self.pre_ranks[n].insert(j, rk_pre);
        self.weights[n].insert(j, weight);
        if let Some(d) = self.delays.as_mut() {
            d[n].insert(j, delay);
        }
        for (init, values) in self.variables.values_mut() {
            values[n].insert(j, *init);
        }
        self.rebuild_inverse();
        trace!(rk_post, rk_pre, position = j, "added synapse");
        Ok(true)
    }

    /// Remove the synapse `rk_pre -> rk_post`. Returns `false` when it does
    /// not exist.
    pub fn remove_synapse(&mut self, rk_post: usize, rk_pre: usize) -> Result<bool> {
        let n = self
            .dendrite_index(rk_post)
            .ok_or(RuntimeError::UnknownDendrite(rk_post))?;
        let Ok(j) = self.pre_ranks[n].binary_search(&rk_pre) else {
            return Ok(false);
        };
        self.pre_ranks[n].remove(j);
        self.weights[n].remove(j);
        if let Some(d) = self.delays.as_mut() {
            d[n].remove(j);
        }
        for (_, values) in self.variables.values_mut() {
            values[n].remove(j);
        }
        self.rebuild_inverse();
        trace!(rk_post, rk_pre, position = j, "removed synapse");
        Ok(true)
    }

    /// Remove every synapse for which `condition(dendrite, position)` holds,
    /// the way the pruning phase sweeps a projection
    pub fn prune<F>(&mut self, mut condition: F) -> Result<usize>
    where
        F: FnMut(&Self, usize, usize) -> bool,
    {
        let mut doomed = Vec::new();
        for n in 0..self.post_ranks.len() {
            for j in 0..self.pre_ranks[n].len() {
                if condition(self, n, j) {
                    doomed.push((self.post_ranks[n], self.pre_ranks[n][j]));
                }
            }
        }
        for (rk_post, rk_pre) in &doomed {
            self.remove_synapse(*rk_post, *rk_pre)?;
        }
        Ok(doomed.len())
    }

    fn rebuild_inverse(&mut self) {
        self.inverse.clear();
        for (n, row) in self.pre_ranks.iter().enumerate() {
            for (j, &rk_pre) in row.iter().enumerate() {
                self.inverse.entry(rk_pre).or_default().push((n, j));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection() -> DynamicProjection {
        let mut proj = DynamicProjection::new(
            vec![0, 1],
            vec![vec![4, 1], vec![2]],
            vec![vec![0.4, 0.1], vec![0.2]],
            Some(vec![vec![3, 1], vec![2]]),
        )
        .unwrap();
        proj.add_variable("trace", 0.0);
        proj
    }

    #[test]
    fn test_rows_sorted_on_construction() {
        let proj = projection();
        assert_eq!(proj.pre_ranks(), &[vec![1, 4], vec![2]]);
        assert_eq!(proj.weights(), &[vec![0.1, 0.4], vec![0.2]]);
        assert_eq!(proj.delays().unwrap(), &[vec![1, 3], vec![2]]);
    }

    #[test]
    fn test_add_then_remove_restores_every_array() {
        let mut proj = projection();
        let before = proj.clone();

        assert!(proj.add_synapse(0, 2, 0.7, 5).unwrap());
        assert_eq!(proj.pre_ranks()[0], vec![1, 2, 4]);
        assert_eq!(proj.weights()[0], vec![0.1, 0.7, 0.4]);
        assert_eq!(proj.delays().unwrap()[0], vec![1, 5, 3]);
        assert_eq!(proj.variable("trace").unwrap()[0], vec![0.0, 0.0, 0.0]);
        assert_eq!(proj.inverse()[&2], vec![(0, 1), (1, 0)]);

        assert!(proj.remove_synapse(0, 2).unwrap());
        assert_eq!(proj, before);
    }

    #[test]
    fn test_duplicate_and_missing_synapses() {
        let mut proj = projection();
        assert!(!proj.add_synapse(0, 4, 1.0, 1).unwrap());
        assert!(!proj.remove_synapse(1, 9).unwrap());
        assert_eq!(proj.add_synapse(5, 0, 1.0, 1), Err(RuntimeError::UnknownDendrite(5)));
        assert_eq!(proj.nb_synapses(), 3);
    }

    #[test]
    fn test_prune_weak_synapses() {
        let mut proj = projection();
        let removed = proj.prune(|p, n, j| p.weights()[n][j] < 0.25).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(proj.pre_ranks(), &[vec![4], vec![]]);
        assert!(!proj.inverse().contains_key(&1));
    }

    #[test]
    fn test_duplicate_edges_rejected() {
        let err = DynamicProjection::new(vec![0], vec![vec![1, 1]], vec![vec![0.0, 0.0]], None);
        assert!(matches!(err, Err(RuntimeError::Inconsistent(_))));
    }
}
