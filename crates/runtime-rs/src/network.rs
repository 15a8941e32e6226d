//! Rate-coded network and its step loop.
//!
//! One step runs the phases of the generated `single_step()`: reset the
//! weighted sums, transmit, update the neurons, record, advance time.
//! Transmission is computed per dendrite in parallel, like the
//! `parallel for` over dendrites of the generated code.

use std::collections::BTreeMap;

use ndarray::Array1;
use rayon::prelude::*;
use tracing::debug;

use crate::connectivity::{Connectivity, CsrMatrix};
use crate::recorder::Recorder;
use crate::transpose::Weights;
use crate::{Result, RuntimeError};

/// What a population update sees of its own state
pub struct PopulationState<'a> {
    pub t: i64,
    pub dt: f64,
    pub variables: &'a mut BTreeMap<String, Array1<f64>>,
    pub sums: &'a BTreeMap<String, Array1<f64>>,
}

type UpdateFn = Box<dyn FnMut(PopulationState<'_>) + Send>;

/// Per-neuron predicate; the population stops when any neuron meets it
type StopCondition = Box<dyn Fn(&BTreeMap<String, Array1<f64>>, usize) -> bool + Send + Sync>;

pub struct RatePopulation {
    pub name: String,
    size: usize,
    variables: BTreeMap<String, Array1<f64>>,
    sums: BTreeMap<String, Array1<f64>>,
    update: Option<UpdateFn>,
    stop_condition: Option<StopCondition>,
}

impl RatePopulation {
    /// Population with a firing rate `r` at zero
    pub fn new(name: &str, size: usize) -> Self {
        Self {
            name: name.to_string(),
            size,
            variables: BTreeMap::from([("r".to_string(), Array1::zeros(size))]),
            sums: BTreeMap::new(),
            update: None,
            stop_condition: None,
        }
    }

    pub fn with_update<F>(mut self, update: F) -> Self
    where
        F: FnMut(PopulationState<'_>) + Send + 'static,
    {
        self.update = Some(Box::new(update));
        self
    }

    pub fn with_stop_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&BTreeMap<String, Array1<f64>>, usize) -> bool + Send + Sync + 'static,
    {
        self.stop_condition = Some(Box::new(condition));
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn variable(&self, name: &str) -> Option<&Array1<f64>> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: &str, values: Array1<f64>) -> Result<()> {
        if values.len() != self.size {
            return Err(RuntimeError::Inconsistent(format!(
                "{} values for population '{}' of size {}",
                values.len(),
                self.name,
                self.size
            )));
        }
        self.variables.insert(name.to_string(), values);
        Ok(())
    }

    /// Weighted sum of `target`, as left by the last step
    pub fn sum(&self, target: &str) -> Option<&Array1<f64>> {
        self.sums.get(target)
    }

    fn stop(&self) -> bool {
        match &self.stop_condition {
            Some(condition) => (0..self.size).any(|i| condition(&self.variables, i)),
            None => false,
        }
    }
}

pub struct RateProjection {
    pub pre: usize,
    pub post: usize,
    pub target: String,
    connectivity: Box<dyn Connectivity + Send + Sync>,
    weights: Weights,
    pub transmission: bool,
}

impl RateProjection {
    pub fn new(
        pre: usize,
        post: usize,
        target: &str,
        connectivity: Box<dyn Connectivity + Send + Sync>,
        weights: Weights,
    ) -> Result<Self> {
        if let Weights::PerSynapse(values) = &weights {
            if values.len() != connectivity.nb_slots() {
                return Err(RuntimeError::Inconsistent(format!(
                    "{} weights for {} synapse slots",
                    values.len(),
                    connectivity.nb_slots()
                )));
            }
        }
        Ok(Self {
            pre,
            post,
            target: target.to_string(),
            connectivity,
            weights,
            transmission: true,
        })
    }

    /// Dense projection from an edge list with one shared weight
    pub fn single_weight(
        pre: usize,
        post: usize,
        target: &str,
        post_ranks: Vec<usize>,
        pre_ranks: Vec<Vec<usize>>,
        weight: f64,
    ) -> Result<Self> {
        let connectivity = CsrMatrix::from_lil(post_ranks, pre_ranks)?;
        Self::new(pre, post, target, Box::new(connectivity), Weights::Single(weight))
    }

    pub fn connectivity(&self) -> &dyn Connectivity {
        self.connectivity.as_ref()
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    /// Change the shared weight of a single-weight projection
    pub fn set_single_weight(&mut self, weight: f64) -> Result<()> {
        match &mut self.weights {
            Weights::Single(w) => {
                *w = weight;
                Ok(())
            }
            Weights::PerSynapse(_) => Err(RuntimeError::Inconsistent(
                "projection stores one weight per synapse".into(),
            )),
        }
    }

    /// Weighted sum of every dendrite, in dendrite order
    fn compute_psp(&self, pre_r: &Array1<f64>) -> Vec<f64> {
        let conn = self.connectivity.as_ref();
        let weights = &self.weights;
        (0..conn.nb_dendrites())
            .into_par_iter()
            .map(|n| {
                conn.pre_ranks(n)
                    .iter()
                    .enumerate()
                    .map(|(k, &rk_pre)| {
                        let w = match weights {
                            Weights::Single(w) => *w,
                            Weights::PerSynapse(values) => values[conn.slot(n, k)],
                        };
                        w * pre_r.get(rk_pre).copied().unwrap_or(0.0)
                    })
                    .sum::<f64>()
            })
            .collect()
    }
}

/// How the stop conditions of several populations combine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Every listed population must meet its condition
    All,
    /// One is enough
    Any,
}

pub struct Network {
    populations: Vec<RatePopulation>,
    projections: Vec<RateProjection>,
    recorders: Vec<(usize, Recorder)>,
    t: i64,
    dt: f64,
}

impl Network {
    pub fn new(dt: f64) -> Self {
        Self {
            populations: Vec::new(),
            projections: Vec::new(),
            recorders: Vec::new(),
            t: 0,
            dt,
        }
    }

    pub fn add_population(&mut self, pop: RatePopulation) -> usize {
        self.populations.push(pop);
        self.populations.len() - 1
    }

    /// Register a projection; its target becomes an input of the
    /// post-synaptic population
    pub fn add_projection(&mut self, proj: RateProjection) -> Result<usize> {
        let pre_size = self.population(proj.pre)?.size;
        let post = self
            .populations
            .get_mut(proj.post)
            .ok_or(RuntimeError::UnknownPopulation(proj.post))?;
        let conn = proj.connectivity();
        if conn.post_ranks().iter().any(|&r| r >= post.size)
            || (0..conn.nb_dendrites()).any(|n| conn.pre_ranks(n).iter().any(|&r| r >= pre_size))
        {
            return Err(RuntimeError::OutOfRange("rank beyond population size".into()));
        }
        let size = post.size;
        post.sums
            .entry(proj.target.clone())
            .or_insert_with(|| Array1::zeros(size));
        self.projections.push(proj);
        Ok(self.projections.len() - 1)
    }

    pub fn add_recorder(&mut self, population: usize, recorder: Recorder) -> Result<usize> {
        self.population(population)?;
        self.recorders.push((population, recorder));
        Ok(self.recorders.len() - 1)
    }

    pub fn population(&self, id: usize) -> Result<&RatePopulation> {
        self.populations.get(id).ok_or(RuntimeError::UnknownPopulation(id))
    }

    pub fn population_mut(&mut self, id: usize) -> Result<&mut RatePopulation> {
        self.populations.get_mut(id).ok_or(RuntimeError::UnknownPopulation(id))
    }

    pub fn projection_mut(&mut self, id: usize) -> Option<&mut RateProjection> {
        self.projections.get_mut(id)
    }

    pub fn recorder(&self, id: usize) -> Option<&Recorder> {
        self.recorders.get(id).map(|(_, r)| r)
    }

    pub fn recorder_mut(&mut self, id: usize) -> Option<&mut Recorder> {
        self.recorders.get_mut(id).map(|(_, r)| r)
    }

    pub fn time(&self) -> i64 {
        self.t
    }

    pub fn set_time(&mut self, t: i64) {
        self.t = t;
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn set_dt(&mut self, dt: f64) {
        self.dt = dt;
    }

    pub fn step(&mut self) {
        // Reset inputs
        for pop in &mut self.populations {
            for sum in pop.sums.values_mut() {
                sum.fill(0.0);
            }
        }

        // Synaptic transmission
        for proj in &self.projections {
            if !proj.transmission {
                continue;
            }
            let Some(pre_r) = self.populations[proj.pre].variables.get("r") else {
                continue;
            };
            let sums = proj.compute_psp(pre_r);
            let post = &mut self.populations[proj.post];
            if let Some(target) = post.sums.get_mut(&proj.target) {
                for (n, &rk_post) in proj.connectivity.post_ranks().iter().enumerate() {
                    target[rk_post] += sums[n];
                }
            }
        }

        // Neuron updates
        let (t, dt) = (self.t, self.dt);
        for pop in &mut self.populations {
            if let Some(update) = pop.update.as_mut() {
                update(PopulationState {
                    t,
                    dt,
                    variables: &mut pop.variables,
                    sums: &pop.sums,
                });
            }
        }

        // Recording
        for (id, recorder) in &mut self.recorders {
            recorder.record(self.t, &self.populations[*id].variables, &[]);
        }

        self.t += 1;
    }

    pub fn run(&mut self, steps: usize) {
        debug!(steps, t = self.t, "run");
        for _ in 0..steps {
            self.step();
        }
    }

    /// Run until the stop conditions of `populations` are met, at most
    /// `steps` steps. Returns the number of steps taken. Ids without a stop
    /// condition never meet it; with no stop condition in the network this
    /// is a plain run.
    pub fn run_until(&mut self, steps: usize, populations: &[usize], mode: StopMode) -> usize {
        if self.populations.iter().all(|p| p.stop_condition.is_none()) {
            self.run(steps);
            return steps;
        }
        let mut nb = 0;
        for _ in 0..steps {
            self.step();
            nb += 1;
            let mut met = populations
                .iter()
                .map(|&id| self.populations.get(id).is_some_and(RatePopulation::stop));
            let stop = match mode {
                StopMode::All => met.all(|m| m),
                StopMode::Any => met.any(|m| m),
            };
            if stop {
                break;
            }
        }
        debug!(steps = nb, t = self.t, ?mode, "run_until");
        nb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::{init_variable, set_variable_all, LilMatrix};

    fn counter() -> RatePopulation {
        RatePopulation::new("counter", 2)
            .with_update(|state| {
                if let Some(r) = state.variables.get_mut("r") {
                    r[0] += 1.0;
                }
            })
            .with_stop_condition(|vars, i| vars["r"][i] >= 42.0)
    }

    #[test]
    fn test_run_until_stops_at_condition() {
        let mut net = Network::new(1.0);
        let id = net.add_population(counter());
        assert_eq!(net.run_until(100, &[id], StopMode::All), 42);
        assert_eq!(net.time(), 42);
    }

    #[test]
    fn test_run_until_combines_populations() {
        let mut net = Network::new(1.0);
        let fast = net.add_population(counter());
        let idle = net.add_population(
            RatePopulation::new("idle", 1).with_stop_condition(|_, _| false),
        );
        assert_eq!(net.run_until(50, &[fast, idle], StopMode::Any), 42);
        net.set_time(0);
        assert_eq!(net.run_until(50, &[fast, idle], StopMode::All), 50);
    }

    #[test]
    fn test_run_until_without_conditions_is_run() {
        let mut net = Network::new(0.1);
        let id = net.add_population(RatePopulation::new("plain", 3));
        assert_eq!(net.run_until(7, &[id], StopMode::Any), 7);
        assert_eq!(net.time(), 7);
    }

    fn single_weight_network(weight: f64) -> Network {
        let mut net = Network::new(1.0);
        let pre = net.add_population(RatePopulation::new("pre", 10));
        let post = net.add_population(RatePopulation::new("post", 10));
        net.population_mut(pre).unwrap().set_variable("r", Array1::ones(10)).unwrap();
        let post_ranks: Vec<usize> = (0..10).collect();
        let pre_ranks: Vec<Vec<usize>> = (0..10).map(|n| (0..=n).collect()).collect();
        let proj = RateProjection::single_weight(pre, post, "exc", post_ranks, pre_ranks, weight).unwrap();
        net.add_projection(proj).unwrap();
        net
    }

    #[test]
    fn test_single_weight_shared_by_every_dendrite() {
        let mut net = single_weight_network(0.5);
        net.step();
        let expected: Vec<f64> = (1..=10).map(|n| 0.5 * n as f64).collect();
        assert_eq!(net.population(1).unwrap().sum("exc").unwrap().to_vec(), expected);

        net.projection_mut(0).unwrap().set_single_weight(1.0).unwrap();
        net.step();
        let doubled: Vec<f64> = expected.iter().map(|v| v * 2.0).collect();
        assert_eq!(net.population(1).unwrap().sum("exc").unwrap().to_vec(), doubled);
    }

    #[test]
    fn test_per_synapse_weights_and_recording() {
        let mut net = Network::new(1.0);
        let pre = net.add_population(RatePopulation::new("pre", 2));
        let post = net.add_population(RatePopulation::new("post", 1).with_update(|state| {
            let input = state.sums["exc"].clone();
            state.variables.insert("r".into(), input);
        }));
        net.population_mut(pre).unwrap().set_variable("r", Array1::from(vec![1.0, 2.0])).unwrap();

        let conn = LilMatrix::from_lil(vec![0], vec![vec![0, 1]]).unwrap();
        let mut w = init_variable(&conn, 0.0);
        set_variable_all(&conn, &mut w, &[vec![0.25, 0.5]]).unwrap();
        let proj = RateProjection::new(pre, post, "exc", Box::new(conn), Weights::PerSynapse(w)).unwrap();
        net.add_projection(proj).unwrap();
        let rec = net.add_recorder(post, Recorder::new(vec![], 1, 0)).unwrap();
        net.recorder_mut(rec).unwrap().record_variable("r");

        net.run(2);
        assert_eq!(net.recorder(rec).unwrap().variable("r").unwrap(), &[vec![1.25], vec![1.25]]);
        assert!(net.projection_mut(0).unwrap().set_single_weight(1.0).is_err());
    }

    #[test]
    fn test_ranks_checked_against_populations() {
        let mut net = Network::new(1.0);
        let pre = net.add_population(RatePopulation::new("pre", 2));
        let post = net.add_population(RatePopulation::new("post", 2));
        let proj = RateProjection::single_weight(pre, post, "exc", vec![5], vec![vec![0]], 1.0).unwrap();
        assert!(matches!(net.add_projection(proj), Err(RuntimeError::OutOfRange(_))));
        let dangling = RateProjection::single_weight(pre, 9, "exc", vec![0], vec![vec![0]], 1.0).unwrap();
        assert_eq!(net.add_projection(dangling).unwrap_err(), RuntimeError::UnknownPopulation(9));
    }
}
