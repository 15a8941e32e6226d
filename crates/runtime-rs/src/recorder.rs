//! Monitors.
//!
//! A recorder samples the variables it was asked for when
//! `(t - offset) % period == 0` and collects spike times at every step.
//! Without ranks it observes the whole population.

use std::collections::BTreeMap;

use ndarray::Array1;

#[derive(Debug, Clone, PartialEq)]
pub struct Recorder {
    ranks: Vec<usize>,
    partial: bool,
    period: i64,
    offset: i64,
    variables: BTreeMap<String, Vec<Vec<f64>>>,
    spikes: Option<BTreeMap<usize, Vec<i64>>>,
}

impl Recorder {
    /// `ranks` empty records every neuron. A period below one samples
    /// every step.
    pub fn new(ranks: Vec<usize>, period: i64, offset: i64) -> Self {
        Self {
            partial: !ranks.is_empty(),
            ranks,
            period: period.max(1),
            offset,
            variables: BTreeMap::new(),
            spikes: None,
        }
    }

    pub fn record_variable(&mut self, name: &str) {
        self.variables.entry(name.to_string()).or_default();
    }

    /// Start collecting spike times; in partial mode only for the
    /// selected ranks
    pub fn record_spikes(&mut self) {
        let mut spikes = BTreeMap::new();
        if self.partial {
            for &rank in &self.ranks {
                spikes.insert(rank, Vec::new());
            }
        }
        self.spikes = Some(spikes);
    }

    pub fn record(&mut self, t: i64, state: &BTreeMap<String, Array1<f64>>, spiked: &[usize]) {
        if let Some(spikes) = self.spikes.as_mut() {
            for &rank in spiked {
                if self.partial {
                    if let Some(times) = spikes.get_mut(&rank) {
                        times.push(t);
                    }
                } else {
                    spikes.entry(rank).or_default().push(t);
                }
            }
        }

        if (t - self.offset).rem_euclid(self.period) != 0 {
            return;
        }
        for (name, samples) in self.variables.iter_mut() {
            let Some(values) = state.get(name) else {
                continue;
            };
            let sample = if self.partial {
                self.ranks.iter().filter_map(|&r| values.get(r).copied()).collect()
            } else {
                values.to_vec()
            };
            samples.push(sample);
        }
    }

    pub fn variable(&self, name: &str) -> Option<&[Vec<f64>]> {
        self.variables.get(name).map(Vec::as_slice)
    }

    pub fn spikes(&self) -> Option<&BTreeMap<usize, Vec<i64>>> {
        self.spikes.as_ref()
    }

    pub fn size_in_bytes(&self) -> usize {
        let samples: usize = self
            .variables
            .values()
            .flat_map(|v| v.iter().map(Vec::len))
            .sum();
        let spikes: usize = self.spikes.iter().flat_map(|s| s.values().map(Vec::len)).sum();
        samples * std::mem::size_of::<f64>() + spikes * std::mem::size_of::<i64>()
    }

    /// Drop collected data, keeping what is recorded
    pub fn clear(&mut self) {
        for samples in self.variables.values_mut() {
            samples.clear();
        }
        if let Some(spikes) = self.spikes.as_mut() {
            for times in spikes.values_mut() {
                times.clear();
            }
        }
    }
}
