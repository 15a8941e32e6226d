//! Host/device synchronization.
//!
//! Attributes live on the host and are mirrored on the device. A setter
//! marks the host copy dirty; the next transfer uploads dirty attributes
//! only and marks them clean again. Only one side writes between two
//! transfers.

use serde::{Deserialize, Serialize};
use tracing::trace;

/// State of one host attribute with respect to its device copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DirtyFlag {
    #[default]
    Clean,
    Dirty,
}

impl DirtyFlag {
    /// Host copy changed
    pub fn mark(&mut self) {
        *self = DirtyFlag::Dirty;
    }

    /// Transfer done. Returns whether one was needed.
    pub fn sync(&mut self) -> bool {
        let needed = *self == DirtyFlag::Dirty;
        *self = DirtyFlag::Clean;
        needed
    }

    pub fn is_dirty(&self) -> bool {
        *self == DirtyFlag::Dirty
    }
}

/// Attribute held on the host with a lazily updated device copy
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMirror<T> {
    host: Vec<T>,
    device: Vec<T>,
    flag: DirtyFlag,
    uploads: usize,
}

impl<T: Clone + num_traits::Zero> DeviceMirror<T> {
    /// Both copies zeroed, as `cudaMemset` leaves freshly allocated memory
    pub fn zeros(size: usize) -> Self {
        Self {
            host: vec![T::zero(); size],
            device: vec![T::zero(); size],
            flag: DirtyFlag::Clean,
            uploads: 0,
        }
    }
}

impl<T: Clone> DeviceMirror<T> {
    pub fn new(values: Vec<T>) -> Self {
        Self {
            device: values.clone(),
            host: values,
            flag: DirtyFlag::Clean,
            uploads: 0,
        }
    }

    pub fn host(&self) -> &[T] {
        &self.host
    }

    pub fn device(&self) -> &[T] {
        &self.device
    }

    pub fn flag(&self) -> DirtyFlag {
        self.flag
    }

    /// Number of transfers actually performed
    pub fn uploads(&self) -> usize {
        self.uploads
    }

    pub fn set(&mut self, values: Vec<T>) {
        self.host = values;
        self.flag.mark();
    }

    pub fn set_single(&mut self, rank: usize, value: T) -> bool {
        match self.host.get_mut(rank) {
            Some(slot) => {
                *slot = value;
                self.flag.mark();
                true
            }
            None => false,
        }
    }

    /// Upload when the host copy changed since the last transfer
    pub fn host_to_device(&mut self) {
        if self.flag.sync() {
            self.device = self.host.clone();
            self.uploads += 1;
            trace!(uploads = self.uploads, "uploaded attribute");
        }
    }

    /// Device results back to the host, after kernels wrote them
    pub fn device_to_host(&mut self) {
        self.host = self.device.clone();
    }

    /// Write access to the device copy, standing in for a kernel
    pub fn device_mut(&mut self) -> &mut [T] {
        &mut self.device
    }
}

/// Grid of a one-thread-per-row kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub threads_per_block: u32,
    pub nb_blocks: u32,
}

impl LaunchConfig {
    /// Enough blocks to cover `rows`, capped at `max_blocks`. Rows beyond
    /// the grid are processed by the kernels' grid-stride loops.
    pub fn for_rows(rows: usize, threads_per_block: u32, max_blocks: u32) -> Self {
        let tpb = threads_per_block.max(1) as usize;
        let blocks = rows.div_ceil(tpb).min(max_blocks as usize);
        Self {
            threads_per_block,
            nb_blocks: blocks as u32,
        }
    }

    pub fn threads(&self) -> usize {
        self.threads_per_block as usize * self.nb_blocks as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_flag_transitions() {
        let mut flag = DirtyFlag::default();
        assert!(!flag.sync());
        flag.mark();
        assert!(flag.is_dirty());
        assert!(flag.sync());
        assert_eq!(flag, DirtyFlag::Clean);
        assert!(!flag.sync());
    }

    #[test]
    fn test_upload_only_when_dirty() {
        let mut r = DeviceMirror::<f64>::zeros(3);
        r.host_to_device();
        assert_eq!(r.uploads(), 0);

        r.set_single(1, 2.0);
        r.set_single(2, 3.0);
        assert_eq!(r.device(), &[0.0, 0.0, 0.0]);
        r.host_to_device();
        r.host_to_device();
        assert_eq!(r.uploads(), 1);
        assert_eq!(r.device(), &[0.0, 2.0, 3.0]);
        assert!(!r.set_single(5, 1.0));
    }

    #[test]
    fn test_device_results_reach_host() {
        let mut r = DeviceMirror::new(vec![1.0, 1.0]);
        r.device_mut()[0] = 4.0;
        r.device_to_host();
        assert_eq!(r.host(), &[4.0, 1.0]);
        assert_eq!(r.flag(), DirtyFlag::Clean);
    }

    #[test]
    fn test_launch_config_capped() {
        assert_eq!(
            LaunchConfig::for_rows(100, 32, 65535),
            LaunchConfig {
                threads_per_block: 32,
                nb_blocks: 4
            }
        );
        assert_eq!(LaunchConfig::for_rows(1 << 20, 32, 8).nb_blocks, 8);
        assert_eq!(LaunchConfig::for_rows(0, 32, 8).nb_blocks, 0);
        assert_eq!(LaunchConfig::for_rows(64, 32, 8).threads(), 64);
    }
}
