//! Connectivity storage.
//!
//! Every format stores per-synapse variables in one flat array addressed
//! through [`Connectivity::slot`]; the variable helpers translate between that
//! array and the list-of-lists shape exchanged with callers.

use serde::{Deserialize, Serialize};

use crate::{Result, RuntimeError};

/// Column index of an unused ELL slot
pub const PADDING: usize = usize::MAX;

pub trait Connectivity {
    /// Build from post-synaptic ranks and one pre-synaptic rank list per
    /// dendrite
    fn from_lil(post_ranks: Vec<usize>, pre_ranks: Vec<Vec<usize>>) -> Result<Self>
    where
        Self: Sized;

    fn post_ranks(&self) -> &[usize];

    fn pre_ranks(&self, dendrite: usize) -> Vec<usize>;

    fn dendrite_size(&self, dendrite: usize) -> usize;

    /// Position of synapse `k` of `dendrite` in flat variable storage
    fn slot(&self, dendrite: usize, k: usize) -> usize;

    /// Length of flat variable storage, padding included
    fn nb_slots(&self) -> usize;

    fn nb_dendrites(&self) -> usize {
        self.post_ranks().len()
    }

    fn nb_synapses(&self) -> usize {
        (0..self.nb_dendrites()).map(|n| self.dendrite_size(n)).sum()
    }

    fn dendrite_index(&self, rk_post: usize) -> Option<usize> {
        self.post_ranks().iter().position(|&r| r == rk_post)
    }

    fn all_pre_ranks(&self) -> Vec<Vec<usize>> {
        (0..self.nb_dendrites()).map(|n| self.pre_ranks(n)).collect()
    }
}

fn check_lil(post_ranks: &[usize], pre_ranks: &[Vec<usize>]) -> Result<()> {
    if post_ranks.len() != pre_ranks.len() {
        return Err(RuntimeError::Inconsistent(format!(
            "{} post-synaptic ranks but {} pre-synaptic rank lists",
            post_ranks.len(),
            pre_ranks.len()
        )));
    }
    if pre_ranks.iter().flatten().any(|&r| r == PADDING) {
        return Err(RuntimeError::Inconsistent("pre-synaptic rank out of range".into()));
    }
    Ok(())
}

/// Flat storage must hold exactly one value per slot
fn check_storage<C: Connectivity + ?Sized>(conn: &C, len: usize) -> Result<()> {
    if len != conn.nb_slots() {
        return Err(RuntimeError::Inconsistent(format!(
            "variable holds {} values for {} synapse slots",
            len,
            conn.nb_slots()
        )));
    }
    Ok(())
}

fn check_dendrite<C: Connectivity + ?Sized>(conn: &C, dendrite: usize) -> Result<()> {
    if dendrite >= conn.nb_dendrites() {
        return Err(RuntimeError::OutOfRange(format!(
            "dendrite {} of {}",
            dendrite,
            conn.nb_dendrites()
        )));
    }
    Ok(())
}

fn check_synapse<C: Connectivity + ?Sized>(conn: &C, dendrite: usize, k: usize) -> Result<()> {
    check_dendrite(conn, dendrite)?;
    if k >= conn.dendrite_size(dendrite) {
        return Err(RuntimeError::OutOfRange(format!(
            "synapse {} of dendrite {} ({} synapses)",
            k,
            dendrite,
            conn.dendrite_size(dendrite)
        )));
    }
    Ok(())
}

// ============================================================================
// VARIABLE HELPERS
// ============================================================================

/// Flat storage for one per-synapse variable, every slot set to `value`
pub fn init_variable<C: Connectivity + ?Sized, T: Copy>(conn: &C, value: T) -> Vec<T> {
    vec![value; conn.nb_slots()]
}

pub fn variable_all<C: Connectivity + ?Sized, T: Copy>(conn: &C, variable: &[T]) -> Result<Vec<Vec<T>>> {
    check_storage(conn, variable.len())?;
    Ok((0..conn.nb_dendrites())
        .map(|n| row(conn, variable, n))
        .collect())
}

fn row<C: Connectivity + ?Sized, T: Copy>(conn: &C, variable: &[T], n: usize) -> Vec<T> {
    (0..conn.dendrite_size(n))
        .map(|k| variable[conn.slot(n, k)])
        .collect()
}

pub fn variable_row<C: Connectivity + ?Sized, T: Copy>(conn: &C, variable: &[T], dendrite: usize) -> Result<Vec<T>> {
    check_storage(conn, variable.len())?;
    check_dendrite(conn, dendrite)?;
    Ok(row(conn, variable, dendrite))
}

pub fn variable_at<C: Connectivity + ?Sized, T: Copy>(
    conn: &C,
    variable: &[T],
    dendrite: usize,
    k: usize,
) -> Result<T> {
    check_storage(conn, variable.len())?;
    check_synapse(conn, dendrite, k)?;
    Ok(variable[conn.slot(dendrite, k)])
}

/// Overwrite a whole variable. The shape of `values` must match the
/// connectivity exactly.
pub fn set_variable_all<C: Connectivity + ?Sized, T: Copy>(
    conn: &C,
    variable: &mut [T],
    values: &[Vec<T>],
) -> Result<()> {
    check_storage(conn, variable.len())?;
    if values.len() != conn.nb_dendrites() {
        return Err(RuntimeError::Inconsistent(format!(
            "{} value rows for {} dendrites",
            values.len(),
            conn.nb_dendrites()
        )));
    }
    for (n, v) in values.iter().enumerate() {
        set_variable_row(conn, variable, n, v)?;
    }
    Ok(())
}

pub fn set_variable_row<C: Connectivity + ?Sized, T: Copy>(
    conn: &C,
    variable: &mut [T],
    dendrite: usize,
    values: &[T],
) -> Result<()> {
    check_storage(conn, variable.len())?;
    check_dendrite(conn, dendrite)?;
    if values.len() != conn.dendrite_size(dendrite) {
        return Err(RuntimeError::Inconsistent(format!(
            "{} values for dendrite {} of size {}",
            values.len(),
            dendrite,
            conn.dendrite_size(dendrite)
        )));
    }
    for (k, &value) in values.iter().enumerate() {
        variable[conn.slot(dendrite, k)] = value;
    }
    Ok(())
}

pub fn set_variable_at<C: Connectivity + ?Sized, T: Copy>(
    conn: &C,
    variable: &mut [T],
    dendrite: usize,
    k: usize,
    value: T,
) -> Result<()> {
    check_storage(conn, variable.len())?;
    check_synapse(conn, dendrite, k)?;
    variable[conn.slot(dendrite, k)] = value;
    Ok(())
}

// ============================================================================
// LIL
// ============================================================================

/// List of lists, rows kept in the order given
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LilMatrix {
    post_ranks: Vec<usize>,
    pre_ranks: Vec<Vec<usize>>,
    offsets: Vec<usize>,
}

fn offsets(pre_ranks: &[Vec<usize>]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(pre_ranks.len() + 1);
    offsets.push(0);
    for row in pre_ranks {
        offsets.push(offsets[offsets.len() - 1] + row.len());
    }
    offsets
}

impl Connectivity for LilMatrix {
    fn from_lil(post_ranks: Vec<usize>, pre_ranks: Vec<Vec<usize>>) -> Result<Self> {
        check_lil(&post_ranks, &pre_ranks)?;
        let offsets = offsets(&pre_ranks);
        Ok(Self {
            post_ranks,
            pre_ranks,
            offsets,
        })
    }

    fn post_ranks(&self) -> &[usize] {
        &self.post_ranks
    }

    fn pre_ranks(&self, dendrite: usize) -> Vec<usize> {
        self.pre_ranks.get(dendrite).cloned().unwrap_or_default()
    }

    fn dendrite_size(&self, dendrite: usize) -> usize {
        self.pre_ranks.get(dendrite).map_or(0, Vec::len)
    }

    fn slot(&self, dendrite: usize, k: usize) -> usize {
        self.offsets[dendrite] + k
    }

    fn nb_slots(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }
}

// ============================================================================
// CSR
// ============================================================================

/// Compressed sparse rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrMatrix {
    post_ranks: Vec<usize>,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
}

impl Connectivity for CsrMatrix {
    fn from_lil(post_ranks: Vec<usize>, pre_ranks: Vec<Vec<usize>>) -> Result<Self> {
        check_lil(&post_ranks, &pre_ranks)?;
        let row_ptr = offsets(&pre_ranks);
        let col_idx = pre_ranks.into_iter().flatten().collect();
        Ok(Self {
            post_ranks,
            row_ptr,
            col_idx,
        })
    }

    fn post_ranks(&self) -> &[usize] {
        &self.post_ranks
    }

    fn pre_ranks(&self, dendrite: usize) -> Vec<usize> {
        if dendrite >= self.post_ranks.len() {
            return Vec::new();
        }
        self.col_idx[self.row_ptr[dendrite]..self.row_ptr[dendrite + 1]].to_vec()
    }

    fn dendrite_size(&self, dendrite: usize) -> usize {
        if dendrite >= self.post_ranks.len() {
            return 0;
        }
        self.row_ptr[dendrite + 1] - self.row_ptr[dendrite]
    }

    fn slot(&self, dendrite: usize, k: usize) -> usize {
        self.row_ptr[dendrite] + k
    }

    fn nb_slots(&self) -> usize {
        self.col_idx.len()
    }

    fn nb_synapses(&self) -> usize {
        self.col_idx.len()
    }
}

// ============================================================================
// ELL
// ============================================================================

/// ELLPACK: rows padded to the longest, row-major
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EllMatrix {
    post_ranks: Vec<usize>,
    col_idx: Vec<usize>,
    maxnzr: usize,
}

fn max_row(pre_ranks: &[Vec<usize>]) -> usize {
    pre_ranks.iter().map(Vec::len).max().unwrap_or(0)
}

impl Connectivity for EllMatrix {
    fn from_lil(post_ranks: Vec<usize>, pre_ranks: Vec<Vec<usize>>) -> Result<Self> {
        check_lil(&post_ranks, &pre_ranks)?;
        let maxnzr = max_row(&pre_ranks);
        let mut col_idx = vec![PADDING; post_ranks.len() * maxnzr];
        for (n, row) in pre_ranks.iter().enumerate() {
            col_idx[n * maxnzr..n * maxnzr + row.len()].copy_from_slice(row);
        }
        Ok(Self {
            post_ranks,
            col_idx,
            maxnzr,
        })
    }

    fn post_ranks(&self) -> &[usize] {
        &self.post_ranks
    }

    fn pre_ranks(&self, dendrite: usize) -> Vec<usize> {
        if dendrite >= self.post_ranks.len() {
            return Vec::new();
        }
        self.col_idx[dendrite * self.maxnzr..(dendrite + 1) * self.maxnzr]
            .iter()
            .copied()
            .take_while(|&r| r != PADDING)
            .collect()
    }

    fn dendrite_size(&self, dendrite: usize) -> usize {
        self.pre_ranks(dendrite).len()
    }

    fn slot(&self, dendrite: usize, k: usize) -> usize {
        dendrite * self.maxnzr + k
    }

    fn nb_slots(&self) -> usize {
        self.col_idx.len()
    }

    fn nb_synapses(&self) -> usize {
        self.col_idx.iter().filter(|&&r| r != PADDING).count()
    }
}

// ============================================================================
// ELL-R
// ============================================================================

/// ELLPACK-R: padded like ELL, column-major, explicit row lengths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EllRMatrix {
    post_ranks: Vec<usize>,
    col_idx: Vec<usize>,
    rl: Vec<usize>,
    maxnzr: usize,
}

impl Connectivity for EllRMatrix {
    fn from_lil(post_ranks: Vec<usize>, pre_ranks: Vec<Vec<usize>>) -> Result<Self> {
        check_lil(&post_ranks, &pre_ranks)?;
        let maxnzr = max_row(&pre_ranks);
        let nb_post = post_ranks.len();
        let mut col_idx = vec![PADDING; nb_post * maxnzr];
        for (n, row) in pre_ranks.iter().enumerate() {
            for (k, &rk_pre) in row.iter().enumerate() {
                col_idx[k * nb_post + n] = rk_pre;
            }
        }
        Ok(Self {
            post_ranks,
            col_idx,
            rl: pre_ranks.iter().map(Vec::len).collect(),
            maxnzr,
        })
    }

    fn post_ranks(&self) -> &[usize] {
        &self.post_ranks
    }

    fn pre_ranks(&self, dendrite: usize) -> Vec<usize> {
        (0..self.dendrite_size(dendrite))
            .map(|k| self.col_idx[self.slot(dendrite, k)])
            .collect()
    }

    fn dendrite_size(&self, dendrite: usize) -> usize {
        self.rl.get(dendrite).copied().unwrap_or(0)
    }

    fn slot(&self, dendrite: usize, k: usize) -> usize {
        k * self.post_ranks.len() + dendrite
    }

    fn nb_slots(&self) -> usize {
        self.col_idx.len()
    }

    fn nb_synapses(&self) -> usize {
        self.rl.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges() -> (Vec<usize>, Vec<Vec<usize>>) {
        (vec![4, 0, 7], vec![vec![1, 3, 2], vec![], vec![5]])
    }

    fn read_back<C: Connectivity>() -> (Vec<usize>, Vec<Vec<usize>>) {
        let (post, pre) = edges();
        let conn = C::from_lil(post, pre).unwrap();
        (conn.post_ranks().to_vec(), conn.all_pre_ranks())
    }

    #[test]
    fn test_edge_list_read_back_every_format() {
        let expected = edges();
        assert_eq!(read_back::<LilMatrix>(), expected);
        assert_eq!(read_back::<CsrMatrix>(), expected);
        assert_eq!(read_back::<EllMatrix>(), expected);
        assert_eq!(read_back::<EllRMatrix>(), expected);
    }

    #[test]
    fn test_counts_ignore_padding() {
        let (post, pre) = edges();
        let ell = EllMatrix::from_lil(post.clone(), pre.clone()).unwrap();
        assert_eq!(ell.nb_slots(), 9);
        assert_eq!(ell.nb_synapses(), 4);
        assert_eq!(ell.dendrite_size(1), 0);

        let ellr = EllRMatrix::from_lil(post, pre).unwrap();
        assert_eq!(ellr.nb_synapses(), 4);
        // Column-major: the second synapse of dendrite 0 follows the first
        // synapse of every dendrite
        assert_eq!(ellr.slot(0, 1), 3);
    }

    #[test]
    fn test_weight_round_trip() {
        let conn = LilMatrix::from_lil(vec![0, 1], vec![vec![0, 1], vec![0]]).unwrap();
        let mut w = init_variable(&conn, 0.0f32);
        set_variable_all(&conn, &mut w, &[vec![0.1, 0.2], vec![0.3]]).unwrap();
        assert_eq!(variable_all(&conn, &w).unwrap(), vec![vec![0.1f32, 0.2], vec![0.3]]);
        assert_eq!(variable_row(&conn, &w, 1).unwrap(), vec![0.3f32]);
        assert_eq!(variable_at(&conn, &w, 0, 1).unwrap(), 0.2f32);
    }

    #[test]
    fn test_round_trip_through_padded_storage() {
        let conn = EllRMatrix::from_lil(vec![0, 1], vec![vec![0, 1], vec![0]]).unwrap();
        let mut w = init_variable(&conn, 0.0);
        set_variable_all(&conn, &mut w, &[vec![0.1, 0.2], vec![0.3]]).unwrap();
        set_variable_at(&conn, &mut w, 1, 0, 0.4).unwrap();
        assert_eq!(variable_all(&conn, &w).unwrap(), vec![vec![0.1, 0.2], vec![0.4]]);
    }

    #[test]
    fn test_shape_mismatch_is_inconsistent() {
        let conn = CsrMatrix::from_lil(vec![0, 1], vec![vec![0, 1], vec![0]]).unwrap();
        let mut w = init_variable(&conn, 0.0);
        assert!(matches!(
            set_variable_all(&conn, &mut w, &[vec![0.1], vec![0.3]]),
            Err(RuntimeError::Inconsistent(_))
        ));
        assert!(matches!(
            variable_at(&conn, &w, 1, 1),
            Err(RuntimeError::OutOfRange(_))
        ));
        assert!(matches!(
            LilMatrix::from_lil(vec![0], vec![]),
            Err(RuntimeError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_wrong_storage_length_is_inconsistent() {
        let conn = EllMatrix::from_lil(vec![0, 1], vec![vec![0, 1], vec![0]]).unwrap();
        // Padded storage has 4 slots, the synapse count is 3
        let mut short = vec![0.0; conn.nb_synapses()];
        assert!(matches!(variable_all(&conn, &short), Err(RuntimeError::Inconsistent(_))));
        assert!(matches!(variable_row(&conn, &short, 1), Err(RuntimeError::Inconsistent(_))));
        assert!(matches!(variable_at(&conn, &short, 1, 0), Err(RuntimeError::Inconsistent(_))));
        assert!(matches!(
            set_variable_row(&conn, &mut short, 1, &[1.0]),
            Err(RuntimeError::Inconsistent(_))
        ));
        assert!(matches!(
            set_variable_at(&conn, &mut short, 1, 0, 1.0),
            Err(RuntimeError::Inconsistent(_))
        ));
        assert!(variable_at(&conn, &init_variable(&conn, 2.0), 1, 0).is_ok());
    }

    #[test]
    fn test_empty_connectivity() {
        let conn = EllMatrix::from_lil(vec![], vec![]).unwrap();
        assert_eq!(conn.nb_dendrites(), 0);
        assert_eq!(conn.nb_synapses(), 0);
        assert!(variable_all(&conn, &init_variable(&conn, 1.0)).unwrap().is_empty());
        assert_eq!(conn.dendrite_index(3), None);
    }

    #[test]
    fn test_serialized_layout() {
        let conn = CsrMatrix::from_lil(vec![2], vec![vec![0, 1]]).unwrap();
        let json = serde_json::to_value(&conn).unwrap();
        assert_eq!(json["row_ptr"], serde_json::json!([0, 2]));
        assert_eq!(json["col_idx"], serde_json::json!([0, 1]));
    }
}
