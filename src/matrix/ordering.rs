//! Bandwidth-reducing orderings (reverse Cuthill–McKee).
//! See Saad §3.3 for background.

use std::collections::VecDeque;

use crate::core::traits::Scalar;
use crate::error::EqError;
use crate::matrix::permutation::Permutation;
use crate::matrix::sparse::SparseMatrix;

/// Extract the symmetrised adjacency of the leading `m`×`m` block:
/// adj[i] = { j < m | A[i,j] ≠ 0 or A[j,i] ≠ 0 }, sorted.
pub fn extract_adjacency<T: Scalar>(a: &SparseMatrix<T>, m: usize) -> Vec<Vec<usize>> {
    let mut adj = vec![Vec::new(); m];
    for i in 0..m {
        for (j, v) in a.row(i) {
            if j < m && v != T::zero() {
                adj[i].push(j);
                adj[j].push(i);
            }
        }
    }
    for list in &mut adj {
        list.sort_unstable();
        list.dedup();
    }
    adj
}

/// Cuthill–McKee visit order over all connected components; each component
/// starts at its lowest-degree unvisited node and neighbours are queued by
/// increasing degree.
pub fn cuthill_mckee(adj: &[Vec<usize>]) -> Vec<usize> {
    let n = adj.len();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut by_degree: Vec<usize> = (0..n).collect();
    by_degree.sort_by_key(|&i| (adj[i].len(), i));

    let mut queue = VecDeque::new();
    let mut neighbours = Vec::new();
    for &start in &by_degree {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);
        while let Some(node) = queue.pop_front() {
            order.push(node);
            neighbours.clear();
            neighbours.extend(adj[node].iter().copied().filter(|&j| !visited[j]));
            neighbours.sort_by_key(|&j| (adj[j].len(), j));
            for &j in &neighbours {
                visited[j] = true;
                queue.push_back(j);
            }
        }
    }
    order
}

/// Reverse Cuthill–McKee permutation of the leading `m` rows of `a`; rows
/// `m..n` keep their positions.
pub fn reverse_cuthill_mckee<T: Scalar>(
    a: &SparseMatrix<T>,
    m: usize,
) -> Result<Permutation, EqError> {
    let n = a.dim();
    if m > n {
        return Err(EqError::out_of_range("block size", m, n + 1));
    }
    let adj = extract_adjacency(a, m);
    let mut perm = cuthill_mckee(&adj);
    perm.reverse();
    perm.extend(m..n);
    Permutation::from_vec(perm)
}
