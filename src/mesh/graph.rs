//! Compressed vertex to element connectivity
use crate::Idx;

/// CSR representation of a graph
#[derive(Debug, Default, Clone)]
pub struct CSRGraph {
    ptr: Vec<usize>,
    indices: Vec<usize>,
}

impl CSRGraph {
    fn from_pairs(n: usize, pairs: &[(usize, usize)]) -> Self {
        let mut ptr = vec![0; n + 1];
        for &(i, _) in pairs {
            ptr[i + 1] += 1;
        }
        for i in 0..n {
            ptr[i + 1] += ptr[i];
        }
        let mut next = ptr.clone();
        let mut indices = vec![0; pairs.len()];
        for &(i, j) in pairs {
            indices[next[i]] = j;
            next[i] += 1;
        }
        let mut res = Self { ptr, indices };
        res.sort();
        res
    }

    fn sort(&mut self) {
        for i in 0..self.n() {
            let (start, end) = (self.ptr[i], self.ptr[i + 1]);
            self.indices[start..end].sort_unstable();
        }
    }

    /// Compute the vertex to element connectivity from an element to vertex connectivity
    #[must_use]
    pub fn transpose<const N: usize>(elems: &[[Idx; N]], n_verts: usize) -> Self {
        let pairs = elems
            .iter()
            .enumerate()
            .flat_map(|(i, e)| e.iter().map(move |&v| (v as usize, i)))
            .collect::<Vec<_>>();
        Self::from_pairs(n_verts, &pairs)
    }

    /// Number of vertices
    #[must_use]
    pub fn n(&self) -> usize {
        self.ptr.len() - 1
    }

    /// Get the neighbors of the `i`th vertex
    #[must_use]
    pub fn row(&self, i: usize) -> &[usize] {
        &self.indices[self.ptr[i]..self.ptr[i + 1]]
    }
}
