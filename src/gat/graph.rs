//! Graph connectivity representations.
//!
//! The attention layers accept connectivity in one of two encodings:
//!
//! - [`EdgeList`]: COO-style parallel source/target index arrays, one entry
//!   per directed edge. Linear in the number of edges; the representation the
//!   sparse layer variants operate on.
//! - [`ConnectivityMask`]: a square additive mask, `0.0` where an edge
//!   permits attention, negative infinity where it doesn't. Quadratic in the
//!   number of nodes; the representation the dense layer variants operate on.
//!
//! [`Connectivity`] wraps both so a layer stack can thread whichever encoding
//! it was given. The two encodings of the same graph produce numerically
//! equivalent attention (see the crate tests).

use crate::error::{AtenderError, Result};
use crate::tensor::Tensor;

/// Sparse edge-list connectivity (COO format).
///
/// Stores one `(source, target)` index pair per directed edge. A directed
/// edge `s -> t` means target node `t` may attend to source node `s`.
/// Self-loops are ordinary `(i, i)` entries and are NOT implied; use
/// [`with_self_loops`](EdgeList::with_self_loops) to add them.
///
/// # Example
///
/// ```
/// use atender::gat::EdgeList;
///
/// let edges = EdgeList::from_edge_index(&[[0, 1], [1, 2], [2, 0]], 3);
/// assert_eq!(edges.num_nodes(), 3);
/// assert_eq!(edges.num_edges(), 3);
///
/// let edges = edges.with_self_loops();
/// assert_eq!(edges.num_edges(), 6);
/// ```
#[derive(Debug, Clone)]
pub struct EdgeList {
    /// Edge sources
    source: Vec<usize>,
    /// Edge targets
    target: Vec<usize>,
    /// Number of nodes
    num_nodes: usize,
    /// Whether self-loops were added through the builder
    has_self_loops: bool,
}

impl EdgeList {
    /// Create an edge list from `[source, target]` pairs.
    #[must_use]
    pub fn from_edge_index(edges: &[[usize; 2]], num_nodes: usize) -> Self {
        let source: Vec<usize> = edges.iter().map(|e| e[0]).collect();
        let target: Vec<usize> = edges.iter().map(|e| e[1]).collect();

        Self {
            source,
            target,
            num_nodes,
            has_self_loops: false,
        }
    }

    /// Create an edge list from separate source and target index vectors.
    ///
    /// # Panics
    ///
    /// Panics if the vectors have different lengths.
    #[must_use]
    pub fn from_coo(source: Vec<usize>, target: Vec<usize>, num_nodes: usize) -> Self {
        assert_eq!(
            source.len(),
            target.len(),
            "Edge index vectors must have equal length: {} vs {}",
            source.len(),
            target.len()
        );

        Self {
            source,
            target,
            num_nodes,
            has_self_loops: false,
        }
    }

    /// Append a self-loop edge `(i, i)` for every node.
    ///
    /// Idempotent: calling twice adds the loops once.
    #[must_use]
    pub fn with_self_loops(mut self) -> Self {
        if self.has_self_loops {
            return self;
        }

        for i in 0..self.num_nodes {
            self.source.push(i);
            self.target.push(i);
        }

        self.has_self_loops = true;
        self
    }

    /// Get number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Get number of edges.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.source.len()
    }

    /// Get edge sources.
    #[must_use]
    pub fn source(&self) -> &[usize] {
        &self.source
    }

    /// Get edge targets.
    #[must_use]
    pub fn target(&self) -> &[usize] {
        &self.target
    }

    /// Check if self-loops were added through the builder.
    #[must_use]
    pub fn has_self_loops(&self) -> bool {
        self.has_self_loops
    }

    /// Compute in-degree of each node (number of incoming edges).
    #[must_use]
    pub fn in_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0usize; self.num_nodes];
        for &tgt in &self.target {
            if tgt < self.num_nodes {
                degrees[tgt] += 1;
            }
        }
        degrees
    }

    /// Validate the edge list against a node feature matrix with
    /// `num_nodes` rows.
    ///
    /// # Errors
    ///
    /// Returns [`AtenderError::ShapeMismatch`] if the node counts disagree or
    /// an edge index falls outside `[0, num_nodes)`.
    pub fn validate(&self, num_nodes: usize) -> Result<()> {
        if self.num_nodes != num_nodes {
            return Err(AtenderError::shape_mismatch(
                format!("edge list over {num_nodes} nodes"),
                format!("edge list over {} nodes", self.num_nodes),
            ));
        }

        for (&src, &tgt) in self.source.iter().zip(self.target.iter()) {
            if src >= num_nodes || tgt >= num_nodes {
                return Err(AtenderError::shape_mismatch(
                    format!("edge indices in [0, {num_nodes})"),
                    format!("edge ({src}, {tgt})"),
                ));
            }
        }

        Ok(())
    }
}

/// Dense additive connectivity mask.
///
/// A square `[N, N]` tensor where entry `(i, j)` is `0.0` if target node `i`
/// may attend to source node `j` (a directed edge `j -> i` exists) and
/// negative infinity otherwise. Added to raw attention scores before the
/// softmax, it zeroes the contribution of non-edges since `exp(-inf) = 0`.
#[derive(Debug, Clone)]
pub struct ConnectivityMask {
    mask: Tensor,
}

impl ConnectivityMask {
    /// Wrap an existing mask tensor.
    ///
    /// # Errors
    ///
    /// Returns [`AtenderError::ShapeMismatch`] unless the tensor is square
    /// and 2-D.
    pub fn new(mask: Tensor) -> Result<Self> {
        if mask.ndim() != 2 || mask.shape()[0] != mask.shape()[1] {
            return Err(AtenderError::shape_mismatch(
                "square (N, N) connectivity mask",
                format!("{:?}", mask.shape()),
            ));
        }
        Ok(Self { mask })
    }

    /// Build the dense mask equivalent to an edge list.
    ///
    /// Entry `(target, source)` becomes `0.0` for every edge; everything
    /// else stays at negative infinity.
    #[must_use]
    pub fn from_edge_list(edges: &EdgeList) -> Self {
        let n = edges.num_nodes();
        let mut data = vec![f32::NEG_INFINITY; n * n];

        for (&src, &tgt) in edges.source().iter().zip(edges.target().iter()) {
            if src < n && tgt < n {
                data[tgt * n + src] = 0.0;
            }
        }

        Self {
            mask: Tensor::from_vec(data, &[n, n]),
        }
    }

    /// Get number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.mask.shape()[0]
    }

    /// Get the underlying mask tensor.
    #[must_use]
    pub fn tensor(&self) -> &Tensor {
        &self.mask
    }
}

/// Connectivity in either encoding, threaded through a layer stack.
///
/// A stack must not mix encodings: dense-mask layers require
/// [`Connectivity::Mask`], sparse layers require [`Connectivity::Edges`].
#[derive(Debug, Clone)]
pub enum Connectivity {
    /// Dense `[N, N]` additive mask
    Mask(ConnectivityMask),
    /// Sparse edge index pairs
    Edges(EdgeList),
}

impl Connectivity {
    /// Get number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        match self {
            Connectivity::Mask(mask) => mask.num_nodes(),
            Connectivity::Edges(edges) => edges.num_nodes(),
        }
    }

    /// Human-readable encoding name, for error reporting.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Connectivity::Mask(_) => "dense mask",
            Connectivity::Edges(_) => "edge list",
        }
    }
}

impl From<ConnectivityMask> for Connectivity {
    fn from(mask: ConnectivityMask) -> Self {
        Connectivity::Mask(mask)
    }
}

impl From<EdgeList> for Connectivity {
    fn from(edges: EdgeList) -> Self {
        Connectivity::Edges(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_list_creation() {
        let edges = EdgeList::from_edge_index(&[[0, 1], [1, 2], [2, 0]], 3);
        assert_eq!(edges.num_nodes(), 3);
        assert_eq!(edges.num_edges(), 3);
        assert_eq!(edges.source(), &[0, 1, 2]);
        assert_eq!(edges.target(), &[1, 2, 0]);
    }

    #[test]
    fn test_edge_list_from_coo() {
        let edges = EdgeList::from_coo(vec![0, 1, 2], vec![1, 2, 0], 3);
        assert_eq!(edges.num_nodes(), 3);
        assert_eq!(edges.num_edges(), 3);
    }

    #[test]
    #[should_panic(expected = "equal length")]
    fn test_edge_list_from_coo_unequal() {
        let _ = EdgeList::from_coo(vec![0, 1], vec![1], 3);
    }

    #[test]
    fn test_edge_list_self_loops() {
        let edges = EdgeList::from_edge_index(&[[0, 1], [1, 2]], 3);
        assert!(!edges.has_self_loops());

        let edges = edges.with_self_loops();
        assert!(edges.has_self_loops());
        assert_eq!(edges.num_edges(), 5); // 2 original + 3 self-loops

        // Idempotent
        let edges = edges.with_self_loops();
        assert_eq!(edges.num_edges(), 5);
    }

    #[test]
    fn test_edge_list_in_degrees() {
        // 0 -> 1 -> 2
        let edges = EdgeList::from_edge_index(&[[0, 1], [1, 2]], 3);
        assert_eq!(edges.in_degrees(), vec![0, 1, 1]);
    }

    #[test]
    fn test_edge_list_validate_ok() {
        let edges = EdgeList::from_edge_index(&[[0, 1], [1, 0]], 2);
        assert!(edges.validate(2).is_ok());
    }

    #[test]
    fn test_edge_list_validate_node_count() {
        let edges = EdgeList::from_edge_index(&[[0, 1]], 2);
        let err = edges.validate(3).unwrap_err();
        assert!(err.to_string().contains("shape mismatch"));
    }

    #[test]
    fn test_edge_list_validate_out_of_range() {
        let edges = EdgeList::from_edge_index(&[[0, 5]], 3);
        assert!(edges.validate(3).is_err());
    }

    #[test]
    fn test_mask_from_edge_list() {
        let edges = EdgeList::from_edge_index(&[[0, 1], [2, 1]], 3);
        let mask = ConnectivityMask::from_edge_list(&edges);

        assert_eq!(mask.num_nodes(), 3);
        let m = mask.tensor().data();
        // Edge 0 -> 1: target row 1, source column 0
        assert_eq!(m[3], 0.0);
        // Edge 2 -> 1: target row 1, source column 2
        assert_eq!(m[5], 0.0);
        // Everything else blocked
        let open = m.iter().filter(|&&v| v == 0.0).count();
        assert_eq!(open, 2);
        assert!(m[0].is_infinite());
    }

    #[test]
    fn test_mask_new_rejects_non_square() {
        let err = ConnectivityMask::new(Tensor::zeros(&[2, 3])).unwrap_err();
        assert!(err.to_string().contains("square"));

        assert!(ConnectivityMask::new(Tensor::zeros(&[3, 3])).is_ok());
    }

    #[test]
    fn test_connectivity_num_nodes_and_kind() {
        let edges = Connectivity::from(EdgeList::from_edge_index(&[[0, 1]], 4));
        assert_eq!(edges.num_nodes(), 4);
        assert_eq!(edges.kind_name(), "edge list");

        let mask = Connectivity::from(
            ConnectivityMask::new(Tensor::zeros(&[4, 4])).expect("square mask"),
        );
        assert_eq!(mask.num_nodes(), 4);
        assert_eq!(mask.kind_name(), "dense mask");
    }
}
