//! End-to-end contracts of the attention layers, exercised through the
//! public API. The central property: the same graph expressed as a dense
//! additive mask and as an edge list produces numerically equivalent
//! outputs, given identical parameters and disabled dropout.

use std::collections::BTreeSet;

use proptest::prelude::*;

use atender::tensor::Tensor;
use atender::{
    Connectivity, ConnectivityMask, DenseFusedGat, EdgeList, Gat, GatConfig, GatLayer,
    GatLayerConfig, LayerKind, SparseFusedGat,
};

const F_IN: usize = 3;

/// Same seed, same fused projection layout: the dense and sparse fused
/// layers draw identical parameters.
fn fused_pair(seed: u64) -> (DenseFusedGat, SparseFusedGat) {
    let config = GatLayerConfig::new(F_IN, 4, 2).with_seed(seed);
    let mut dense = DenseFusedGat::new(config.clone()).expect("valid config");
    let mut sparse = SparseFusedGat::new(config).expect("valid config");
    dense.eval();
    sparse.eval();
    (dense, sparse)
}

fn assert_close(a: &Tensor, b: &Tensor, tolerance: f32) {
    assert_eq!(a.shape(), b.shape());
    for (va, vb) in a.data().iter().zip(b.data()) {
        assert!((va - vb).abs() < tolerance, "{va} vs {vb}");
    }
}

#[test]
fn dense_and_sparse_agree_on_triangle_graph() {
    let (dense, sparse) = fused_pair(42);

    let edges = EdgeList::from_edge_index(&[[0, 1], [1, 2], [2, 0]], 3).with_self_loops();
    let mask = ConnectivityMask::from_edge_list(&edges);
    let x = Tensor::new(&[0.5, -0.2, 0.8, 1.0, 0.0, -0.6, 0.1, 0.4, 0.9], &[3, F_IN]);

    let (from_mask, _) = dense
        .forward(&x, Connectivity::Mask(mask))
        .expect("dense forward");
    let (from_edges, _) = sparse
        .forward(&x, Connectivity::Edges(edges))
        .expect("sparse forward");

    assert_close(&from_mask, &from_edges, 1e-4);
}

#[test]
fn dense_and_sparse_agree_with_isolated_node() {
    let (dense, sparse) = fused_pair(9);

    // Node 3 is fully disconnected in both encodings.
    let edges = EdgeList::from_edge_index(&[[0, 1], [1, 0], [0, 0], [1, 1], [2, 2]], 4);
    let mask = ConnectivityMask::from_edge_list(&edges);
    let x = Tensor::ones(&[4, F_IN]);

    let (from_mask, _) = dense
        .forward(&x, Connectivity::Mask(mask))
        .expect("dense forward");
    let (from_edges, _) = sparse
        .forward(&x, Connectivity::Edges(edges))
        .expect("sparse forward");

    assert_close(&from_mask, &from_edges, 1e-4);
    assert!(from_edges.data().iter().all(|v| v.is_finite()));
}

#[test]
fn dense_and_sparse_stacks_agree() {
    let edges = EdgeList::from_edge_index(&[[0, 1], [1, 2], [2, 3], [3, 0], [1, 3]], 4)
        .with_self_loops();
    let mask = ConnectivityMask::from_edge_list(&edges);
    let x = Tensor::new(
        &[
            0.2, -0.7, 0.4, 1.1, 0.3, -0.2, -0.5, 0.8, 0.0, 0.6, -1.0, 0.9,
        ],
        &[4, F_IN],
    );

    let base = GatConfig::new(2, vec![2, 1], vec![F_IN, 4, 2]).with_seed(77);
    let mut dense = Gat::new(base.clone().with_layer_kind(LayerKind::DenseFused))
        .expect("valid config");
    let mut sparse = Gat::new(base.with_layer_kind(LayerKind::SparseFused))
        .expect("valid config");
    dense.eval();
    sparse.eval();

    let (from_mask, _) = dense
        .forward(&x, Connectivity::Mask(mask))
        .expect("dense forward");
    let (from_edges, _) = sparse
        .forward(&x, Connectivity::Edges(edges))
        .expect("sparse forward");

    assert_eq!(from_mask.shape(), &[4, 2]);
    assert_close(&from_mask, &from_edges, 1e-4);
}

#[test]
fn unknown_layer_tag_is_rejected() {
    let err = "dense-transposed".parse::<LayerKind>().unwrap_err();
    assert!(err.to_string().contains("unsupported layer variant"));
}

/// Arbitrary small graph: node count, deduplicated directed edges, and a
/// feature matrix.
fn graph_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize)>, Vec<f32>)> {
    (2usize..6).prop_flat_map(|n| {
        (
            Just(n),
            proptest::collection::vec((0..n, 0..n), 1..=12),
            proptest::collection::vec(-1.0f32..1.0, n * F_IN),
        )
    })
}

/// The dense mask merges duplicate edges into one cell, so equivalence is
/// stated over deduplicated edge sets.
fn dedup(edges: Vec<(usize, usize)>) -> (Vec<usize>, Vec<usize>) {
    let unique: BTreeSet<(usize, usize)> = edges.into_iter().collect();
    unique.into_iter().unzip()
}

proptest! {
    #[test]
    fn prop_dense_and_sparse_agree((n, edges, features) in graph_strategy()) {
        let (source, target) = dedup(edges);
        let edges = EdgeList::from_coo(source, target, n);
        let mask = ConnectivityMask::from_edge_list(&edges);
        let x = Tensor::new(&features, &[n, F_IN]);

        let (dense, sparse) = fused_pair(1234);
        let (from_mask, _) = dense
            .forward(&x, Connectivity::Mask(mask))
            .expect("dense forward");
        let (from_edges, _) = sparse
            .forward(&x, Connectivity::Edges(edges))
            .expect("sparse forward");

        prop_assert_eq!(from_mask.shape(), from_edges.shape());
        for (a, b) in from_mask.data().iter().zip(from_edges.data()) {
            prop_assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }

    #[test]
    fn prop_attention_weights_normalize((n, edges, features) in graph_strategy()) {
        let edges = EdgeList::from_coo(
            edges.iter().map(|e| e.0).collect(),
            edges.iter().map(|e| e.1).collect(),
            n,
        );
        let x = Tensor::new(&features, &[n, F_IN]);

        let config = GatLayerConfig::new(F_IN, 4, 2)
            .with_seed(5)
            .with_attention_logging();
        let mut layer = SparseFusedGat::new(config).expect("valid config");
        layer.eval();
        layer
            .forward(&x, Connectivity::Edges(edges.clone()))
            .expect("forward");

        let att = layer.attention_weights().expect("attention logged");
        prop_assert_eq!(att.shape(), &[edges.num_edges(), 2][..]);

        // Weights of edges sharing a target sum to one; weights are
        // non-negative. Targets with no incoming edges have no weights.
        let mut sums = vec![0.0f32; n * 2];
        for (e, &tgt) in edges.target().iter().enumerate() {
            for h in 0..2 {
                let w = att.data()[e * 2 + h];
                prop_assert!(w >= 0.0);
                sums[tgt * 2 + h] += w;
            }
        }
        for (node, &degree) in edges.in_degrees().iter().enumerate() {
            for h in 0..2 {
                let sum = sums[node * 2 + h];
                if degree > 0 {
                    prop_assert!((sum - 1.0).abs() < 1e-4, "sum {}", sum);
                } else {
                    prop_assert!(sum == 0.0);
                }
            }
        }
    }

    #[test]
    fn prop_outputs_stay_finite((n, edges, features) in graph_strategy()) {
        let edges = EdgeList::from_coo(
            edges.iter().map(|e| e.0).collect(),
            edges.iter().map(|e| e.1).collect(),
            n,
        );
        let x = Tensor::new(&features, &[n, F_IN]);

        let mut layer = SparseFusedGat::new(GatLayerConfig::new(F_IN, 4, 2).with_seed(3))
            .expect("valid config");
        layer.eval();
        let (out, _) = layer
            .forward(&x, Connectivity::Edges(edges))
            .expect("forward");

        prop_assert!(out.data().iter().all(|v| v.is_finite()));
    }
}
