use proptest::prelude::*;
use sbm_core::RngHandle;
use sbm_graph::{gen_erdos_renyi, Multigraph};

fn check_degree_sums(graph: &Multigraph) {
    let out_sum: usize = graph.vertices().map(|v| graph.out_degree(v)).sum();
    let in_sum: usize = graph.vertices().map(|v| graph.in_degree(v)).sum();
    if graph.is_directed() {
        assert_eq!(out_sum, graph.num_edges());
        assert_eq!(in_sum, graph.num_edges());
    } else {
        // Loops sit once in the adjacency, so only loop-free graphs obey
        // the handshake identity exactly; the generators emit none.
        assert_eq!(out_sum, 2 * graph.num_edges());
    }
}

proptest! {
    #[test]
    fn random_graphs_respect_invariants(seed in any::<u64>(), n in 2usize..30, directed in any::<bool>()) {
        let mut rng = RngHandle::from_seed(seed);
        let graph = gen_erdos_renyi(n, 0.3, directed, &mut rng).unwrap();
        check_degree_sums(&graph);
        for edge in graph.edges() {
            let (u, v) = graph.endpoints(edge).unwrap();
            prop_assert!(u < n && v < n);
        }
    }
}

#[test]
fn edge_slots_are_recycled() {
    let mut graph = Multigraph::with_vertices(4, false);
    let e0 = graph.add_edge(0, 1).unwrap();
    let _e1 = graph.add_edge(1, 2).unwrap();
    graph.remove_edge(e0).unwrap();
    assert!(!graph.is_alive(e0));
    let e2 = graph.add_edge(2, 3).unwrap();
    assert_eq!(e2, e0, "dead slot must be reused");
    assert_eq!(graph.num_edges(), 2);
    assert_eq!(graph.edge_slots(), 2);
}

#[test]
fn removing_unknown_edges_fails() {
    let mut graph = Multigraph::with_vertices(2, true);
    let e = graph.add_edge(0, 1).unwrap();
    graph.remove_edge(e).unwrap();
    assert!(graph.remove_edge(e).is_err());
    assert!(graph.add_edge(0, 7).is_err());
}

#[test]
fn self_loops_appear_once_in_adjacency() {
    let mut graph = Multigraph::with_vertices(2, false);
    let e = graph.add_edge(0, 0).unwrap();
    assert_eq!(graph.out_neighbours(0).len(), 1);
    assert_eq!(graph.out_neighbours(0)[0].edge, e);
    graph.remove_edge(e).unwrap();
    assert!(graph.out_neighbours(0).is_empty());
}
