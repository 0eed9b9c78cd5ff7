use sbm_graph::{HalfEdgeExpansion, Multigraph};

fn triangle() -> Multigraph {
    let mut graph = Multigraph::with_vertices(3, false);
    graph.add_edge(0, 1).unwrap();
    graph.add_edge(1, 2).unwrap();
    graph.add_edge(2, 0).unwrap();
    graph
}

#[test]
fn expansion_doubles_endpoints() {
    let original = triangle();
    let expansion = HalfEdgeExpansion::build(&original).unwrap();
    assert_eq!(expansion.num_half_edges(), 6);
    assert_eq!(expansion.graph().num_edges(), 3);
    assert_eq!(expansion.num_nodes(), 3);
    for node in 0..3 {
        assert_eq!(expansion.halves(node).len(), 2, "node {node}");
        for &half in expansion.halves(node) {
            assert_eq!(expansion.owner(half), node);
        }
    }
}

#[test]
fn opposite_crosses_the_underlying_edge() {
    let original = triangle();
    let expansion = HalfEdgeExpansion::build(&original).unwrap();
    for half in 0..expansion.num_half_edges() {
        let other = expansion.opposite(half).unwrap();
        assert_ne!(expansion.owner(half), expansion.owner(other));
        assert_eq!(expansion.source_edge(half), expansion.source_edge(other));
        assert_eq!(expansion.opposite(other).unwrap(), half);
    }
}

#[test]
fn every_half_edge_has_degree_one() {
    let original = triangle();
    let expansion = HalfEdgeExpansion::build(&original).unwrap();
    for half in 0..expansion.num_half_edges() {
        assert_eq!(expansion.graph().out_degree(half), 1);
    }
}
