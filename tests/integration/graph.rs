use crate::common::*;
use mosaicdb::EdgeFilter;

fn road_map(t: &TestDb) {
    for (id, from, to, w) in [
        ("ab", "A", "B", 1.0),
        ("bc", "B", "C", 2.0),
        ("ac", "A", "C", 5.0),
        ("cd", "C", "D", 1.0),
        ("bd", "B", "D", 7.0),
    ] {
        t.db.add_edge(&weighted(id, from, to, w)).unwrap();
    }
}

#[test]
fn dijkstra_and_a_star_agree() {
    let t = TestDb::new();
    road_map(&t);

    let dijkstra = t.db.shortest_path("A", "D").unwrap().unwrap();
    assert_eq!(dijkstra.path, vec!["A", "B", "C", "D"]);
    assert_eq!(dijkstra.edges, vec!["ab", "bc", "cd"]);
    assert_eq!(dijkstra.total_cost, 4.0);

    // Admissible: remaining hops times the cheapest weight
    let hops = |v: &str| match v {
        "A" => 2.0,
        "B" => 2.0,
        "C" => 1.0,
        _ => 0.0,
    };
    let a_star = t.db.graph().a_star("A", "D", &hops).unwrap().unwrap();
    assert_eq!(a_star.total_cost, dijkstra.total_cost);
    assert_eq!(a_star.path, dijkstra.path);
}

#[test]
fn topology_patch_applies_only_on_commit() {
    let t = TestDb::new();
    road_map(&t);
    assert_eq!(t.db.bfs("D", 2).unwrap(), vec!["D"]);

    let mut txn = t.db.begin();
    txn.add_edge(&edge("da", "D", "A")).unwrap();
    txn.delete_edge("ab").unwrap();
    assert_eq!(t.db.bfs("D", 1).unwrap(), vec!["D"]);
    assert_eq!(t.db.bfs("A", 1).unwrap(), vec!["A", "B", "C"]);
    txn.commit().unwrap();

    assert_eq!(t.db.bfs("D", 1).unwrap(), vec!["D", "A"]);
    assert_eq!(t.db.bfs("A", 1).unwrap(), vec!["A", "C"]);
    let path = t.db.shortest_path("A", "D").unwrap().unwrap();
    assert_eq!(path.edges, vec!["ac", "cd"]);
}

#[test]
fn labels_and_time_filter_traversal() {
    let t = TestDb::new();
    let link = |id: &str, from: &str, to: &str, label: &str, from_t: i64, to_t: i64| {
        Edge::new(id, from, to)
            .with_label(label)
            .with_validity(Some(from_t), Some(to_t))
            .to_entity()
            .unwrap()
    };
    t.db.add_edge(&link("e1", "alice", "acme", "works_at", 2010, 2015)).unwrap();
    t.db.add_edge(&link("e2", "alice", "globex", "works_at", 2016, 2024)).unwrap();
    t.db.add_edge(&link("e3", "alice", "bob", "knows", 2000, 2100)).unwrap();

    let jobs = t
        .db
        .graph()
        .bfs_filtered("alice", 1, &EdgeFilter::label("works_at"))
        .unwrap();
    let names: Vec<&str> = jobs.iter().map(|(v, _)| v.as_str()).collect();
    assert_eq!(names, vec!["alice", "acme", "globex"]);

    assert_eq!(t.db.temporal_traverse("alice", 1, 2012).unwrap(), vec!["alice", "acme", "bob"]);
    assert_eq!(t.db.temporal_traverse("alice", 1, 2020).unwrap(), vec!["alice", "bob", "globex"]);

    let overlapping = t.db.graph().edges_in_time_range(2014, 2017, false).unwrap();
    let ids: Vec<&str> = overlapping.iter().map(|e| e.edge_id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "e2", "e3"]);
    let contained = t.db.graph().edges_in_time_range(2009, 2016, true).unwrap();
    assert_eq!(contained.len(), 1);
    assert_eq!(contained[0].edge_id, "e1");
}

#[test]
fn topology_rebuilt_after_reopen() {
    let t = TestDb::new();
    road_map(&t);
    t.db.remove_edge("bc").unwrap();
    let t = t.reopen();
    assert_eq!(t.db.bfs("A", 3).unwrap(), vec!["A", "B", "C", "D"]);
    let path = t.db.shortest_path("A", "D").unwrap().unwrap();
    assert_eq!(path.edges, vec!["ac", "cd"]);
    assert_eq!(path.total_cost, 6.0);
    assert_eq!(t.db.graph().edge_count().unwrap(), 4);
}

#[test]
fn invalid_edges_rejected() {
    let t = TestDb::new();
    let negative = Edge::new("n", "A", "B").with_weight(-1.0);
    assert!(negative.to_entity().and_then(|e| t.db.add_edge(&e)).is_err());
    assert!(t.db.add_edge(&entity("x", &[("_to", "B".into())])).is_err());
    assert!(t.db.shortest_path("", "B").is_err());
    assert_eq!(t.db.graph().edge_count().unwrap(), 0);
}
