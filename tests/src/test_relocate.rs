use common::err::TopoError;
use common::structure::postponed::PostponedFunctionsContainer;

use crate::fixture::{
    binlog_server_of, fleet, key, main_instance, replica_of, with_gtid, with_pseudo_gtid,
};

#[tokio::test]
async fn test_relocate_refuses_descendant() {
    // a <- b <- c; relocating a below its own grandchild must not happen
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 200));
    f.driver.add_instance(replica_of("c", "b", 150));

    let result = f.topology.relocate_below(&key("a"), &key("c")).await;
    assert!(matches!(result, Err(TopoError::PreconditionViolated(_))));

    // nothing was mutated, nothing was even stopped
    assert!(f.driver.calls_for("change-main-to").is_empty());
    assert!(f.driver.calls_for("stop-replica").is_empty());
    assert!(f.driver.calls_for("start-replica-until").is_empty());
}

#[tokio::test]
async fn test_relocate_already_in_place_repoints() {
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 100));

    let relocated = f.topology.relocate_below(&key("b"), &key("a")).await.unwrap();
    assert_eq!(relocated.main_key, key("a"));
    assert_eq!(f.audit.entries_for("repoint").len(), 1);
    assert_eq!(f.audit.entries_for("relocate-below").len(), 1);
}

#[tokio::test]
async fn test_relocate_prefers_gtid() {
    let f = fleet();
    f.driver.add_instance(with_gtid(main_instance("a")));
    f.driver.add_instance(with_gtid(replica_of("b", "a", 100)));
    f.driver.add_instance(with_gtid(replica_of("t", "a", 300)));

    f.topology.relocate_below(&key("b"), &key("t")).await.unwrap();

    let b = f.driver.instance(&key("b")).unwrap();
    assert_eq!(b.main_key, key("t"));
    let reparents = f.driver.calls_for("change-main-to");
    assert_eq!(reparents.len(), 1);
    assert!(reparents[0].detail.contains("hint=Force"));
}

#[tokio::test]
async fn test_relocate_falls_back_to_pseudo_gtid_match() {
    let f = fleet();
    f.driver.add_instance(with_pseudo_gtid(main_instance("a")));
    f.driver.add_instance(with_pseudo_gtid(replica_of("b", "a", 100)));
    f.driver.add_instance(with_pseudo_gtid(replica_of("t", "a", 300)));
    let t_self = f.driver.instance(&key("t")).unwrap().self_binlog_coordinates;

    f.topology.relocate_below(&key("b"), &key("t")).await.unwrap();

    let b = f.driver.instance(&key("b")).unwrap();
    assert_eq!(b.main_key, key("t"));
    assert!(b.exec_binlog_coordinates.equals(&t_self));
    assert_eq!(f.audit.entries_for("match-below").len(), 1);
}

#[tokio::test]
async fn test_relocate_plain_siblings_move_below() {
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 100));
    let mut target = replica_of("t", "a", 300);
    // no gtid, no pseudo-gtid; the sibling path requires a writable target
    target.read_only = false;
    f.driver.add_instance(target);

    f.topology.relocate_below(&key("b"), &key("t")).await.unwrap();

    let b = f.driver.instance(&key("b")).unwrap();
    assert_eq!(b.main_key, key("t"));
    // aligned by replay before reparenting
    assert_eq!(f.driver.calls_for("start-replica-until").len(), 1);
}

#[tokio::test]
async fn test_relocate_to_grandparent_moves_up() {
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 200));
    f.driver.add_instance(replica_of("c", "b", 150));

    f.topology.relocate_below(&key("c"), &key("a")).await.unwrap();

    assert_eq!(f.driver.instance(&key("c")).unwrap().main_key, key("a"));
    assert_eq!(f.audit.entries_for("move-up").len(), 1);
}

#[tokio::test]
async fn test_relocate_below_binlog_server_recurses() {
    // g <- a <- b and g <- bls: relocating b below bls goes below g first,
    // then steps down into the binlog server
    let f = fleet();
    f.driver.add_instance(main_instance("g"));
    f.driver.add_instance(replica_of("a", "g", 300));
    f.driver.add_instance(replica_of("b", "a", 150));
    f.driver.add_instance(binlog_server_of("bls", "g", 400));

    f.topology.relocate_below(&key("b"), &key("bls")).await.unwrap();

    assert_eq!(f.driver.instance(&key("b")).unwrap().main_key, key("bls"));
    // one move-up to reach g, one repoint down into the binlog server
    assert_eq!(f.audit.entries_for("move-up").len(), 1);
    assert!(!f.audit.entries_for("repoint").is_empty());
}

#[tokio::test]
async fn test_relocate_sibling_binlog_server_target() {
    // a <- {b, bls}: the sibling is a binlog server; move-below short-circuits
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 150));
    f.driver.add_instance(binlog_server_of("bls", "a", 300));

    f.topology.relocate_below(&key("b"), &key("bls")).await.unwrap();

    let b = f.driver.instance(&key("b")).unwrap();
    assert_eq!(b.main_key, key("bls"));
    // transparent repoint: the executed position was preserved
    assert!(b
        .exec_binlog_coordinates
        .equals(&inventory::coordinates::BinlogCoordinates::new(
            "a-bin.000001",
            150
        )));
}

#[tokio::test]
async fn test_relocate_too_complex_refused() {
    // unrelated clusters, no identity mode shared
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 100));
    f.driver.add_instance(main_instance("x"));
    f.driver.add_instance(replica_of("y", "x", 100));

    let result = f.topology.relocate_below(&key("b"), &key("y")).await;
    assert!(matches!(result, Err(TopoError::PreconditionViolated(_))));
}

#[tokio::test]
async fn test_relocate_replicas_via_gtid() {
    let f = fleet();
    f.driver.add_instance(with_gtid(main_instance("a")));
    f.driver.add_instance(with_gtid(replica_of("dead", "a", 300)));
    f.driver.add_instance(with_gtid(replica_of("r1", "dead", 100)));
    f.driver.add_instance(with_gtid(replica_of("r2", "dead", 200)));
    f.driver.add_instance(with_gtid(replica_of("t", "a", 400)));

    let container = PostponedFunctionsContainer::new("relocate");
    let outcome = f
        .topology
        .relocate_replicas(&key("dead"), &key("t"), "", Some(&container))
        .await
        .unwrap();
    assert_eq!(outcome.moved.len(), 2);
    for host in ["r1", "r2"] {
        assert_eq!(f.driver.instance(&key(host)).unwrap().main_key, key("t"));
    }
    assert_eq!(f.audit.entries_for("relocate-replicas").len(), 1);
}

#[tokio::test]
async fn test_relocate_replicas_of_binlog_server_repoints() {
    // a <- bls <- {r1, r2}: replicas of a binlog server repoint freely to
    // the binlog server's own main
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(binlog_server_of("bls", "a", 300));
    for (host, pos) in [("r1", 100), ("r2", 200)] {
        let mut replica = replica_of(host, "bls", pos);
        replica.exec_binlog_coordinates =
            inventory::coordinates::BinlogCoordinates::new("a-bin.000001", pos);
        replica.read_binlog_coordinates = replica.exec_binlog_coordinates.clone();
        f.driver.add_instance(replica);
    }

    let outcome = f
        .topology
        .relocate_replicas(&key("bls"), &key("a"), "", None)
        .await
        .unwrap();
    assert_eq!(outcome.moved.len(), 2);
    for host in ["r1", "r2"] {
        assert_eq!(f.driver.instance(&key(host)).unwrap().main_key, key("a"));
    }
    // structural repoint: no matching, no gtid involved
    assert!(f.driver.calls_for("stop-replica-nicely").is_empty());
}

#[tokio::test]
async fn test_relocate_replicas_too_complex() {
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("dead", "a", 300));
    f.driver.add_instance(replica_of("r1", "dead", 100));
    f.driver.add_instance(main_instance("x"));
    f.driver.add_instance(replica_of("t", "x", 100));

    let result = f
        .topology
        .relocate_replicas(&key("dead"), &key("t"), "", None)
        .await;
    assert!(matches!(result, Err(TopoError::PreconditionViolated(_))));
}
