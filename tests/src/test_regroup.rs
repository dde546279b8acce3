use inventory::coordinates::BinlogCoordinates;

use crate::fixture::{
    binlog_server_of, fleet, key, main_instance, replica_of, with_gtid, with_pseudo_gtid,
};

#[tokio::test]
async fn test_regroup_via_gtid_picks_most_advanced() {
    // a <- {b@200, c@300, d@250}, all GTID; a is gone
    let f = fleet();
    f.driver.add_instance(with_gtid(main_instance("a")));
    f.driver.add_instance(with_gtid(replica_of("b", "a", 200)));
    f.driver.add_instance(with_gtid(replica_of("c", "a", 300)));
    f.driver.add_instance(with_gtid(replica_of("d", "a", 250)));
    f.driver.set_unreachable(&key("a"));

    let outcome = f.topology.regroup_replicas(&key("a"), None).await.unwrap();

    assert_eq!(outcome.candidate.key, key("c"));
    assert_eq!(outcome.later.len(), 2);
    assert!(outcome.ahead.is_empty());
    assert!(outcome.cannot_replicate.is_empty());
    // every moved replica now replicates from the candidate
    for moved in &outcome.later {
        assert_eq!(moved.main_key, key("c"));
    }
    // and nothing besides the moved replicas hangs under it
    assert_eq!(
        f.repository.read_replica_instances(&key("c")).len(),
        outcome.later.len() + outcome.equal.len()
    );
    assert_eq!(f.audit.entries_for("regroup-replicas-gtid").len(), 1);
}

#[tokio::test]
async fn test_regroup_via_pseudo_gtid() {
    // a <- {b@150, c@200, d@200}, all pseudo-GTID
    let f = fleet();
    f.driver.add_instance(with_pseudo_gtid(main_instance("a")));
    f.driver.add_instance(with_pseudo_gtid(replica_of("b", "a", 150)));
    f.driver.add_instance(with_pseudo_gtid(replica_of("c", "a", 200)));
    f.driver.add_instance(with_pseudo_gtid(replica_of("d", "a", 200)));

    let outcome = f.topology.regroup_replicas(&key("a"), None).await.unwrap();

    // tie on position broken deterministically by key
    assert_eq!(outcome.candidate.key, key("c"));
    assert_eq!(outcome.equal.len(), 1);
    assert_eq!(outcome.later.len(), 1);

    // the equal replica attached at the candidate's own position, no scan
    let d = f.driver.instance(&key("d")).unwrap();
    assert_eq!(d.main_key, key("c"));
    let b = f.driver.instance(&key("b")).unwrap();
    assert_eq!(b.main_key, key("c"));
    // candidate and repointed equals resumed replication
    assert!(f.driver.instance(&key("c")).unwrap().replica_running);
    assert!(d.replica_running);
    assert_eq!(f.audit.entries_for("regroup-replicas").len(), 1);
}

#[tokio::test]
async fn test_regroup_binlog_servers() {
    // a <- {bls1@200, bls2@150}, binlog servers only
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(binlog_server_of("bls1", "a", 200));
    f.driver.add_instance(binlog_server_of("bls2", "a", 150));

    let outcome = f.topology.regroup_replicas(&key("a"), None).await.unwrap();

    assert_eq!(outcome.candidate.key, key("bls1"));
    assert_eq!(outcome.later.len(), 1);
    let bls2 = f.driver.instance(&key("bls2")).unwrap();
    assert_eq!(bls2.main_key, key("bls1"));
    assert_eq!(f.audit.entries_for("regroup-replicas-bls").len(), 1);
}

#[tokio::test]
async fn test_regroup_including_binlog_server_sub_replicas() {
    // a <- {r1 (pseudo, behind), bls (ahead)}, bls <- s1 (pseudo)
    let f = fleet();
    f.driver.add_instance(with_pseudo_gtid(main_instance("a")));
    f.driver.add_instance(with_pseudo_gtid(replica_of("r1", "a", 100)));
    f.driver.add_instance(binlog_server_of("bls", "a", 200));
    let mut s1 = with_pseudo_gtid(replica_of("s1", "bls", 150));
    // the binlog server serves a's binlog verbatim
    s1.exec_binlog_coordinates = BinlogCoordinates::new("a-bin.000001", 150);
    s1.read_binlog_coordinates = s1.exec_binlog_coordinates.clone();
    f.driver.add_instance(s1);

    let outcome = f.topology.regroup_replicas(&key("a"), None).await.unwrap();
    assert_eq!(outcome.candidate.key, key("r1"));

    let r1 = f.driver.instance(&key("r1")).unwrap();
    // the candidate drained the binlog server's lead before regrouping
    assert_eq!(r1.main_key, key("a"));
    assert!(r1
        .exec_binlog_coordinates
        .equals(&BinlogCoordinates::new("a-bin.000001", 200)));
    // the binlog server's subtree was matched below the candidate
    let s1 = f.driver.instance(&key("s1")).unwrap();
    assert_eq!(s1.main_key, key("r1"));
    assert_eq!(f.audit.entries_for("regroup-replicas-including-bls").len(), 1);
}
