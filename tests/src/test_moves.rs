use common::err::TopoError;
use inventory::coordinates::BinlogCoordinates;
use topology::driver::GtidHint;

use crate::fixture::{
    binlog_server_of, fleet, key, main_instance, replica_of, with_gtid, with_pseudo_gtid,
};

#[tokio::test]
async fn test_move_up_simple() {
    // a <- b <- c
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 200));
    f.driver.add_instance(replica_of("c", "b", 150));
    let b_exec_prior = f.driver.instance(&key("b")).unwrap().exec_binlog_coordinates;

    f.topology.move_up(&key("c")).await.unwrap();

    let c = f.driver.instance(&key("c")).unwrap();
    assert_eq!(c.main_key, key("a"));
    assert!(c.exec_binlog_coordinates.equals(&b_exec_prior));
    // both were restarted by cleanup
    assert!(c.replica_running);
    assert!(f.driver.instance(&key("b")).unwrap().replica_running);
    assert_eq!(f.audit.entries_for("move-up").len(), 1);
}

#[tokio::test]
async fn test_move_up_short_circuits_through_binlog_server() {
    // a <- bls <- c, where bls is a binlog server
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(binlog_server_of("bls", "a", 200));
    f.driver.add_instance(replica_of("c", "bls", 150));
    let mut c = f.driver.instance(&key("c")).unwrap();
    // the binlog server serves its main's binlog verbatim
    c.exec_binlog_coordinates = BinlogCoordinates::new("a-bin.000001", 150);
    c.read_binlog_coordinates = c.exec_binlog_coordinates.clone();
    f.driver.add_instance(c);
    let exec_prior = f.driver.instance(&key("c")).unwrap().exec_binlog_coordinates;

    f.topology.move_up(&key("c")).await.unwrap();

    let c = f.driver.instance(&key("c")).unwrap();
    assert_eq!(c.main_key, key("a"));
    // no advancement happened: the one reparenting call kept the position
    assert!(c.exec_binlog_coordinates.equals(&exec_prior));
    assert!(f.driver.calls_for("start-replica-until").is_empty());
    let reparents = f.driver.calls_for("change-main-to");
    assert_eq!(reparents.len(), 1);
    assert!(reparents[0].detail.contains(&format!("at {}", exec_prior)));
    assert_eq!(f.audit.entries_for("repoint").len(), 1);
}

#[tokio::test]
async fn test_move_below_aligns_siblings() {
    // a <- b (exec 100), a <- c (exec 150)
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 100));
    f.driver.add_instance(replica_of("c", "a", 150));
    let c_self_prior = f.driver.instance(&key("c")).unwrap().self_binlog_coordinates;

    f.topology.move_below(&key("b"), &key("c")).await.unwrap();

    // b was run forward to c's position before reparenting
    let advanced = f.driver.calls_for("start-replica-until");
    assert_eq!(advanced.len(), 1);
    assert_eq!(advanced[0].key, key("b"));
    assert!(advanced[0].detail.contains("a-bin.000001:150"));

    let b = f.driver.instance(&key("b")).unwrap();
    assert_eq!(b.main_key, key("c"));
    assert!(b.exec_binlog_coordinates.equals(&c_self_prior));
    assert!(b.replica_running);
    assert!(f.driver.instance(&key("c")).unwrap().replica_running);
}

#[tokio::test]
async fn test_move_below_refuses_non_siblings() {
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 100));
    f.driver.add_instance(main_instance("x"));
    f.driver.add_instance(replica_of("y", "x", 100));

    let result = f.topology.move_below(&key("b"), &key("y")).await;
    assert!(matches!(result, Err(TopoError::PreconditionViolated(_))));
    assert!(f.driver.calls_for("stop-replica").is_empty());
}

#[tokio::test]
async fn test_repoint_is_idempotent() {
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 100));
    let exec_prior = f.driver.instance(&key("b")).unwrap().exec_binlog_coordinates;

    f.topology
        .repoint(&key("b"), Some(&key("a")), GtidHint::Neutral)
        .await
        .unwrap();

    let b = f.driver.instance(&key("b")).unwrap();
    assert_eq!(b.main_key, key("a"));
    assert!(!b.exec_binlog_coordinates.smaller_than(&exec_prior));
    assert!(b.replica_running);
}

#[tokio::test]
async fn test_repoint_falls_back_to_cached_target() {
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 100));
    // the target is down; its inventory record remains
    f.driver.set_unreachable(&key("a"));

    f.topology
        .repoint(&key("b"), Some(&key("a")), GtidHint::Neutral)
        .await
        .unwrap();

    let reparents = f.driver.calls_for("change-main-to");
    assert_eq!(reparents.len(), 1);
    // a cached hostname must not be trusted as resolved
    assert!(reparents[0].detail.contains("unresolve=true"));
}

#[tokio::test]
async fn test_cleanup_restarts_everything_stopped_on_failure() {
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 200));
    f.driver.add_instance(replica_of("c", "b", 150));
    f.driver.fail_operation("change-main-to", 1);

    let result = f.topology.move_up(&key("c")).await;
    assert!(result.is_err());

    // both b and c were stopped; both got a start attempt
    let started: Vec<_> = f
        .driver
        .calls_for("start-replica")
        .into_iter()
        .map(|call| call.key)
        .collect();
    assert!(started.contains(&key("b")));
    assert!(started.contains(&key("c")));
    // nothing was audited for the failed operation
    assert!(f.audit.entries_for("move-up").is_empty());
}

#[tokio::test]
async fn test_maintenance_excludes_concurrent_operations() {
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 200));
    f.driver.add_instance(replica_of("c", "b", 150));

    let _held = f
        .maintenance
        .begin_maintenance(&key("c"), "operator", "manual work")
        .unwrap();

    let result = f.topology.move_up(&key("c")).await;
    assert!(matches!(result, Err(TopoError::PreconditionViolated(_))));
    // acquisition failed before any replication was touched
    assert!(f.driver.calls_for("stop-replica").is_empty());
    // and the failed attempt did not leak a token for the sibling key
    assert!(!f.maintenance.in_maintenance(&key("b")));
}

#[tokio::test]
async fn test_match_below_records_equivalence() {
    let f = fleet();
    f.driver.add_instance(with_pseudo_gtid(main_instance("a")));
    f.driver.add_instance(with_pseudo_gtid(replica_of("b", "a", 150)));
    f.driver.add_instance(with_pseudo_gtid(replica_of("c", "a", 150)));
    let c_self = f.driver.instance(&key("c")).unwrap().self_binlog_coordinates;

    let (moved, matched_at) = f.topology.match_below(&key("b"), &key("c"), true).await.unwrap();
    assert_eq!(moved.main_key, key("c"));
    assert!(matched_at.equals(&c_self));
    assert_eq!(f.audit.entries_for("match-below").len(), 1);

    // the correlation is remembered: an identical sibling now moves with no scan
    let equivalent = f.repository.read_equivalent_binlog_coordinates(
        &key("a"),
        &BinlogCoordinates::new("a-bin.000001", 150),
        &key("c"),
    );
    assert_eq!(equivalent, Some(matched_at.clone()));

    f.driver.add_instance(with_pseudo_gtid(replica_of("d", "a", 150)));
    let moved = f.topology.move_equivalent(&key("d"), &key("c")).await.unwrap();
    assert_eq!(moved.main_key, key("c"));
    assert!(moved.exec_binlog_coordinates.equals(&matched_at));
    assert_eq!(f.audit.entries_for("move-equivalent").len(), 1);
}

#[tokio::test]
async fn test_match_below_zero_events_is_fatal() {
    let f = fleet();
    f.driver.add_instance(with_pseudo_gtid(main_instance("a")));
    f.driver.add_instance(with_pseudo_gtid(replica_of("b", "a", 150)));
    f.driver.add_instance(with_pseudo_gtid(replica_of("c", "a", 150)));
    f.scanner.set_zero_match(&key("b"));

    let result = f.topology.match_below(&key("b"), &key("c"), true).await;
    assert!(matches!(result, Err(TopoError::PositionMismatch(_))));
    // the stopped replica was restarted regardless
    let b = f.driver.instance(&key("b")).unwrap();
    assert_eq!(b.main_key, key("a"));
    assert!(b.replica_running);
}

#[tokio::test]
async fn test_match_up_uses_cached_records() {
    let f = fleet();
    f.driver.add_instance(with_pseudo_gtid(main_instance("g")));
    f.driver.add_instance(with_pseudo_gtid(replica_of("m1", "g", 400)));
    f.driver.add_instance(with_pseudo_gtid(replica_of("m2", "g", 400)));
    f.driver.add_instance(with_pseudo_gtid(replica_of("b", "m2", 100)));

    // the inventory is stale: it still believes b replicates from m1
    let mut stale = f.repository.read_instance(&key("b")).unwrap();
    stale.main_key = key("m1");
    f.repository.write_instance(&stale);

    f.topology.match_up(&key("b")).await.unwrap();

    // matched below the cached parent's main, live state notwithstanding
    let b = f.driver.instance(&key("b")).unwrap();
    assert_eq!(b.main_key, key("g"));
}

#[tokio::test]
async fn test_take_main_swaps_with_intermediate() {
    // g <- a <- b
    let f = fleet();
    f.driver.add_instance(main_instance("g"));
    f.driver.add_instance(replica_of("a", "g", 300));
    f.driver.add_instance(replica_of("b", "a", 150));

    f.topology.take_main(&key("b")).await.unwrap();

    let a = f.driver.instance(&key("a")).unwrap();
    let b = f.driver.instance(&key("b")).unwrap();
    assert_eq!(b.main_key, key("g"));
    assert_eq!(a.main_key, key("b"));
    assert_eq!(f.audit.entries_for("take-main").len(), 1);
}

#[tokio::test]
async fn test_take_main_of_root_runs_hooks() {
    let mut config = crate::fixture::test_config();
    config.post_take_main_processes = vec![String::from("true")];
    let f = crate::fixture::fleet_with_config(config);
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 150));

    f.topology.take_main(&key("b")).await.unwrap();

    let a = f.driver.instance(&key("a")).unwrap();
    let b = f.driver.instance(&key("b")).unwrap();
    // the old root now replicates from its former replica
    assert_eq!(a.main_key, key("b"));
    assert!(!b.is_replica());
    assert_eq!(f.driver.calls_for("reset-replica").len(), 1);
}

#[tokio::test]
async fn test_make_co_main() {
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 150));

    f.topology.make_co_main(&key("b")).await.unwrap();

    let a = f.driver.instance(&key("a")).unwrap();
    assert_eq!(a.main_key, key("b"));
    assert!(a.replication_credentials_available);
    assert_eq!(f.audit.entries_for("make-co-main").len(), 1);

    // a writable replica cannot become co-main
    f.driver.add_instance(main_instance("x"));
    let mut writable = replica_of("y", "x", 10);
    writable.read_only = false;
    f.driver.add_instance(writable);
    assert!(f.topology.make_co_main(&key("y")).await.is_err());
}

#[tokio::test]
async fn test_make_main_promotes_over_dead_main() {
    let f = fleet();
    f.driver.add_instance(with_pseudo_gtid(main_instance("m")));
    f.driver.add_instance(with_pseudo_gtid(replica_of("c", "m", 300)));
    f.driver.add_instance(with_pseudo_gtid(replica_of("s", "m", 200)));
    f.driver.set_unreachable(&key("m"));

    f.topology.make_main(&key("c")).await.unwrap();

    let c = f.driver.instance(&key("c")).unwrap();
    let s = f.driver.instance(&key("s")).unwrap();
    assert!(!c.read_only);
    assert_eq!(s.main_key, key("c"));
    assert_eq!(f.audit.entries_for("make-main").len(), 1);
}

#[tokio::test]
async fn test_make_main_refuses_lagging_candidate() {
    let f = fleet();
    f.driver.add_instance(with_pseudo_gtid(main_instance("m")));
    f.driver.add_instance(with_pseudo_gtid(replica_of("c", "m", 100)));
    f.driver.add_instance(with_pseudo_gtid(replica_of("s", "m", 200)));
    f.driver.set_unreachable(&key("m"));

    let result = f.topology.make_main(&key("c")).await;
    assert!(matches!(result, Err(TopoError::PreconditionViolated(_))));
}

#[tokio::test]
async fn test_detach_and_reattach_main_host() {
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 100));
    let exec_prior = f.driver.instance(&key("b")).unwrap().exec_binlog_coordinates;

    f.topology.detach_replica_main_host(&key("b")).await.unwrap();
    let b = f.driver.instance(&key("b")).unwrap();
    assert!(b.main_key.is_detached());
    assert_eq!(b.main_key.hostname, "//a");
    assert!(b.exec_binlog_coordinates.equals(&exec_prior));

    // detaching twice is refused
    assert!(f.topology.detach_replica_main_host(&key("b")).await.is_err());

    f.topology.reattach_replica_main_host(&key("b")).await.unwrap();
    let b = f.driver.instance(&key("b")).unwrap();
    assert_eq!(b.main_key, key("a"));
    assert!(b.exec_binlog_coordinates.equals(&exec_prior));

    assert!(f.topology.reattach_replica_main_host(&key("b")).await.is_err());
}

#[tokio::test]
async fn test_enable_and_disable_gtid() {
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    let mut b = replica_of("b", "a", 100);
    b.supports_oracle_gtid = true;
    f.driver.add_instance(b);

    let enabled = f.topology.enable_gtid(&key("b")).await.unwrap();
    assert!(enabled.using_oracle_gtid);
    // enabling twice is a precondition error
    assert!(f.topology.enable_gtid(&key("b")).await.is_err());

    let disabled = f.topology.disable_gtid(&key("b")).await.unwrap();
    assert!(!disabled.using_gtid());
    assert!(f.topology.disable_gtid(&key("b")).await.is_err());
}

#[tokio::test]
async fn test_errant_gtid_inject_empty() {
    const UUID: &str = "726757ad-4455-11e8-ae04-0242ac110002";
    let f = fleet();
    let mut main = with_gtid(main_instance("m"));
    main.executed_gtid_set = format!("{}:1-100", UUID).parse().unwrap();
    f.driver.add_instance(main);
    let mut replica = with_gtid(replica_of("r", "m", 100));
    replica.gtid_errant = format!("{}:7-8", UUID).parse().unwrap();
    f.driver.add_instance(replica);

    f.topology.errant_gtid_inject_empty(&key("r")).await.unwrap();

    // one empty transaction per errant identifier, on the cluster main
    let injected = f.driver.calls_for("inject-empty-gtid");
    assert_eq!(injected.len(), 2);
    assert!(injected.iter().all(|call| call.key == key("m")));
    let main = f.driver.instance(&key("m")).unwrap();
    assert!(format!("{}:7-8", UUID)
        .parse::<inventory::gtid::GtidSet>()
        .unwrap()
        .contained_in(&main.executed_gtid_set));
}

#[tokio::test]
async fn test_reset_replica_operation() {
    let f = fleet();
    f.driver.add_instance(main_instance("a"));
    f.driver.add_instance(replica_of("b", "a", 100));

    let reset = f.topology.reset_replica_operation(&key("b")).await.unwrap();
    assert!(!reset.is_replica());
    // a reset replica has nothing to restart
    assert!(f.driver.calls_for("start-replica").is_empty());
    assert_eq!(f.audit.entries_for("reset-subordinate").len(), 1);
}
