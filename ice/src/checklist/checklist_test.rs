use super::*;
use crate::candidate::Candidate;

fn candidate(kind: CandidateType, component: u16, addr: &str) -> Candidate {
    let mut c = Candidate::new(kind, component, addr.parse().unwrap());
    c.compute_priority();
    c.compute_foundation();
    c
}

fn pair(local: Candidate, remote: Candidate) -> CandidatePair {
    CandidatePair::new(local, remote, true)
}

#[test]
fn test_priority_order_is_non_increasing() {
    let mut list = CheckList::new();
    list.add(pair(
        candidate(CandidateType::Relay, 1, "198.51.100.1:49152"),
        candidate(CandidateType::Host, 1, "203.0.113.7:50000"),
    ));
    list.add(pair(
        candidate(CandidateType::Host, 1, "192.168.1.10:50000"),
        candidate(CandidateType::Host, 1, "203.0.113.7:50000"),
    ));
    list.add(pair(
        candidate(CandidateType::ServerReflexive, 1, "203.0.113.5:40000"),
        candidate(CandidateType::Host, 1, "203.0.113.7:50000"),
    ));

    let priorities: Vec<u64> = list.pairs().iter().map(|p| p.priority).collect();
    let mut sorted = priorities.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(priorities, sorted);
}

#[test]
fn test_prune_replaces_srflx_local_with_base() {
    let mut srflx = candidate(CandidateType::ServerReflexive, 1, "203.0.113.5:40000");
    srflx.base = "192.168.1.10:50000".parse().unwrap();

    let mut list = CheckList::new();
    list.add(pair(
        srflx,
        candidate(CandidateType::Host, 1, "203.0.113.7:50000"),
    ));
    list.prune(100, false);

    assert_eq!(list.pairs()[0].local.kind, CandidateType::Host);
    assert_eq!(
        list.pairs()[0].local.addr,
        "192.168.1.10:50000".parse().unwrap()
    );
}

#[test]
fn test_prune_removes_duplicates() {
    let host = candidate(CandidateType::Host, 1, "192.168.1.10:50000");
    let mut srflx = candidate(CandidateType::ServerReflexive, 1, "203.0.113.5:40000");
    srflx.base = host.addr;
    let remote = candidate(CandidateType::Host, 1, "203.0.113.7:50000");

    let mut list = CheckList::new();
    list.add(pair(host, remote.clone()));
    // collapses onto the same host base, same remote: a duplicate
    list.add(pair(srflx, remote));
    list.prune(100, false);

    assert_eq!(list.len(), 1);
}

#[test]
fn test_prune_drops_relayed_to_private_remote() {
    let mut list = CheckList::new();
    list.add(pair(
        candidate(CandidateType::Relay, 1, "198.51.100.1:49152"),
        candidate(CandidateType::Host, 1, "192.168.1.44:50000"),
    ));
    list.add(pair(
        candidate(CandidateType::Relay, 1, "198.51.100.1:49152"),
        candidate(CandidateType::Host, 1, "203.0.113.7:50000"),
    ));
    list.prune(100, false);

    assert_eq!(list.len(), 1);
    assert!(net::is_public(&list.pairs()[0].remote.addr.ip()));
}

#[test]
fn test_prune_puts_lan_pairs_first_and_caps() {
    let mut list = CheckList::new();
    list.add(pair(
        candidate(CandidateType::ServerReflexive, 1, "203.0.113.5:40000"),
        candidate(CandidateType::ServerReflexive, 1, "203.0.113.7:40000"),
    ));
    list.add(pair(
        candidate(CandidateType::Host, 1, "192.168.1.10:50000"),
        candidate(CandidateType::Host, 1, "10.0.0.1:50000"),
    ));
    list.prune(1, false);

    assert_eq!(list.len(), 1);
    assert!(list.pairs()[0].is_lan_only());
}

#[test]
fn test_find_best_valid_prefers_lan() {
    let mut lan = pair(
        candidate(CandidateType::Host, 1, "192.168.1.10:50000"),
        candidate(CandidateType::Host, 1, "10.0.0.1:50000"),
    );
    lan.role = PairRole::Valid;
    let mut reflexive = pair(
        candidate(CandidateType::ServerReflexive, 1, "203.0.113.5:40000"),
        candidate(CandidateType::ServerReflexive, 1, "203.0.113.7:40000"),
    );
    reflexive.role = PairRole::Valid;

    let mut list = CheckList::new();
    // the reflexive pair sorts first (host pref on both sides of the LAN
    // pair is irrelevant here: reflexive remote priority is lower), so put
    // both in and ask for the best
    list.add(reflexive);
    list.add(lan);

    let best = list.find_best_valid(1).unwrap();
    assert!(list.pairs()[best].is_lan_only());
}

#[test]
fn test_unfreeze_foundation() {
    let mut a = pair(
        candidate(CandidateType::Host, 1, "192.168.1.10:50000"),
        candidate(CandidateType::Host, 1, "10.0.0.1:50000"),
    );
    a.state = PairState::Frozen;
    let mut b = pair(
        candidate(CandidateType::Host, 2, "192.168.1.10:50001"),
        candidate(CandidateType::Host, 2, "10.0.0.1:50001"),
    );
    b.state = PairState::Frozen;

    // same base + type on both sides: the same foundation pair
    let foundation = a.foundation.clone();
    assert_eq!(foundation, b.foundation);

    let mut list = CheckList::new();
    list.add(a);
    list.add(b);
    list.unfreeze_foundation(&foundation);

    assert!(list.pairs().iter().all(|p| p.state == PairState::Waiting));
}

#[test]
fn test_update_state_detects_exhaustion() {
    let mut list = CheckList::new();
    list.update_state();
    assert_eq!(list.state(), CheckListState::Running); // empty list stays running

    let mut p = pair(
        candidate(CandidateType::Host, 1, "192.168.1.10:50000"),
        candidate(CandidateType::Host, 1, "10.0.0.1:50000"),
    );
    p.state = PairState::Failed;
    list.add(p);
    list.update_state();
    assert_eq!(list.state(), CheckListState::Failed);
}

#[test]
fn test_find_equal_pair_host_leniency() {
    let mut list = CheckList::new();
    let local = candidate(CandidateType::Host, 1, "192.168.1.10:50000");
    let remote = candidate(CandidateType::Host, 1, "10.0.0.1:50000");
    list.add(pair(local.clone(), remote.clone()));

    // the probe's local external port differs (the implementation bound a
    // specific port); host locals still match through their base
    let mut probe_local = local.clone();
    probe_local.addr = "192.168.1.10:60000".parse().unwrap();
    probe_local.base = local.base;
    let probe = pair(probe_local, remote);

    assert!(list.find_equal_pair(&probe, PairMatch::TreatHostAsUniform).is_some());
    assert!(list.find_equal_pair(&probe, PairMatch::Strict).is_none());
}

#[test]
fn test_remove_pairs_retires_role() {
    let mut list = CheckList::new();
    let mut p = pair(
        candidate(CandidateType::Host, 1, "192.168.1.10:50000"),
        candidate(CandidateType::Host, 1, "10.0.0.1:50000"),
    );
    p.state = PairState::Waiting;
    list.add(p);

    list.remove_pairs(PairState::Waiting, 1);
    assert_eq!(list.pairs()[0].role, PairRole::None);
    assert!(list.find_valid(1).is_none());
}
