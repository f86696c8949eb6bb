//! Cluster Tests
//!
//! Multi-member behaviour over a deterministic in-process network:
//! 1. Election - a quorum of votes makes exactly one leader per term
//! 2. Replication - entries reach followers and commit on a quorum
//! 3. Divergence recovery - a deposed leader's uncommitted suffix is replaced
//! 4. Pre-voting - pre-elections never raise terms on their own
//! 5. Leadership refusal - refusing members vote but never stand

mod common;

use common::{init_tracing, log_terms, member, Cluster};
use raft_core::message::{AppendEntriesRequest, AppendEntriesResponse, VoteResponse};
use raft_core::{
    roles, InMemoryRaftLog, LogCommand, LogEntry, LogIndex, MessageKind, RaftMachine,
    RaftLog, RaftMessage, RaftStateBuilder, ReadableLog, ReadableRaftState, ReplicatedContent, Role,
    Term,
};
use raft_observe::NoopMeter;
use std::collections::BTreeMap;
use std::sync::Arc;

#[test]
fn test_three_member_election() {
    init_tracing();
    let mut cluster = Cluster::new(&["a", "b", "c"]);

    cluster.elect("a");

    assert_eq!(cluster.leaders(), vec![member("a")]);
    for id in ["a", "b", "c"] {
        assert_eq!(cluster.term(id), Term(1), "term of {}", id);
        assert_eq!(cluster.append_index(id), LogIndex(0), "barrier on {}", id);
    }
    for id in ["b", "c"] {
        assert_eq!(cluster.role(id), Role::Follower);
        assert_eq!(cluster.machine(id).state().leader(), Some(&member("a")));
        assert_eq!(cluster.machine(id).state().voted_for(), Some(&member("a")));
    }

    let barrier = cluster.machine("a").state().log().read_entry_term(LogIndex(0)).unwrap();
    assert_eq!(barrier, Term(1));
    assert_eq!(cluster.commit_index("a"), LogIndex(0));
}

#[test]
fn test_replication_and_commit_propagation() {
    init_tracing();
    let mut cluster = Cluster::new(&["a", "b", "c"]);
    cluster.elect("a");

    cluster.submit("a", "x");
    cluster.submit("a", "y");
    cluster.run();

    assert_eq!(cluster.commit_index("a"), LogIndex(2));
    for id in ["b", "c"] {
        assert_eq!(cluster.append_index(id), LogIndex(2));
    }

    // Followers learn the final commit from the next heartbeat
    cluster.heartbeat_timeout("a");
    cluster.run();
    for id in ["b", "c"] {
        assert_eq!(cluster.commit_index(id), LogIndex(2), "commit of {}", id);
        assert_eq!(log_terms(cluster.machine(id)), vec![1, 1, 1]);
    }
}

#[test]
fn test_commit_needs_quorum() {
    init_tracing();
    let mut cluster = Cluster::new(&["a", "b", "c"]);
    cluster.elect("a");

    cluster.isolate("b");
    cluster.isolate("c");
    cluster.submit("a", "x");
    cluster.run();

    assert_eq!(cluster.append_index("a"), LogIndex(1));
    assert_eq!(cluster.commit_index("a"), LogIndex(0));

    // One follower is enough for a majority of three
    cluster.heal();
    cluster.isolate("c");
    cluster.submit("a", "y");
    cluster.run();
    assert_eq!(cluster.commit_index("a"), LogIndex(2));
}

#[test]
fn test_deposed_leader_suffix_is_replaced() {
    init_tracing();
    let mut cluster = Cluster::new(&["a", "b", "c"]);
    cluster.elect("a");
    cluster.heartbeat_timeout("a");
    cluster.run();

    // a keeps appending while cut off
    cluster.isolate("a");
    cluster.submit("a", "lost");
    cluster.run();
    assert_eq!(log_terms(cluster.machine("a")), vec![1, 1]);

    cluster.elect("b");
    assert_eq!(cluster.role("b"), Role::Leader);
    assert_eq!(cluster.term("b"), Term(2));

    cluster.submit("b", "kept");
    cluster.run();
    assert_eq!(cluster.commit_index("b"), LogIndex(2));

    cluster.heal();
    cluster.heartbeat_timeout("b");
    cluster.run();
    assert_eq!(cluster.role("a"), Role::Follower);
    assert_eq!(cluster.term("a"), Term(2));
    // a's index 1 disagrees with b's commit position, so nothing commits yet
    assert_eq!(cluster.commit_index("a"), LogIndex(0));

    cluster.submit("b", "more");
    cluster.run();
    cluster.heartbeat_timeout("b");
    cluster.run();

    for id in ["a", "b", "c"] {
        assert_eq!(log_terms(cluster.machine(id)), vec![1, 2, 2, 2], "log of {}", id);
        assert_eq!(cluster.commit_index(id), LogIndex(3), "commit of {}", id);
    }
    let entry = cluster.machine("a").state().log().read_entry(LogIndex(1));
    assert_eq!(
        entry.unwrap().unwrap().content,
        ReplicatedContent::NewLeaderBarrier
    );
}

#[test]
fn test_at_most_one_leader_per_term() {
    init_tracing();
    let ids = ["a", "b", "c", "d", "e"];
    let mut cluster = Cluster::new(&ids);

    // Competing candidates, varying who times out first
    for round in 0..10 {
        let first = ids[round % ids.len()];
        let second = ids[(round * 3 + 1) % ids.len()];
        cluster.election_timeout(first);
        cluster.election_timeout(second);
        cluster.run();
        if round % 3 == 0 {
            cluster.isolate(first);
            cluster.election_timeout(ids[(round + 2) % ids.len()]);
            cluster.run();
            cluster.heal();
        }
    }

    let mut leader_by_term = BTreeMap::new();
    for (term, leader) in &cluster.leaders_seen {
        if let Some(previous) = leader_by_term.insert(*term, leader.clone()) {
            panic!("term {} had leaders {} and {}", term, previous, leader);
        }
    }
    assert!(!leader_by_term.is_empty());
}

#[test]
fn test_candidate_adopts_later_term_from_vote_response() {
    init_tracing();
    let mut cluster = Cluster::with(&["a", "b", "c"], |id, builder| {
        if id == "c" {
            builder.term(Term(5))
        } else {
            builder
        }
    });

    cluster.isolate("b");
    cluster.elect("a");

    assert_eq!(cluster.role("a"), Role::Follower);
    assert_eq!(cluster.term("a"), Term(5));
    assert_eq!(cluster.machine("a").state().voted_for(), None);
    assert!(cluster.machine("a").state().votes_for_me().is_empty());
}

#[test]
fn test_refusing_member_votes_but_never_stands() {
    init_tracing();
    let mut cluster = Cluster::with(&["a", "b", "c"], |id, builder| {
        builder.refuses_to_be_leader(id == "a")
    });

    cluster.elect("a");
    assert_eq!(cluster.role("a"), Role::Follower);
    assert_eq!(cluster.term("a"), Term(0));
    assert!(cluster.leaders().is_empty());

    cluster.elect("b");
    assert_eq!(cluster.leaders(), vec![member("b")]);
    assert_eq!(cluster.machine("a").state().voted_for(), Some(&member("b")));
}

#[test]
fn test_refusing_member_grants_pre_votes_once_its_timer_fired() {
    init_tracing();
    let mut cluster = Cluster::with(&["a", "b", "c"], |id, builder| {
        builder
            .supports_pre_voting(true)
            .refuses_to_be_leader(id == "a")
    });

    cluster.election_timeout("a");
    assert!(cluster.machine("a").state().is_pre_election());
    assert_eq!(cluster.role("a"), Role::Follower);

    cluster.elect("b");
    assert_eq!(cluster.leaders(), vec![member("b")]);
    assert_eq!(cluster.term("b"), Term(1));
    assert!(!cluster.machine("a").state().is_pre_election());
}

#[test]
fn test_pre_election_then_real_election() {
    init_tracing();
    let mut cluster = Cluster::with(&["a", "b", "c"], |_, builder| {
        builder.supports_pre_voting(true)
    });

    // Followers that still hear from a leader ignore pre-votes, so two timers fire
    cluster.election_timeout("a");
    cluster.election_timeout("b");
    assert_eq!(cluster.term("a"), Term(0));
    assert_eq!(cluster.term("b"), Term(0));
    cluster.run();

    assert_eq!(cluster.leaders(), vec![member("a")]);
    for id in ["a", "b", "c"] {
        assert_eq!(cluster.term(id), Term(1), "term of {}", id);
        assert!(!cluster.machine(id).state().is_pre_election());
    }
}

#[test]
fn test_lone_pre_election_does_not_disturb_terms() {
    init_tracing();
    let mut cluster = Cluster::with(&["a", "b", "c"], |_, builder| {
        builder.supports_pre_voting(true)
    });
    cluster.election_timeout("a");
    cluster.election_timeout("b");
    cluster.run();
    assert_eq!(cluster.role("a"), Role::Leader);

    cluster.isolate("a");
    cluster.elect("c");

    assert_eq!(cluster.role("c"), Role::Follower);
    assert!(cluster.machine("c").state().is_pre_election());
    for id in ["b", "c"] {
        assert_eq!(cluster.term(id), Term(1), "term of {}", id);
    }
}

fn follower_machine(log_terms: &[i64]) -> RaftMachine<InMemoryRaftLog> {
    let state = RaftStateBuilder::new(member("f"))
        .voting_members(&["l", "f", "g"])
        .term(Term(2))
        .entry_log(InMemoryRaftLog::with_terms(log_terms))
        .build();
    RaftMachine::new(state, 0, Arc::new(NoopMeter))
}

fn append_request(prev_index: i64, prev_term: i64, entry_terms: &[i64]) -> RaftMessage {
    RaftMessage::new(
        member("l"),
        MessageKind::AppendEntriesRequest(AppendEntriesRequest {
            leader_term: Term(2),
            prev_log_index: LogIndex(prev_index),
            prev_log_term: Term(prev_term),
            entries: entry_terms
                .iter()
                .map(|t| LogEntry::new(Term(*t), ReplicatedContent::data("new")))
                .collect(),
            leader_commit: LogIndex::NONE,
        }),
    )
}

fn only_append_response(messages: &[raft_core::Directed]) -> AppendEntriesResponse {
    assert_eq!(messages.len(), 1);
    match &messages[0].message.kind {
        MessageKind::AppendEntriesResponse(response) => *response,
        other => panic!("expected append response, got {:?}", other),
    }
}

#[test]
fn test_mismatch_then_retry_from_earlier_index() {
    init_tracing();
    let mut follower = follower_machine(&[1, 1, 1, 1, 1, 1]);

    let output = follower.handle(append_request(5, 2, &[2])).unwrap();
    let response = only_append_response(&output.messages);
    assert!(!response.success);
    assert_eq!(response.append_index, LogIndex(5));
    assert_eq!(follower.state().log().append_index(), LogIndex(5));

    let output = follower.handle(append_request(4, 1, &[2, 2])).unwrap();
    let response = only_append_response(&output.messages);
    assert!(response.success);
    assert_eq!(response.match_index, LogIndex(6));
    assert_eq!(log_terms(&follower), vec![1, 1, 1, 1, 1, 2, 2]);
}

#[test]
fn test_repeated_append_request_is_idempotent() {
    init_tracing();
    let mut follower = follower_machine(&[1, 1, 2]);
    let request = append_request(1, 1, &[2, 2, 2]);

    let first = follower.handle(request.clone()).unwrap();
    let after_first = log_terms(&follower);
    let second = follower.handle(request).unwrap();

    assert_eq!(after_first, vec![1, 1, 2, 2, 2]);
    assert_eq!(log_terms(&follower), after_first);
    assert_eq!(
        only_append_response(&first.messages),
        only_append_response(&second.messages)
    );
}

#[test]
fn test_quorum_commit_with_four_voters() {
    init_tracing();
    let mut state = RaftStateBuilder::new(member("l"))
        .voting_members(&["l", "f1", "f2", "f3"])
        .term(Term(2))
        .leader(member("l"))
        .commit_index(LogIndex(3))
        .last_log_index_before_becoming_leader(LogIndex(3))
        .entry_log(InMemoryRaftLog::with_terms(&[1, 1, 1, 1, 2, 2, 2, 2]))
        .build();

    let respond = |from: &str, match_index: i64| {
        RaftMessage::new(
            member(from),
            MessageKind::AppendEntriesResponse(AppendEntriesResponse {
                term: Term(2),
                success: true,
                match_index: LogIndex(match_index),
                append_index: LogIndex(match_index),
            }),
        )
    };

    let outcome = roles::handle(Role::Leader, &respond("f1", 7), &state).unwrap();
    state.update(&outcome).unwrap();
    assert_eq!(state.commit_index(), LogIndex(3));

    let outcome = roles::handle(Role::Leader, &respond("f3", 4), &state).unwrap();
    state.update(&outcome).unwrap();
    assert_eq!(state.commit_index(), LogIndex(4));

    let outcome = roles::handle(Role::Leader, &respond("f2", 7), &state).unwrap();
    state.update(&outcome).unwrap();
    assert_eq!(state.commit_index(), LogIndex(7));
    assert_eq!(state.follower_states().get(&member("f3")).match_index, LogIndex(4));
}

#[test]
fn test_stale_vote_response_after_election_is_ignored() {
    init_tracing();
    let mut cluster = Cluster::new(&["a", "b", "c"]);
    cluster.elect("a");

    let outcome = roles::handle(
        Role::Leader,
        &RaftMessage::new(
            member("c"),
            MessageKind::VoteResponse(VoteResponse {
                term: Term(1),
                vote_granted: true,
            }),
        ),
        cluster.machine("a").state(),
    )
    .unwrap();

    assert_eq!(outcome.role(), Role::Leader);
    assert!(outcome.outgoing_messages().is_empty());
    assert!(outcome.log_commands().is_empty());
}

#[test]
fn test_prune_request_compacts_every_role() {
    init_tracing();
    let mut cluster = Cluster::new(&["a", "b", "c"]);
    cluster.elect("a");
    cluster.submit("a", "x");
    cluster.submit("a", "y");
    cluster.run();

    let prune = MessageKind::PruneRequest {
        prune_index: LogIndex(1),
    };
    let outcome = roles::handle(
        Role::Leader,
        &RaftMessage::new(member("admin"), prune.clone()),
        cluster.machine("a").state(),
    )
    .unwrap();
    assert_eq!(
        outcome.log_commands(),
        &[LogCommand::Prune {
            up_to: LogIndex(1)
        }]
    );

    cluster.local("b", prune);
    assert_eq!(cluster.machine("b").state().log().prev_index(), LogIndex(1));
    assert_eq!(cluster.append_index("b"), LogIndex(2));
}
