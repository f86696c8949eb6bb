//! Deterministic in-process cluster for integration tests.
//!
//! Machines exchange `Directed` messages through a single FIFO queue. Ship
//! commands are turned into append requests by a minimal log shipper that
//! sends the leader's whole suffix after the probed index.

#![allow(dead_code)]

use raft_core::{
    Directed, InMemoryRaftLog, LogIndex, MachineOutput, MemberId, MessageKind, RaftLog,
    RaftMachine, RaftMessage, RaftStateBuilder, ReadableLog, ReadableRaftState,
    ReplicatedContent, Role, ShipCommand, Term,
};
use raft_core::message::AppendEntriesRequest;
use raft_observe::NoopMeter;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("raft_core=debug")
        .try_init();
}

pub fn member(id: &str) -> MemberId {
    MemberId::new(id)
}

pub struct Cluster {
    pub machines: BTreeMap<MemberId, RaftMachine<InMemoryRaftLog>>,
    queue: VecDeque<Directed>,
    /// Last `prev_log_index` shipped per (leader, follower)
    probes: HashMap<(MemberId, MemberId), LogIndex>,
    isolated: BTreeSet<MemberId>,
    /// Every (term, leader) observed after each delivery
    pub leaders_seen: BTreeSet<(Term, MemberId)>,
}

impl Cluster {
    /// Cluster of `ids` with every member a voter.
    pub fn new(ids: &[&str]) -> Self {
        Self::with(ids, |_, builder| builder)
    }

    /// Cluster whose per-member builders are adjusted by `configure(id, builder)`.
    pub fn with<F>(ids: &[&str], configure: F) -> Self
    where
        F: Fn(&str, RaftStateBuilder) -> RaftStateBuilder,
    {
        let machines = ids
            .iter()
            .map(|id| {
                let builder = RaftStateBuilder::new(member(id)).voting_members(ids);
                let state = configure(id, builder).build();
                (member(id), RaftMachine::new(state, 0, Arc::new(NoopMeter)))
            })
            .collect();

        Self {
            machines,
            queue: VecDeque::new(),
            probes: HashMap::new(),
            isolated: BTreeSet::new(),
            leaders_seen: BTreeSet::new(),
        }
    }

    pub fn machine(&self, id: &str) -> &RaftMachine<InMemoryRaftLog> {
        &self.machines[&member(id)]
    }

    pub fn role(&self, id: &str) -> Role {
        self.machine(id).role()
    }

    pub fn term(&self, id: &str) -> Term {
        self.machine(id).state().term()
    }

    pub fn commit_index(&self, id: &str) -> LogIndex {
        self.machine(id).state().commit_index()
    }

    pub fn append_index(&self, id: &str) -> LogIndex {
        self.machine(id).state().log().append_index()
    }

    pub fn leaders(&self) -> Vec<MemberId> {
        self.machines
            .iter()
            .filter(|(_, m)| m.role() == Role::Leader)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Drop all traffic to and from `id`.
    pub fn isolate(&mut self, id: &str) {
        self.isolated.insert(member(id));
    }

    pub fn heal(&mut self) {
        self.isolated.clear();
    }

    pub fn election_timeout(&mut self, id: &str) {
        self.local(id, MessageKind::ElectionTimeout);
    }

    pub fn heartbeat_timeout(&mut self, id: &str) {
        self.local(id, MessageKind::HeartbeatTimeout);
    }

    pub fn submit(&mut self, id: &str, data: &'static str) {
        self.local(id, MessageKind::NewEntryRequest(ReplicatedContent::data(data)));
    }

    /// Deliver a message that does not travel over the network.
    pub fn local(&mut self, id: &str, kind: MessageKind) {
        self.deliver(member(id), RaftMessage::new(member(id), kind));
    }

    /// Deliver queued messages until the queue drains.
    pub fn run(&mut self) {
        while let Some(directed) = self.queue.pop_front() {
            if self.isolated.contains(&directed.to)
                || self.isolated.contains(&directed.message.from)
            {
                continue;
            }
            self.deliver(directed.to, directed.message);
        }
    }

    fn deliver(&mut self, to: MemberId, message: RaftMessage) {
        let Some(machine) = self.machines.get_mut(&to) else {
            return;
        };
        let output = machine
            .handle(message)
            .unwrap_or_else(|e| panic!("{} failed: {}", to, e));

        if machine.role() == Role::Leader {
            self.leaders_seen.insert((machine.state().term(), to.clone()));
        }
        self.dispatch(&to, output);
    }

    fn dispatch(&mut self, from: &MemberId, output: MachineOutput) {
        self.queue.extend(output.messages);
        for command in output.ship_commands {
            self.ship(from, command);
        }
    }

    fn ship(&mut self, leader_id: &MemberId, command: ShipCommand) {
        let leader = &self.machines[leader_id];
        if leader.role() != Role::Leader {
            return;
        }
        let state = leader.state();
        let followers: Vec<MemberId> = state
            .replication_members()
            .iter()
            .filter(|m| *m != leader_id)
            .cloned()
            .collect();

        match command {
            ShipCommand::NewEntries {
                prev_log_index,
                prev_log_term,
                entries,
            } => {
                for follower in followers {
                    let request = AppendEntriesRequest {
                        leader_term: state.term(),
                        prev_log_index,
                        prev_log_term,
                        entries: entries.clone(),
                        leader_commit: state.commit_index(),
                    };
                    self.probes
                        .insert((leader_id.clone(), follower.clone()), prev_log_index);
                    self.queue.push_back(Directed::new(
                        follower,
                        leader_id.clone(),
                        MessageKind::AppendEntriesRequest(request),
                    ));
                }
            }
            ShipCommand::MismatchProgress {
                target,
                last_remote_append_index,
            } => {
                let key = (leader_id.clone(), target.clone());
                let last_probe = self
                    .probes
                    .get(&key)
                    .copied()
                    .unwrap_or(state.log().append_index());
                let prev = last_remote_append_index
                    .min(last_probe.prev())
                    .max(LogIndex::NONE);
                let request = suffix_request(leader, prev);
                self.probes.insert(key, prev);
                self.queue.push_back(Directed::new(
                    target,
                    leader_id.clone(),
                    MessageKind::AppendEntriesRequest(request),
                ));
            }
            ShipCommand::MatchProgress { target, new_index } => {
                if new_index < state.log().append_index() {
                    let request = suffix_request(leader, new_index);
                    self.probes.insert((leader_id.clone(), target.clone()), new_index);
                    self.queue.push_back(Directed::new(
                        target,
                        leader_id.clone(),
                        MessageKind::AppendEntriesRequest(request),
                    ));
                }
            }
            ShipCommand::CommitUpdated => {}
        }
    }

    /// Run a full election for `id` and drain the network.
    pub fn elect(&mut self, id: &str) {
        self.election_timeout(id);
        self.run();
    }
}

/// Append request carrying every entry the leader holds after `prev`.
pub fn suffix_request(
    leader: &RaftMachine<InMemoryRaftLog>,
    prev: LogIndex,
) -> AppendEntriesRequest {
    let state = leader.state();
    let log = state.log();
    let prev_log_term = log.read_entry_term(prev).unwrap();
    let entries = (prev.next().as_i64()..=log.append_index().as_i64())
        .map(|i| log.read_entry(LogIndex(i)).unwrap().unwrap())
        .collect();
    AppendEntriesRequest {
        leader_term: state.term(),
        prev_log_index: prev,
        prev_log_term,
        entries,
        leader_commit: state.commit_index(),
    }
}

/// Terms of every retained entry, in index order.
pub fn log_terms(machine: &RaftMachine<InMemoryRaftLog>) -> Vec<i64> {
    machine
        .state()
        .log()
        .entries()
        .map(|(_, entry)| entry.term.as_i64())
        .collect()
}
