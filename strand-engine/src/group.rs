//! Consumer group coordination.
//!
//! Members are keyed by consumer name. A rebalance recomputes the whole
//! assignment from the current subscriptions; the engine then delivers
//! `Revoke` to every member holding partitions before any member sees its
//! new `Assign`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use strand_core::TopicPartition;

/// Strategy used to distribute partitions among members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum AssignmentStrategy {
    /// Contiguous partition ranges per topic
    #[default]
    Range,
    /// All partitions dealt out across members in turn
    RoundRobin,
}

impl AssignmentStrategy {
    /// First recognised entry of a `partition.assignment.strategy` value.
    pub(crate) fn from_config(value: &str) -> Self {
        match value.split(',').next().map(str::trim) {
            Some("roundrobin") => Self::RoundRobin,
            _ => Self::Range,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Member {
    pub handle: usize,
    pub subscription: Vec<String>,
    pub assignment: Vec<TopicPartition>,
}

#[derive(Debug, Default)]
pub(crate) struct Group {
    pub generation: u64,
    pub strategy: AssignmentStrategy,
    pub members: BTreeMap<String, Member>,
}

impl Group {
    pub(crate) fn subscribed_topics(&self) -> BTreeSet<String> {
        self.members
            .values()
            .flat_map(|m| m.subscription.iter().cloned())
            .collect()
    }

    /// Compute the next generation's assignment from the current membership.
    /// `partition_count` reports how many partitions an existing topic has.
    pub(crate) fn compute(
        &self,
        partition_count: impl Fn(&str) -> Option<usize>,
    ) -> HashMap<String, Vec<TopicPartition>> {
        let subscriptions: Vec<(String, Vec<String>)> = self
            .members
            .iter()
            .map(|(id, m)| (id.clone(), m.subscription.clone()))
            .collect();

        let topics: BTreeMap<String, usize> = self
            .subscribed_topics()
            .into_iter()
            .filter_map(|t| partition_count(&t).map(|n| (t, n)))
            .collect();

        match self.strategy {
            AssignmentStrategy::Range => assign_range(&topics, &subscriptions),
            AssignmentStrategy::RoundRobin => assign_round_robin(&topics, &subscriptions),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn partition_id(idx: usize) -> i32 {
    idx as i32
}

/// Range assignment: per topic, the subscribed members (sorted) each take a
/// contiguous run; the first `partitions % members` get one extra.
pub(crate) fn assign_range(
    topics: &BTreeMap<String, usize>,
    members: &[(String, Vec<String>)],
) -> HashMap<String, Vec<TopicPartition>> {
    let mut assignments: HashMap<String, Vec<TopicPartition>> =
        members.iter().map(|(m, _)| (m.clone(), Vec::new())).collect();

    for (topic, &partitions) in topics {
        let mut subscribed: Vec<&String> = members
            .iter()
            .filter(|(_, subs)| subs.contains(topic))
            .map(|(m, _)| m)
            .collect();
        if subscribed.is_empty() {
            continue;
        }
        subscribed.sort();

        let per_member = partitions / subscribed.len();
        let remainder = partitions % subscribed.len();

        let mut next = 0;
        for (idx, member) in subscribed.iter().enumerate() {
            let count = per_member + usize::from(idx < remainder);
            if let Some(owned) = assignments.get_mut(*member) {
                for p in next..next + count {
                    owned.push(TopicPartition::new(topic.clone(), partition_id(p)));
                }
            }
            next += count;
        }
    }

    assignments
}

/// Round-robin assignment: every (topic, partition) in sorted order goes to
/// the next subscribed member in turn.
pub(crate) fn assign_round_robin(
    topics: &BTreeMap<String, usize>,
    members: &[(String, Vec<String>)],
) -> HashMap<String, Vec<TopicPartition>> {
    let mut assignments: HashMap<String, Vec<TopicPartition>> =
        members.iter().map(|(m, _)| (m.clone(), Vec::new())).collect();

    let mut sorted: Vec<&(String, Vec<String>)> = members.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    if sorted.is_empty() {
        return assignments;
    }

    let mut cursor = 0usize;
    for (topic, &partitions) in topics {
        for p in 0..partitions {
            // Skip members not subscribed to this topic
            for step in 0..sorted.len() {
                let (member, subs) = sorted[(cursor + step) % sorted.len()];
                if subs.contains(topic) {
                    if let Some(owned) = assignments.get_mut(member) {
                        owned.push(TopicPartition::new(topic.clone(), partition_id(p)));
                    }
                    cursor = (cursor + step + 1) % sorted.len();
                    break;
                }
            }
        }
    }

    assignments
}
