use std::cmp::{Ordering, Reverse};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use zw_domain::NodeId;
use zw_protocol::Message;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Priority classes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Priority class of a transaction. Lower is more urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    /// Traffic between host and controller only.
    Controller,
    /// User-initiated commands.
    Immediate,
    /// Traffic for a node that just woke up.
    WakeUp,
    /// Interview queries.
    NodeQuery,
    /// Background value polling.
    Poll,
}

impl MessagePriority {
    pub const ALL: [Self; 5] = [
        Self::Controller,
        Self::Immediate,
        Self::WakeUp,
        Self::NodeQuery,
        Self::Poll,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Immediate => "immediate",
            Self::WakeUp => "wake_up",
            Self::NodeQuery => "node_query",
            Self::Poll => "poll",
        }
    }
}

impl fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who a transaction is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// The host's own controller.
    Controller,
    Node(NodeId),
}

impl Target {
    pub fn node(self) -> Option<NodeId> {
        match self {
            Self::Controller => None,
            Self::Node(id) => Some(id),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Controller => f.write_str("controller"),
            Self::Node(id) => write!(f, "node {id}"),
        }
    }
}

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// One outbound message waiting for the transmission slot.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    /// Creation order, unique per process.
    pub seq: u64,
    pub target: Target,
    pub message: Message,
    pub priority: MessagePriority,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(target: Target, message: Message, priority: MessagePriority) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: NEXT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            target,
            message,
            priority,
            created_at: Utc::now(),
        }
    }

    pub fn to_node(node: NodeId, message: Message, priority: MessagePriority) -> Self {
        Self::new(Target::Node(node), message, priority)
    }

    /// Ordering key of this transaction given its target's current state.
    pub fn sort_key(&self, state: TargetState) -> SortKey {
        let state = match self.target {
            Target::Controller => TargetState::CONTROLLER,
            Target::Node(_) => state,
        };
        SortKey {
            asleep: state.asleep,
            priority: self.priority,
            unresponsive_query: self.priority == MessagePriority::NodeQuery && !state.listening,
            created_at: Reverse(self.created_at),
            seq: Reverse(self.seq),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Comparator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the comparator needs to know about a transaction's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetState {
    /// Reachability is currently `Asleep`.
    pub asleep: bool,
    /// Listening or frequently listening.
    pub listening: bool,
}

impl TargetState {
    pub const CONTROLLER: Self = Self {
        asleep: false,
        listening: true,
    };
}

/// Lexicographic ordering key; the smallest key is sent first.
///
/// Field order is significant: targets that are asleep go last, then the
/// priority class decides, then node queries to listening targets beat node
/// queries to the others, and remaining ties go to the newest transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    asleep: bool,
    priority: MessagePriority,
    unresponsive_query: bool,
    created_at: Reverse<DateTime<Utc>>,
    seq: Reverse<u64>,
}

/// Most urgent first. `Ordering::Less` means `a` is sent before `b`.
pub fn compare(
    a: &Transaction,
    a_state: TargetState,
    b: &Transaction,
    b_state: TargetState,
) -> Ordering {
    a.sort_key(a_state).cmp(&b.sort_key(b_state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tx(node: u16, priority: MessagePriority) -> Transaction {
        Transaction::to_node(NodeId(node), Message::NoOperation, priority)
    }

    const AWAKE_LISTENING: TargetState = TargetState {
        asleep: false,
        listening: true,
    };
    const AWAKE_SLEEPY: TargetState = TargetState {
        asleep: false,
        listening: false,
    };
    const ASLEEP: TargetState = TargetState {
        asleep: true,
        listening: false,
    };

    #[test]
    fn asleep_target_goes_after_awake_one() {
        let wake = tx(2, MessagePriority::WakeUp);
        let poll = tx(3, MessagePriority::Poll);
        assert_eq!(compare(&wake, ASLEEP, &poll, AWAKE_LISTENING), Ordering::Greater);
        assert_eq!(compare(&poll, AWAKE_LISTENING, &wake, ASLEEP), Ordering::Less);
    }

    #[test]
    fn node_query_prefers_listening_target_regardless_of_age() {
        let sleepy = tx(5, MessagePriority::NodeQuery);
        let listening = tx(6, MessagePriority::NodeQuery);
        // The listening target's transaction is older here.
        let mut listening_old = listening.clone();
        listening_old.created_at = sleepy.created_at - Duration::seconds(10);

        assert_eq!(
            compare(&listening_old, AWAKE_LISTENING, &sleepy, AWAKE_SLEEPY),
            Ordering::Less
        );
        assert_eq!(
            compare(&sleepy, AWAKE_SLEEPY, &listening, AWAKE_LISTENING),
            Ordering::Greater
        );
    }

    #[test]
    fn priority_class_decides_otherwise() {
        let immediate = tx(2, MessagePriority::Immediate);
        let poll = tx(2, MessagePriority::Poll);
        assert_eq!(
            compare(&immediate, AWAKE_LISTENING, &poll, AWAKE_LISTENING),
            Ordering::Less
        );
    }

    #[test]
    fn newest_wins_ties() {
        let first = tx(2, MessagePriority::Poll);
        let mut second = tx(2, MessagePriority::Poll);
        second.created_at = first.created_at + Duration::milliseconds(5);
        assert_eq!(
            compare(&second, AWAKE_LISTENING, &first, AWAKE_LISTENING),
            Ordering::Less
        );

        // Same timestamp: the later sequence number wins.
        let mut third = tx(2, MessagePriority::Poll);
        third.created_at = first.created_at;
        assert_eq!(
            compare(&third, AWAKE_LISTENING, &first, AWAKE_LISTENING),
            Ordering::Less
        );
    }

    #[test]
    fn controller_target_is_never_asleep() {
        let ctrl = Transaction::new(
            Target::Controller,
            Message::GetProtocolInfo { node_id: NodeId(5) },
            MessagePriority::Controller,
        );
        let key = ctrl.sort_key(ASLEEP);
        assert_eq!(key, ctrl.sort_key(TargetState::CONTROLLER));
        let node = tx(2, MessagePriority::Immediate);
        assert_eq!(compare(&ctrl, ASLEEP, &node, AWAKE_LISTENING), Ordering::Less);
    }

    /// Every combination of priority, sleep state, listening state and two
    /// timestamps; checks the order is a strict weak ordering.
    #[test]
    fn comparator_is_a_strict_weak_ordering() {
        let base = Utc::now();
        let states = [
            AWAKE_LISTENING,
            AWAKE_SLEEPY,
            ASLEEP,
            TargetState {
                asleep: true,
                listening: true,
            },
        ];
        let mut items = Vec::new();
        for priority in MessagePriority::ALL {
            for state in states {
                for offset in [0, 1] {
                    let mut t = tx(7, priority);
                    t.created_at = base + Duration::seconds(offset);
                    items.push((t, state));
                }
            }
        }

        let cmp = |i: usize, j: usize| {
            let (a, sa) = &items[i];
            let (b, sb) = &items[j];
            compare(a, *sa, b, *sb)
        };
        let n = items.len();
        for i in 0..n {
            assert_eq!(cmp(i, i), Ordering::Equal, "irreflexive");
            for j in 0..n {
                assert_eq!(cmp(i, j), cmp(j, i).reverse(), "antisymmetric");
                for k in 0..n {
                    if cmp(i, j) == Ordering::Less && cmp(j, k) == Ordering::Less {
                        assert_eq!(cmp(i, k), Ordering::Less, "transitive: {i} {j} {k}");
                    }
                }
            }
        }
    }
}
