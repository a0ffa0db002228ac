//! Party module: pre-match grouping held in the shared store.
//!
//! Parties carry roles (leader, IGL, anchor), invites, readiness and queue
//! status. Any server process can read or mutate them through
//! [`PartyCoordinator`].

pub mod coordinator;
pub mod keys;
pub mod types;

pub use coordinator::{LeaderPresence, PartyCoordinator, PartyError, PartyRepair};
pub use types::{
    InviteMode, OpponentKind, PartyInvite, PartyMember, PartyQueueState, PartyState, PartyView,
    QueueStatus,
};
