//! Agents: who holds leases and records actions.

mod identity;
mod registry;

pub use identity::{
    AgentIdentity, ClientKind, AGENT_ID_VAR, AGENT_TYPE_VAR, AUTO_COORDINATION_VAR, SESSION_LABEL_VAR,
};
pub use registry::{Agent, AgentRegistry, AgentStatus};
pub(crate) use registry::validate_agent_id;
