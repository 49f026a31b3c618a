#[macro_use]
extern crate log;
#[macro_use]
extern crate utils;

pub mod consensus_agent;
pub mod error;
pub mod inv_request_manager;
pub mod policy;

pub use self::consensus_agent::{ConsensusAgent, ConsensusAgentConfig, ConsensusAgentEvent};
pub use self::error::{ProofError, RequestError};
pub use self::inv_request_manager::{InvRequestManager, InventoryManager, VectorRequester};
pub use self::policy::ConsensusPolicy;
