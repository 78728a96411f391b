//! Tally Core Library
//!
//! Peer-reconciled score ledger for the presentation scoring tool.
//! Every node keeps its own ledger of one submission per student and
//! converges with other nodes over best-effort publish/subscribe messaging:
//! presence-based discovery, full-state sync to new peers, first-writer-wins
//! merges and broadcast fallback when no peer is known.

pub mod types;
pub mod error;
pub mod topics;
pub mod codec;
pub mod ledger;
pub mod peers;
pub mod reconciler;
pub mod transport;
pub mod ws;
pub mod relay;
pub mod config;
pub mod node;

pub use types::*;
pub use error::{MessageError, ScoreError, TransportError};
pub use ledger::Ledger;
pub use peers::PeerDirectory;
pub use reconciler::{Effect, Reconciler};
pub use transport::{MemoryBus, MemoryLink, MemoryTransport, Transport, TransportEvent};
pub use ws::{WsTransport, WsTransportConfig};
pub use relay::{Relay, RelayConfig, RelayStats};
pub use config::NodeConfig;
pub use node::{NodeHandle, NoopObserver, ScoreObserver, ScoringNode};
