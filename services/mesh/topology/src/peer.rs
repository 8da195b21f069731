//! HTTP exchanges with the root at the default AP address.

use crate::TopologyError;
use async_trait::async_trait;

/// Login path on a root
pub const LOGIN_PATH: &str = "/api/users/login";
/// Station count path on a root
pub const NUM_CLIENTS_PATH: &str = "/api_num_clients";
/// Yield request path on a root
pub const YIELD_PATH: &str = "/no_you_restart";

/// The root this node is attached to, or a competing root during a merge
#[async_trait]
pub trait RootPeer: Send + Sync {
    /// Log in with the configured credentials and return the mesh token
    async fn login(&self) -> Result<String, TopologyError>;

    /// Number of stations attached to the peer's access point
    async fn connected_clients(&self) -> Result<usize, TopologyError>;

    /// Ask the peer to restart and give up its root role
    async fn ask_to_yield(&self) -> Result<(), TopologyError>;
}
