//! Root election, child attachment and root merge negotiation for the mesh.
//!
//! A node boots scanning for an access point advertising the `ROOT ` prefix.
//! Finding none it becomes the root; otherwise it attaches to that root as a
//! child. Roots periodically look for competitors and settle which one
//! restarts. The current role is published through a [`TopologyHandle`] that
//! the router reads to gate root-only and child-only behavior.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod identity;
pub mod mac;
pub mod manager;
pub mod peer;
pub mod state;
pub mod wifi;

pub use error::TopologyError;
pub use identity::{device_name, parse_device_name, NodeIdentity, NAME_PREFIX};
pub use mac::{backoff_delay, compare_mac, MacAddress};
pub use manager::{TopologyConfig, TopologyManager, WifiEvent};
pub use peer::{RootPeer, LOGIN_PATH, NUM_CLIENTS_PATH, YIELD_PATH};
pub use state::{TopologyHandle, TopologyState, TopologyStatus};
pub use wifi::{
    child_ap_name, find_root, root_ap_name, ApConfig, ScanRecord, WifiDriver, WifiMode,
    CHILD_AP_ADDR, DEFAULT_AP_ADDR, MERGE_AP_ADDR, RECEIVER_AP_NAME, ROOT_PREFIX,
};
