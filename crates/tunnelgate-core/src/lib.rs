pub mod config;
pub mod error;
pub mod id;
pub mod pool;
pub mod registry;
pub mod socket;
pub mod tunnel;

pub use error::{Result, TunnelError};
pub use pool::TunnelSocketPool;
pub use registry::{ClientRegistry, CreateOptions, CreateResult, RegistryStats};
pub use socket::TunnelSocket;
pub use tunnel::{ClientTunnel, TunnelState};
