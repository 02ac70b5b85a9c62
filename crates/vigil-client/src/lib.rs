//! # vigil-client
//!
//! Hub-side client for vigil agents.
//!
//! ```ignore
//! use vigil_client::HubClient;
//!
//! # async fn example() -> vigil_client::Result<()> {
//! let mut client = HubClient::connect("/run/vigil/agent.sock".as_ref()).await?;
//! let identity = client.verify("hub-token", true).await?;
//! let stats = client.system_stats(5000).await?;
//! println!("{} load {:?}", identity.fingerprint, stats.load_avg);
//! # Ok(())
//! # }
//! ```

mod client;
mod error;

pub use client::HubClient;
pub use error::{ClientError, Result};
