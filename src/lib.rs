pub mod ant;
pub mod api;
pub mod client;
pub mod config;
pub mod daemon;
pub mod error;
pub mod farm;
pub mod group;
pub mod jobs;
pub mod log;
pub mod util;

pub use ant::{Ant, AntHandle, AntInfo, AntStatus};
pub use client::NodeClient;
pub use config::{AntConfig, AntSpec, FarmConfig};
pub use error::{Error, Result};
pub use farm::{AntFarm, SyncReport};
pub use group::TaskGroup;
