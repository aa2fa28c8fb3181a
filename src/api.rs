//! Typed payloads of the daemon control API.
//!
//! Field names follow the daemon's lower-case JSON keys. Lists the daemon
//! encodes as `null` when empty are read as empty vectors.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Hastings per coin.
pub const COIN_PRECISION: u128 = 1_000_000_000_000_000_000_000_000;

/// An amount of currency in hastings. Encoded on the wire as a decimal string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(pub u128);

impl Currency {
    pub const ZERO: Currency = Currency(0);

    /// `coins` whole coins. Panics on overflow; meant for constants.
    pub const fn from_coins(coins: u64) -> Self {
        Currency(coins as u128 * COIN_PRECISION)
    }

    /// `coins` whole coins, or `None` if that many hastings overflow.
    pub fn checked_from_coins(coins: u64) -> Option<Self> {
        (coins as u128).checked_mul(COIN_PRECISION).map(Currency)
    }

    pub fn hastings(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / COIN_PRECISION;
        let frac = (self.0 % COIN_PRECISION) / (COIN_PRECISION / 1000);
        write!(f, "{}.{:03} SC", whole, frac)
    }
}

impl FromStr for Currency {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u128>().map(Currency)
    }
}

impl TryFrom<String> for Currency {
    type Error = ParseIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0.to_string()
    }
}

/// Opaque block identifier. Never interpreted beyond equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub String);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self {
        BlockId(s.to_string())
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Error body returned by the daemon on non-2xx responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsensusInfo {
    #[serde(default)]
    pub synced: bool,
    pub height: u64,
    pub currentblock: BlockId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletInitResponse {
    pub primaryseed: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletInfo {
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub unlocked: bool,
    #[serde(default)]
    pub confirmedsiacoinbalance: Currency,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletAddress {
    pub address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayPeer {
    pub netaddress: String,
    #[serde(default)]
    pub inbound: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayInfo {
    #[serde(default)]
    pub netaddress: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub peers: Vec<GatewayPeer>,
}

impl GatewayInfo {
    pub fn has_peer(&self, addr: &str) -> bool {
        self.peers.iter().any(|p| p.netaddress == addr)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostFinancialMetrics {
    #[serde(default)]
    pub storagerevenue: Currency,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(default)]
    pub financialmetrics: HostFinancialMetrics,
}

pub const OBLIGATION_SUCCEEDED: &str = "obligationSucceeded";
pub const OBLIGATION_FAILED: &str = "obligationFailed";
pub const OBLIGATION_REJECTED: &str = "obligationRejected";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostContract {
    pub obligationid: String,
    #[serde(default)]
    pub obligationstatus: String,
    #[serde(default)]
    pub proofdeadline: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostContracts {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub contracts: Vec<HostContract>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenterFile {
    pub siapath: String,
    #[serde(default)]
    pub filesize: u64,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub uploadprogress: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenterFiles {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub files: Vec<RenterFile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub siapath: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub filesize: u64,
    #[serde(default)]
    pub received: u64,
}

impl DownloadInfo {
    pub fn is_complete(&self) -> bool {
        self.received == self.filesize
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenterDownloads {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub downloads: Vec<DownloadInfo>,
}
