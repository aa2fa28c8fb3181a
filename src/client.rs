//! HTTP client for one daemon's control API.
//!
//! Every call is fallible. Callers on a startup path propagate errors; job
//! and monitor code logs them and carries on.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::api::{
    ApiErrorBody, ConsensusInfo, Currency, GatewayInfo, HostContracts, HostInfo, RenterDownloads,
    RenterFiles, WalletAddress, WalletInfo, WalletInitResponse,
};
use crate::error::{Error, Result};
use crate::util::dialable;

/// The daemon rejects requests without this user agent.
pub const USER_AGENT: &str = "Sia-Agent";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct NodeClient {
    addr: String,
    base_url: String,
    http: Client,
}

impl NodeClient {
    /// Create a client for the daemon listening on `addr` (`host:port` or `:port`).
    pub fn new(addr: &str) -> Result<Self> {
        Self::with_timeout(addr, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            addr: addr.to_string(),
            base_url: format!("http://{}", dialable(addr)),
            http,
        })
    }

    /// The API address this client talks to, as configured.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(parsed) if !parsed.message.is_empty() => parsed.message,
            _ if !body.trim().is_empty() => body.trim().to_string(),
            _ => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// GET `path` and decode the JSON body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        trace!("GET {}{}", self.addr, path);
        let resp = self.send(self.http.get(self.url(path))).await?;
        Ok(resp.json().await?)
    }

    /// GET `path`, discarding the body.
    pub async fn get_unit(&self, path: &str) -> Result<()> {
        trace!("GET {}{}", self.addr, path);
        self.send(self.http.get(self.url(path))).await?;
        Ok(())
    }

    async fn get_unit_query(&self, path: &str, query: &[(&str, &str)]) -> Result<()> {
        trace!("GET {}{} {:?}", self.addr, path, query);
        self.send(self.http.get(self.url(path)).query(query)).await?;
        Ok(())
    }

    /// POST a form-encoded body, discarding the response body.
    pub async fn post_form(&self, path: &str, form: &[(&str, String)]) -> Result<()> {
        trace!("POST {}{}", self.addr, path);
        self.send(self.http.post(self.url(path)).form(form)).await?;
        Ok(())
    }

    /// POST a form-encoded body and decode the JSON response.
    pub async fn post_form_json<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T> {
        trace!("POST {}{}", self.addr, path);
        let resp = self.send(self.http.post(self.url(path)).form(form)).await?;
        Ok(resp.json().await?)
    }

    // Consensus and daemon

    pub async fn consensus(&self) -> Result<ConsensusInfo> {
        self.get("/consensus").await
    }

    pub async fn daemon_stop(&self) -> Result<()> {
        self.get_unit("/daemon/stop").await
    }

    // Wallet

    pub async fn wallet_init(&self) -> Result<WalletInitResponse> {
        self.post_form_json("/wallet/init", &[]).await
    }

    pub async fn wallet_unlock(&self, password: &str) -> Result<()> {
        self.post_form(
            "/wallet/unlock",
            &[
                ("encryptionpassword", password.to_string()),
                ("dictionary", "english".to_string()),
            ],
        )
        .await
    }

    pub async fn wallet(&self) -> Result<WalletInfo> {
        self.get("/wallet").await
    }

    pub async fn confirmed_balance(&self) -> Result<Currency> {
        Ok(self.wallet().await?.confirmedsiacoinbalance)
    }

    pub async fn wallet_address(&self) -> Result<String> {
        Ok(self.get::<WalletAddress>("/wallet/address").await?.address)
    }

    pub async fn send_siacoins(&self, amount: Currency, destination: &str) -> Result<()> {
        self.post_form(
            "/wallet/siacoins",
            &[
                ("amount", amount.hastings().to_string()),
                ("destination", destination.to_string()),
            ],
        )
        .await
    }

    // Miner

    pub async fn miner_start(&self) -> Result<()> {
        self.get_unit("/miner/start").await
    }

    pub async fn miner_stop(&self) -> Result<()> {
        self.get_unit("/miner/stop").await
    }

    // Gateway

    pub async fn gateway(&self) -> Result<GatewayInfo> {
        self.get("/gateway").await
    }

    pub async fn gateway_connect(&self, peer_addr: &str) -> Result<()> {
        self.post_form(&format!("/gateway/connect/{}", peer_addr), &[])
            .await
    }

    // Host

    pub async fn host(&self) -> Result<HostInfo> {
        self.get("/host").await
    }

    pub async fn host_contracts(&self) -> Result<HostContracts> {
        self.get("/host/contracts").await
    }

    pub async fn host_add_storage_folder(&self, path: &str, size: u64) -> Result<()> {
        self.post_form(
            "/host/storage/folders/add",
            &[("path", path.to_string()), ("size", size.to_string())],
        )
        .await
    }

    pub async fn host_announce(&self) -> Result<()> {
        self.post_form("/host/announce", &[]).await
    }

    pub async fn host_accept_contracts(&self) -> Result<()> {
        self.post_form("/host", &[("acceptingcontracts", "true".to_string())])
            .await
    }

    // Renter

    pub async fn renter_set_allowance(&self, funds: Currency, period: u64) -> Result<()> {
        self.post_form(
            "/renter",
            &[
                ("funds", funds.hastings().to_string()),
                ("period", period.to_string()),
            ],
        )
        .await
    }

    pub async fn renter_files(&self) -> Result<RenterFiles> {
        self.get("/renter/files").await
    }

    pub async fn renter_downloads(&self) -> Result<RenterDownloads> {
        self.get("/renter/downloads").await
    }

    pub async fn renter_upload(&self, siapath: &str, source: &str) -> Result<()> {
        self.post_form(
            &format!("/renter/upload/{}", siapath),
            &[("source", source.to_string())],
        )
        .await
    }

    /// Queue a download of `siapath` to `destination` without waiting for it.
    pub async fn renter_download(&self, siapath: &str, destination: &str) -> Result<()> {
        self.get_unit_query(
            &format!("/renter/download/{}", siapath),
            &[("destination", destination), ("async", "true")],
        )
        .await
    }

    pub async fn renter_delete(&self, siapath: &str) -> Result<()> {
        self.post_form(&format!("/renter/delete/{}", siapath), &[])
            .await
    }
}
