use anyhow::{Result, anyhow};
use models::dashboard::Dashboard;
use models::device::{
    DeviceFilter, DeviceRecord, DeviceStatus, NewDevice, StatusUpdate, ToggleOutcome,
    VerificationOutcome, VerifyRequest,
};
use models::scan::{GateCode, ScanRequest, ScanResolution};
use models::user::{Role, SecurityMember, UpdateRole, User};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

trait HandleApiError: Sized {
    async fn handle_error(self) -> Result<Self>;
}

impl HandleApiError for Response {
    async fn handle_error(self) -> Result<Self> {
        let status = self.status();
        if status.is_client_error() || status.is_server_error() {
            let text = self.text().await?;
            Err(anyhow!("Api Error {}. {}", status.as_str(), text))
        } else {
            Ok(self)
        }
    }
}

pub struct CustodyAPI {
    client: Client,
    domain: String,
    bearer_token: String,
}

impl CustodyAPI {
    pub fn new(
        secrets: crate::auth::SessionSecrets,
        config: &crate::config::Config,
    ) -> Result<Self> {
        let bearer_token = secrets
            .bearer_token(&config.current_profile)
            .ok_or_else(|| anyhow!("No token for profile {}", config.current_profile))?;

        Ok(Self {
            client: Client::new(),
            domain: config.current_domain(),
            bearer_token,
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.domain, path))
            .bearer_auth(&self.bearer_token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.domain, path))
            .bearer_auth(&self.bearer_token)
    }

    fn put(&self, path: &str) -> RequestBuilder {
        self.client
            .put(format!("{}{}", self.domain, path))
            .bearer_auth(&self.bearer_token)
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        Ok(request.send().await?.handle_error().await?.json().await?)
    }

    pub async fn get_profile(&self) -> Result<User> {
        Self::send(self.get("/me")).await
    }

    pub async fn choose_role(&self, role: Role) -> Result<User> {
        Self::send(self.post("/me/role").json(&UpdateRole { role })).await
    }

    pub async fn get_devices(&self, filter: &DeviceFilter) -> Result<Vec<DeviceRecord>> {
        let query = serde_html_form::to_string(filter)?;
        Self::send(self.get(&format!("/devices?{query}"))).await
    }

    pub async fn get_device(&self, device_id: i32) -> Result<DeviceRecord> {
        Self::send(self.get(&format!("/devices/{device_id}"))).await
    }

    pub async fn my_devices(&self) -> Result<Vec<DeviceRecord>> {
        Self::send(self.get("/me/devices")).await
    }

    pub async fn register_device(&self, device: &NewDevice) -> Result<DeviceRecord> {
        Self::send(self.post("/me/devices").json(device)).await
    }

    pub async fn set_status(&self, device_id: i32, status: DeviceStatus) -> Result<DeviceRecord> {
        Self::send(
            self.put(&format!("/devices/{device_id}/status"))
                .json(&StatusUpdate { status }),
        )
        .await
    }

    pub async fn verify(&self, device_id: i32, observed_serial: String) -> Result<VerificationOutcome> {
        Self::send(
            self.post(&format!("/devices/{device_id}/verify"))
                .json(&VerifyRequest { observed_serial }),
        )
        .await
    }

    pub async fn resolve(&self, payload: String) -> Result<ScanResolution> {
        Self::send(self.post("/scan/resolve").json(&ScanRequest { payload })).await
    }

    pub async fn toggle(&self, payload: String) -> Result<ToggleOutcome> {
        Self::send(self.post("/scan/toggle").json(&ScanRequest { payload })).await
    }

    pub async fn gate_code(&self) -> Result<GateCode> {
        Self::send(self.get("/me/qr")).await
    }

    pub async fn dashboard(&self) -> Result<Dashboard> {
        Self::send(self.get("/dashboard")).await
    }

    pub async fn security_members(&self) -> Result<Vec<SecurityMember>> {
        Self::send(self.get("/users/security")).await
    }
}
