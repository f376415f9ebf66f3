//! DirectoryClient - Backend Service Adapter
//!
//! ## Responsibilities
//!
//! - Incident lifecycle reporting (create / camera history / end)
//! - Face finding reports (new and removed identities)
//! - Known-user and monitor roster retrieval

use crate::error::{Error, Result};
use crate::identity_tracker::TrackedIdentity;
use crate::models::IncidentId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Directory service operations the pipeline depends on
#[async_trait]
pub trait Directory: Send + Sync {
    /// Open a new incident for `monitor_id`, returning its id
    async fn create_incident(&self, monitor_id: &str) -> Result<IncidentId>;

    /// Record that the incident moved to (or was seen on) `monitor_id`
    async fn append_incident_camera(&self, incident_id: IncidentId, monitor_id: &str) -> Result<()>;

    /// Attach recognised shooters to the incident history
    async fn report_shooters(
        &self,
        incident_id: IncidentId,
        monitor_id: &str,
        shooters: &[String],
    ) -> Result<()>;

    async fn end_incident(&self, incident_id: IncidentId) -> Result<()>;

    /// One request carrying both new and removed identities
    async fn report_findings(&self, new: &[FindingRecord], removed: &[RemovedRecord]) -> Result<()>;

    async fn fetch_known_users(&self) -> Result<Vec<KnownUser>>;

    async fn fetch_monitors(&self) -> Result<Vec<MonitorInfo>>;
}

/// Known user roster entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownUser {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub tracking_enabled: bool,
    /// Reference face photos
    #[serde(default)]
    pub face_images: Vec<String>,
}

/// Monitor roster entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorInfo {
    pub monitor_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// New/updated identity as reported to the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FindingRecord {
    pub id: String,
    /// Numeric backend user id when the identity is a known user
    pub user_id: Option<i64>,
    pub recognition_img: Option<String>,
    pub incident: Option<IncidentId>,
    pub match_score: f32,
    pub monitor_id: String,
}

impl From<&TrackedIdentity> for FindingRecord {
    fn from(identity: &TrackedIdentity) -> Self {
        Self {
            id: identity.id.clone(),
            user_id: if identity.is_known {
                identity.id.parse().ok()
            } else {
                None
            },
            recognition_img: identity.face_image_url.clone(),
            incident: identity.incident_id,
            match_score: identity.match_score,
            monitor_id: identity.monitor_id.clone(),
        }
    }
}

/// Identity that left the scene
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovedRecord {
    pub id: String,
    pub monitor_id: String,
}

impl From<&TrackedIdentity> for RemovedRecord {
    fn from(identity: &TrackedIdentity) -> Self {
        Self {
            id: identity.id.clone(),
            monitor_id: identity.monitor_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateIncidentRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    datetime: DateTime<Utc>,
    camera_id: &'a str,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CreateIncidentResponse {
    id: IncidentId,
}

#[derive(Debug, Serialize)]
struct IncidentHistoryRequest<'a> {
    zone_cctv_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    shooters: Option<String>,
}

#[derive(Debug, Serialize)]
struct FindingsRequest<'a> {
    new_users: &'a [FindingRecord],
    remove_user: &'a [RemovedRecord],
}

/// HTTP client for the backend service
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    organization_slug: String,
    api_key: Option<String>,
}

impl BackendClient {
    pub fn new(base_url: String, organization_slug: String, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            organization_slug,
            api_key,
        })
    }

    fn org_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.organization_slug, path)
    }

    fn roster_url(&self, path: &str) -> String {
        format!(
            "{}/organizations/{}/{}",
            self.base_url, self.organization_slug, path
        )
    }

    fn with_key(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("api-key", key),
            None => req,
        }
    }

    async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<reqwest::Response> {
        let resp = self.with_key(self.client.post(url)).json(body).send().await?;
        Ok(resp)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let resp = self.with_key(self.client.get(url)).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Directory(format!(
                "GET {} returned {}",
                url,
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl Directory for BackendClient {
    async fn create_incident(&self, monitor_id: &str) -> Result<IncidentId> {
        let body = CreateIncidentRequest {
            kind: "gun",
            datetime: Utc::now(),
            camera_id: monitor_id,
            payload: serde_json::json!({}),
        };
        let resp = self
            .post_json(&self.org_url("emergency-notification/"), &body)
            .await?;

        // backend answers 200/201 on success
        if resp.status().as_u16() >= 202 {
            return Err(Error::Directory(format!(
                "create incident rejected: {} - {}",
                resp.status(),
                resp.text().await.unwrap_or_default()
            )));
        }

        let created: CreateIncidentResponse = resp.json().await?;
        tracing::info!(incident_id = created.id, monitor_id = %monitor_id, "Incident created in backend");
        Ok(created.id)
    }

    async fn append_incident_camera(&self, incident_id: IncidentId, monitor_id: &str) -> Result<()> {
        let url = self.org_url(&format!("incidents/cctv-incidents/{}/history/", incident_id));
        let body = IncidentHistoryRequest {
            zone_cctv_id: monitor_id,
            shooters: None,
        };
        let resp = self.post_json(&url, &body).await?;
        if !resp.status().is_success() {
            return Err(Error::Directory(format!(
                "append camera rejected: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn report_shooters(
        &self,
        incident_id: IncidentId,
        monitor_id: &str,
        shooters: &[String],
    ) -> Result<()> {
        let url = self.org_url(&format!("incidents/cctv-incidents/{}/history/", incident_id));
        let body = IncidentHistoryRequest {
            zone_cctv_id: monitor_id,
            shooters: Some(shooters.join(",")),
        };
        let resp = self.post_json(&url, &body).await?;
        if !resp.status().is_success() {
            return Err(Error::Directory(format!(
                "shooter report rejected: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn end_incident(&self, incident_id: IncidentId) -> Result<()> {
        let url = self.org_url(&format!("incidents/cctv-incidents/{}/end/", incident_id));
        let resp = self.post_json(&url, &serde_json::json!({})).await?;
        if !resp.status().is_success() {
            return Err(Error::Directory(format!(
                "end incident rejected: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn report_findings(&self, new: &[FindingRecord], removed: &[RemovedRecord]) -> Result<()> {
        let body = FindingsRequest {
            new_users: new,
            remove_user: removed,
        };
        let resp = self
            .post_json(&self.org_url("face-recognitions/log-findings/"), &body)
            .await?;
        if resp.status().as_u16() != 201 {
            return Err(Error::Directory(format!(
                "findings report rejected: {} - {}",
                resp.status(),
                resp.text().await.unwrap_or_default()
            )));
        }
        Ok(())
    }

    async fn fetch_known_users(&self) -> Result<Vec<KnownUser>> {
        self.get_json(&self.roster_url("cctv/user-tracking/")).await
    }

    async fn fetch_monitors(&self) -> Result<Vec<MonitorInfo>> {
        self.get_json(&self.roster_url("cctv/monitors/")).await
    }
}

/// Backend ids arrive as either JSON numbers or strings
fn id_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {}", other))),
    }
}
