//! Jenkins remote API session.

use crate::error::JenkinsError;
use async_trait::async_trait;
use farm_core::error::BackendError;
use farm_core::ports::{CiBackend, CiSession};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JenkinsConfig {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    /// API token; used as the basic-auth password.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl JenkinsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: None,
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Opens one [`JenkinsClient`] per pass.
#[derive(Debug, Clone)]
pub struct JenkinsBackend {
    config: JenkinsConfig,
}

impl JenkinsBackend {
    pub fn new(config: JenkinsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CiBackend for JenkinsBackend {
    async fn connect(&self) -> Result<Box<dyn CiSession>, BackendError> {
        let client = JenkinsClient::connect(&self.config).await?;
        Ok(Box::new(client))
    }
}

#[derive(Debug, Deserialize)]
struct JobList {
    #[serde(default)]
    jobs: Vec<JobEntry>,
}

#[derive(Debug, Deserialize)]
struct JobEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Crumb {
    crumb: String,
    crumb_request_field: String,
}

/// An authenticated session against one Jenkins instance.
pub struct JenkinsClient {
    client: reqwest::Client,
    base: Url,
    user: Option<String>,
    token: Option<String>,
    crumb: Option<(String, String)>,
}

impl JenkinsClient {
    /// Verify the credentials and fetch a CSRF crumb if the instance issues
    /// one.
    pub async fn connect(config: &JenkinsConfig) -> Result<Self, JenkinsError> {
        let mut base = Url::parse(&config.url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("farm/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut session = Self {
            client,
            base,
            user: config.user.clone(),
            token: config.token.clone(),
            crumb: None,
        };

        let mut probe = session.endpoint(&["api", "json"]);
        probe.set_query(Some("tree=mode"));
        session.send(session.request(Method::GET, probe)).await?;

        let crumb_url = session.endpoint(&["crumbIssuer", "api", "json"]);
        match session.send(session.request(Method::GET, crumb_url)).await {
            Ok(response) => {
                let crumb: Crumb = response.json().await?;
                session.crumb = Some((crumb.crumb_request_field, crumb.crumb));
            }
            Err(JenkinsError::NotFound(_)) => debug!("Jenkins issues no CSRF crumb"),
            Err(err) => return Err(err),
        }

        info!(url = %session.base, user = ?session.user, "Connected to Jenkins");
        Ok(session)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut req = self.client.request(method.clone(), url);
        if let Some(user) = &self.user {
            req = req.basic_auth(user, self.token.as_deref());
        }
        if method == Method::POST {
            if let Some((field, value)) = &self.crumb {
                req = req.header(field.as_str(), value.as_str());
            }
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, JenkinsError> {
        let response = req.send().await?;
        let status = response.status();
        match status {
            s if s.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(JenkinsError::Unauthorized(status.as_u16()))
            }
            StatusCode::NOT_FOUND => Err(JenkinsError::NotFound(response.url().path().to_string())),
            _ => Err(JenkinsError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    fn post_xml(&self, url: Url, xml: &str) -> RequestBuilder {
        self.request(Method::POST, url)
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(xml.to_string())
    }

    /// Names of the top-level jobs.
    pub async fn list_jobs(&self) -> Result<Vec<String>, JenkinsError> {
        let mut url = self.endpoint(&["api", "json"]);
        url.set_query(Some("tree=jobs[name]"));
        let list: JobList = self.send(self.request(Method::GET, url)).await?.json().await?;
        Ok(list.jobs.into_iter().map(|job| job.name).collect())
    }

    pub async fn get_job_config(&self, name: &str) -> Result<String, JenkinsError> {
        let url = self.endpoint(&["job", name, "config.xml"]);
        Ok(self.send(self.request(Method::GET, url)).await?.text().await?)
    }

    pub async fn create_job(&self, name: &str, xml: &str) -> Result<(), JenkinsError> {
        let mut url = self.endpoint(&["createItem"]);
        url.query_pairs_mut().append_pair("name", name);
        self.send(self.post_xml(url, xml)).await?;
        info!(job = %name, "Created job");
        Ok(())
    }

    pub async fn update_job(&self, name: &str, xml: &str) -> Result<(), JenkinsError> {
        let url = self.endpoint(&["job", name, "config.xml"]);
        self.send(self.post_xml(url, xml)).await?;
        info!(job = %name, "Updated job");
        Ok(())
    }

    pub async fn delete_job(&self, name: &str) -> Result<(), JenkinsError> {
        let url = self.endpoint(&["job", name, "doDelete"]);
        self.send(self.request(Method::POST, url)).await?;
        info!(job = %name, "Deleted job");
        Ok(())
    }

    /// Create the list view or replace its configuration.
    pub async fn configure_view(&self, name: &str, xml: &str) -> Result<(), JenkinsError> {
        let exists = self.endpoint(&["view", name, "api", "json"]);
        match self.send(self.request(Method::GET, exists)).await {
            Ok(_) => {
                let url = self.endpoint(&["view", name, "config.xml"]);
                self.send(self.post_xml(url, xml)).await?;
                debug!(view = %name, "Updated view");
            }
            Err(JenkinsError::NotFound(_)) => {
                let mut url = self.endpoint(&["createView"]);
                url.query_pairs_mut().append_pair("name", name);
                self.send(self.post_xml(url, xml)).await?;
                info!(view = %name, "Created view");
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }
}

#[async_trait]
impl CiSession for JenkinsClient {
    async fn list_jobs(&self) -> Result<Vec<String>, BackendError> {
        Ok(JenkinsClient::list_jobs(self).await?)
    }

    async fn job_config(&self, name: &str) -> Result<String, BackendError> {
        Ok(self.get_job_config(name).await?)
    }

    async fn create_job(&self, name: &str, config: &str) -> Result<(), BackendError> {
        Ok(JenkinsClient::create_job(self, name, config).await?)
    }

    async fn update_job(&self, name: &str, config: &str) -> Result<(), BackendError> {
        Ok(JenkinsClient::update_job(self, name, config).await?)
    }

    async fn delete_job(&self, name: &str) -> Result<(), BackendError> {
        Ok(JenkinsClient::delete_job(self, name).await?)
    }

    async fn upsert_view(&self, name: &str, config: &str) -> Result<(), BackendError> {
        Ok(self.configure_view(name, config).await?)
    }

    async fn close(&self) -> Result<(), BackendError> {
        debug!(url = %self.base, "Closed Jenkins session");
        Ok(())
    }
}
