//! Paged retrieval over the REST API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::{Extraction, PageFiles, Retriever, scan};
use crate::catalog::TableSpec;
use crate::config::SourceSection;
use crate::error::{SyncError, SyncResult};

/// Query sent with every paged request except for kinds that reject it
pub const ALL_RECORDS_QUERY: &str = "cql.allRecords=1 sortBy id";

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// How a response status is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Source unavailable; the table has no data this cycle
    Unavailable,
    Failure,
}

impl StatusClass {
    pub fn of(status: StatusCode) -> Self {
        if status.is_success() {
            StatusClass::Success
        } else if matches!(
            status,
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::INTERNAL_SERVER_ERROR
        ) {
            StatusClass::Unavailable
        } else {
            StatusClass::Failure
        }
    }
}

/// Authenticated session against the REST API
pub struct HttpSource {
    client: Client,
    base_url: String,
    tenant: String,
    tenant_header: String,
    token_header: String,
    token: String,
    page_size: usize,
}

impl HttpSource {
    /// Log in and keep the session token returned in the response header
    pub async fn login(config: &SourceSection) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base_url = config.url.trim_end_matches('/').to_string();
        let url = format!("{}{}", base_url, config.login_path);

        let resp = client
            .post(&url)
            .header(config.tenant_header.as_str(), config.tenant.as_str())
            .json(&LoginRequest {
                username: &config.username,
                password: &config.password,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::SourceStatus {
                status: status.as_u16(),
                body,
            });
        }

        let token = resp
            .headers()
            .get(config.token_header.as_str())
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                SyncError::Transport(format!(
                    "Login response carries no {} header",
                    config.token_header
                ))
            })?
            .to_string();

        tracing::info!(url = %base_url, tenant = %config.tenant, "Logged in to source");

        Ok(Self {
            client,
            base_url,
            tenant: config.tenant.clone(),
            tenant_header: config.tenant_header.clone(),
            token_header: config.token_header.clone(),
            token,
            page_size: config.page_size,
        })
    }

    /// Fetch one page; `None` means the source is unavailable
    async fn fetch_page(&self, table: &TableSpec, index: usize) -> SyncResult<Option<bytes::Bytes>> {
        let url = format!("{}{}", self.base_url, table.source);
        let params = page_params(table, index * self.page_size, self.page_size);

        let resp = self
            .client
            .get(&url)
            .header(self.tenant_header.as_str(), self.tenant.as_str())
            .header(self.token_header.as_str(), self.token.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&params)
            .send()
            .await?;

        let status = resp.status();
        match StatusClass::of(status) {
            StatusClass::Success => Ok(Some(resp.bytes().await?)),
            StatusClass::Unavailable => {
                tracing::info!(
                    table = table.name,
                    status = status.as_u16(),
                    "Source unavailable; no data found"
                );
                Ok(None)
            }
            StatusClass::Failure => {
                let body = resp.text().await.unwrap_or_default();
                Err(SyncError::SourceStatus {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

/// Query parameters of one page request
pub fn page_params(table: &TableSpec, offset: usize, limit: usize) -> Vec<(&'static str, String)> {
    let mut params = vec![("offset", offset.to_string()), ("limit", limit.to_string())];
    if table.kind.sends_query() {
        params.push(("query", ALL_RECORDS_QUERY.to_string()));
    }
    params
}

#[async_trait]
impl Retriever for HttpSource {
    async fn retrieve(&self, table: &TableSpec, files: &PageFiles) -> SyncResult<Extraction> {
        let mut pages = Vec::new();
        let mut index = 0;

        loop {
            let Some(body) = self.fetch_page(table, index).await? else {
                return Ok(Extraction::no_data());
            };

            let path = files.page(index);
            tokio::fs::write(&path, &body).await?;
            pages.push(path);

            if !scan::has_records(&body) {
                files.write_count(index).await?;
                tracing::debug!(table = table.name, pages = index, "Reached empty page");
                return Ok(Extraction { found: true, pages });
            }

            tracing::debug!(table = table.name, page = index, bytes = body.len(), "Fetched page");
            index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;

    #[test]
    fn test_status_classes() {
        assert_eq!(StatusClass::of(StatusCode::OK), StatusClass::Success);
        assert_eq!(StatusClass::of(StatusCode::FORBIDDEN), StatusClass::Unavailable);
        assert_eq!(StatusClass::of(StatusCode::NOT_FOUND), StatusClass::Unavailable);
        assert_eq!(
            StatusClass::of(StatusCode::INTERNAL_SERVER_ERROR),
            StatusClass::Unavailable
        );
        assert_eq!(StatusClass::of(StatusCode::BAD_REQUEST), StatusClass::Failure);
        assert_eq!(StatusClass::of(StatusCode::BAD_GATEWAY), StatusClass::Failure);
    }

    #[test]
    fn test_page_params() {
        let users = catalog::find("user_users").unwrap();
        assert_eq!(
            page_params(users, 2000, 1000),
            vec![
                ("offset", "2000".to_string()),
                ("limit", "1000".to_string()),
                ("query", ALL_RECORDS_QUERY.to_string()),
            ]
        );

        let notes = catalog::find("notes").unwrap();
        assert_eq!(page_params(notes, 0, 10).len(), 2);
    }
}
