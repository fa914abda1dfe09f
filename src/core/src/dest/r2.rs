use std::time::Duration;

use chatvault_snapshot::{backup_object_name, is_backup_object};
use chrono::Utc;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::dest::{
    parse_last_modified, sort_newest_first, trim_slashes, BackupEntry, Destination,
    DestinationKind, CONFLICT_RETRY_BASE, MAX_CONFLICT_RETRIES, REQUEST_TIMEOUT,
};
use crate::error::BackupError;
use crate::vault_config::R2Config;

/// Backup destination backed by an R2 proxy worker. The worker exposes a
/// small JSON API (`/upload`, `/list`, `/download`, `/delete`) guarded by a
/// bearer token; object keys are flat strings.
pub struct R2Destination {
    config: R2Config,
    site_id: String,
    user_id: i64,
    client: reqwest::Client,
    retry_base: Duration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ListedObject {
    key: String,
    last_modified: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListResponse {
    items: Vec<ListedObject>,
}

impl R2Destination {
    pub fn new(config: R2Config, site_id: &str, user_id: i64) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build r2 client: {e}"))?;
        Ok(Self {
            config,
            site_id: site_id.to_string(),
            user_id,
            client,
            retry_base: CONFLICT_RETRY_BASE,
        })
    }

    fn endpoint_base(&self) -> String {
        self.config.endpoint.trim_end_matches('/').to_string()
    }

    /// Key prefix for this user's snapshots, trailing slash included so the
    /// worker-side prefix filter cannot match sibling users.
    fn key_prefix(&self) -> String {
        let base = trim_slashes(&self.config.base_path);
        if base.is_empty() {
            format!("{}/{}/", self.site_id, self.user_id)
        } else {
            format!("{}/{}/{}/", base, self.site_id, self.user_id)
        }
    }

    fn object_key(&self, name: &str) -> String {
        format!("{}{}", self.key_prefix(), name)
    }

    async fn do_upload(&self, snapshot: &[u8]) -> Result<String, BackupError> {
        if !self.configured() {
            return Err(BackupError::NotConfigured);
        }
        let data: serde_json::Value = serde_json::from_slice(snapshot)
            .map_err(|e| BackupError::Storage(format!("snapshot is not valid json: {e}")))?;
        let url = format!("{}/upload", self.endpoint_base());
        let mut attempt: u32 = 0;
        loop {
            let name = backup_object_name(&self.site_id, Utc::now());
            let key = self.object_key(&name);
            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.config.auth_token)
                .json(&serde_json::json!({ "key": key, "data": data.clone() }))
                .send()
                .await
                .map_err(|e| BackupError::transport("r2 upload", e))?;
            let status = resp.status();
            if status.is_success() {
                return Ok(name);
            }
            if status == StatusCode::CONFLICT && attempt < MAX_CONFLICT_RETRIES {
                attempt += 1;
                tracing::warn!(attempt, "r2 upload conflict, retrying");
                tokio::time::sleep(self.retry_base * attempt).await;
                continue;
            }
            return Err(BackupError::from_status("r2 upload", status));
        }
    }

    async fn do_list(&self) -> Result<Vec<BackupEntry>, BackupError> {
        if !self.configured() {
            return Ok(Vec::new());
        }
        let url = format!("{}/list", self.endpoint_base());
        let resp = self
            .client
            .get(&url)
            .query(&[("prefix", self.key_prefix())])
            .bearer_auth(&self.config.auth_token)
            .send()
            .await
            .map_err(|e| BackupError::transport("r2 list", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BackupError::from_status("r2 list", status));
        }
        let listing: ListResponse = resp
            .json()
            .await
            .map_err(|e| BackupError::transport("r2 list", e))?;
        let mut entries: Vec<BackupEntry> = listing
            .items
            .into_iter()
            .filter(|item| is_backup_object(&self.site_id, &item.key))
            .map(|item| BackupEntry {
                last_modified: item
                    .last_modified
                    .as_deref()
                    .and_then(parse_last_modified)
                    .unwrap_or_else(Utc::now),
                id: item.key,
            })
            .collect();
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    async fn do_download(&self, id: &str) -> Result<Vec<u8>, BackupError> {
        if !self.configured() {
            return Err(BackupError::NotConfigured);
        }
        let url = format!("{}/download", self.endpoint_base());
        let resp = self
            .client
            .get(&url)
            .query(&[("key", id)])
            .bearer_auth(&self.config.auth_token)
            .send()
            .await
            .map_err(|e| BackupError::transport("r2 download", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BackupError::from_status("r2 download", status));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| BackupError::transport("r2 download", e))?;
        Ok(bytes.to_vec())
    }

    async fn do_delete(&self, id: &str) -> Result<(), BackupError> {
        if !self.configured() {
            return Err(BackupError::NotConfigured);
        }
        let url = format!("{}/delete", self.endpoint_base());
        let resp = self
            .client
            .delete(&url)
            .query(&[("key", id)])
            .bearer_auth(&self.config.auth_token)
            .send()
            .await
            .map_err(|e| BackupError::transport("r2 delete", e))?;
        let status = resp.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(BackupError::from_status("r2 delete", status));
        }
        Ok(())
    }
}

impl Destination for R2Destination {
    fn kind(&self) -> DestinationKind {
        DestinationKind::R2
    }

    fn configured(&self) -> bool {
        !self.config.endpoint.is_empty() && !self.config.auth_token.is_empty()
    }

    fn upload<'a>(&'a self, snapshot: &'a [u8]) -> BoxFuture<'a, Result<String, BackupError>> {
        Box::pin(self.do_upload(snapshot))
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<BackupEntry>, BackupError>> {
        Box::pin(self.do_list())
    }

    fn download<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Vec<u8>, BackupError>> {
        Box::pin(self.do_download(id))
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), BackupError>> {
        Box::pin(self.do_delete(id))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::extract::Query;
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    use super::*;

    // ── Helpers ──────────────────────────────────────────────────────────

    fn make_dest(endpoint: &str) -> R2Destination {
        R2Destination {
            config: R2Config {
                enabled: true,
                endpoint: endpoint.to_string(),
                auth_token: "tok".to_string(),
                base_path: "/ns_df_messages_backup/".to_string(),
            },
            site_id: "ns".to_string(),
            user_id: 7,
            client: reqwest::Client::new(),
            retry_base: Duration::from_millis(5),
        }
    }

    async fn start_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    // ── Tests ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn upload_posts_key_and_payload_with_bearer() {
        let seen: Arc<Mutex<Option<(String, serde_json::Value)>>> = Arc::default();
        let sink = seen.clone();
        let app = Router::new().route(
            "/upload",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    *sink.lock().unwrap() = Some((auth, body));
                    Json(serde_json::json!({ "success": true }))
                }
            }),
        );
        let base = start_server(app).await;
        let dest = make_dest(&base);
        let name = dest.upload(b"{\"chats\":[]}").await.unwrap();
        let (auth, body) = seen.lock().unwrap().take().unwrap();
        assert_eq!(auth, "Bearer tok");
        let key = body["key"].as_str().unwrap();
        assert!(key.starts_with("ns_df_messages_backup/ns/7/"));
        assert!(key.ends_with(&name));
        assert_eq!(body["data"]["chats"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn upload_retries_conflicts_with_fresh_keys() {
        let posts = Arc::new(AtomicUsize::new(0));
        let counter = posts.clone();
        let app = Router::new().route(
            "/upload",
            post(move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        StatusCode::CONFLICT.into_response()
                    } else {
                        Json(serde_json::json!({ "success": true })).into_response()
                    }
                }
            }),
        );
        let base = start_server(app).await;
        let dest = make_dest(&base);
        dest.upload(b"{}").await.unwrap();
        assert_eq!(posts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn list_filters_marker_and_defaults_timestamps() {
        let prefixes: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = prefixes.clone();
        let app = Router::new().route(
            "/list",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(params.get("prefix").cloned().unwrap_or_default());
                    Json(serde_json::json!({
                        "items": [
                            { "key": "ns_df_messages_backup/ns/7/ns_chat_backup_2026-08-15T10-00-00-000123.json",
                              "lastModified": "2026-08-15T10:00:00Z" },
                            { "key": "ns_df_messages_backup/ns/7/ns_chat_backup_2026-08-16T08-30-00-000456.json",
                              "lastModified": "2026-08-16T08:30:00Z" },
                            { "key": "ns_df_messages_backup/ns/7/notes.txt",
                              "lastModified": "2026-08-17T00:00:00Z" },
                            { "key": "ns_df_messages_backup/ns/7/ns_chat_backup_fresh.json" }
                        ]
                    }))
                }
            }),
        );
        let base = start_server(app).await;
        let dest = make_dest(&base);
        let entries = dest.list().await.unwrap();
        let seen = prefixes.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], "ns_df_messages_backup/ns/7/");
        assert_eq!(entries.len(), 3);
        // The entry without a stamp defaults to now and sorts first.
        assert!(entries[0].id.ends_with("ns_chat_backup_fresh.json"));
        assert!(entries[1].id.contains("2026-08-16"));
        assert!(entries[2].id.contains("2026-08-15"));
    }

    #[tokio::test]
    async fn download_fetches_by_key_query() {
        let app = Router::new().route(
            "/download",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                if params.get("key").map(String::as_str)
                    == Some("ns_df_messages_backup/ns/7/a.json")
                {
                    "{\"chats\":[]}".into_response()
                } else {
                    StatusCode::NOT_FOUND.into_response()
                }
            }),
        );
        let base = start_server(app).await;
        let dest = make_dest(&base);
        let body = dest.download("ns_df_messages_backup/ns/7/a.json").await.unwrap();
        assert_eq!(body, b"{\"chats\":[]}");
        let err = dest.download("missing").await.unwrap_err();
        assert!(matches!(err, BackupError::NotFound(_)));
    }

    #[tokio::test]
    async fn unconfigured_destination_short_circuits() {
        let dest = make_dest("");
        assert!(dest.list().await.unwrap().is_empty());
        let err = dest.upload(b"{}").await.unwrap_err();
        assert!(matches!(err, BackupError::NotConfigured));
    }
}
