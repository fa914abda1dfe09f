use std::time::Duration;

use chatvault_snapshot::{backup_object_name, is_backup_object};
use chrono::Utc;
use futures::future::BoxFuture;
use reqwest::{Method, StatusCode};

use crate::dest::{
    parse_last_modified, sort_newest_first, trim_slashes, BackupEntry, Destination,
    DestinationKind, CONFLICT_RETRY_BASE, MAX_CONFLICT_RETRIES, REQUEST_TIMEOUT,
};
use crate::error::BackupError;
use crate::vault_config::WebdavConfig;

/// Backup destination speaking plain WebDAV: `PROPFIND`/`MKCOL` to manage the
/// per-user directory, `PUT`/`GET`/`DELETE` for the snapshot objects.
pub struct WebDavDestination {
    config: WebdavConfig,
    site_id: String,
    user_id: i64,
    client: reqwest::Client,
    retry_base: Duration,
}

impl WebDavDestination {
    pub fn new(config: WebdavConfig, site_id: &str, user_id: i64) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build webdav client: {e}"))?;
        Ok(Self {
            config,
            site_id: site_id.to_string(),
            user_id,
            client,
            retry_base: CONFLICT_RETRY_BASE,
        })
    }

    fn server_base(&self) -> String {
        self.config.url.trim_end_matches('/').to_string()
    }

    /// Directory holding this user's snapshots, as an absolute DAV path.
    fn user_dir_path(&self) -> String {
        let base = trim_slashes(&self.config.backup_path);
        if base.is_empty() {
            format!("/{}/{}", self.site_id, self.user_id)
        } else {
            format!("/{}/{}/{}", base, self.site_id, self.user_id)
        }
    }

    /// Resolve a listing href or object name to a request URL. Hrefs come
    /// back from servers in several shapes: full URLs, paths that already
    /// include the DAV mount prefix, bare absolute paths, or plain names.
    fn full_url(&self, id: &str) -> String {
        if id.starts_with("http://") || id.starts_with("https://") {
            return id.to_string();
        }
        let server = self.server_base();
        if id.starts_with('/') {
            if let Ok(parsed) = url::Url::parse(&server) {
                let mount = parsed.path();
                if mount != "/" && id.starts_with(mount) {
                    return format!("{}{}", parsed.origin().ascii_serialization(), id);
                }
            }
            return format!("{server}{id}");
        }
        format!("{}/{}", server, trim_slashes(&format!("{}/{}", self.user_dir_path(), id)))
    }

    fn dav_request(&self, method: &str, url: &str) -> Result<reqwest::RequestBuilder, BackupError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| BackupError::Network(format!("bad webdav method: {e}")))?;
        Ok(self
            .client
            .request(method, url)
            .basic_auth(&self.config.username, Some(&self.config.password)))
    }

    /// Probe a single collection with a zero-depth PROPFIND. Transport
    /// failures count as missing so the caller falls through to MKCOL.
    async fn collection_exists(&self, url: &str) -> Result<bool, BackupError> {
        let resp = self.dav_request("PROPFIND", url)?.header("Depth", "0").send().await;
        match resp {
            Ok(resp) => Ok(resp.status().is_success() || resp.status().as_u16() == 207),
            Err(_) => Ok(false),
        }
    }

    /// Create the backup directory segment by segment, tolerating segments
    /// that already exist.
    async fn ensure_directory(&self) -> Result<(), BackupError> {
        let server = self.server_base();
        let mut path = String::new();
        for segment in self.user_dir_path().split('/').filter(|s| !s.is_empty()) {
            path.push('/');
            path.push_str(segment);
            let url = format!("{server}{path}");
            if self.collection_exists(&url).await? {
                continue;
            }
            let resp = self
                .dav_request("MKCOL", &url)?
                .send()
                .await
                .map_err(|e| BackupError::transport("webdav mkcol", e))?;
            let status = resp.status();
            if !status.is_success() && status != StatusCode::METHOD_NOT_ALLOWED {
                return Err(BackupError::from_status("webdav mkcol", status));
            }
        }
        Ok(())
    }

    async fn do_upload(&self, snapshot: &[u8]) -> Result<String, BackupError> {
        if !self.configured() {
            return Err(BackupError::NotConfigured);
        }
        let server = self.server_base();
        let dir = self.user_dir_path();
        let mut attempt: u32 = 0;
        loop {
            // The object name carries the current time, so a fresh one is
            // generated on every attempt to step around name conflicts.
            self.ensure_directory().await?;
            let name = backup_object_name(&self.site_id, Utc::now());
            let url = format!("{server}{dir}/{name}");
            let resp = self
                .dav_request("PUT", &url)?
                .header("Content-Type", "application/json")
                .body(snapshot.to_vec())
                .send()
                .await
                .map_err(|e| BackupError::transport("webdav upload", e))?;
            let status = resp.status();
            if status.is_success() {
                return Ok(name);
            }
            if status == StatusCode::CONFLICT && attempt < MAX_CONFLICT_RETRIES {
                attempt += 1;
                tracing::warn!(attempt, "webdav upload conflict, retrying");
                tokio::time::sleep(self.retry_base * attempt).await;
                continue;
            }
            return Err(BackupError::from_status("webdav upload", status));
        }
    }

    async fn do_list(&self) -> Result<Vec<BackupEntry>, BackupError> {
        if !self.configured() {
            return Ok(Vec::new());
        }
        let url = format!("{}{}/", self.server_base(), self.user_dir_path());
        let resp = self
            .dav_request("PROPFIND", &url)?
            .header("Depth", "1")
            .send()
            .await
            .map_err(|e| BackupError::transport("webdav list", e))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() && status.as_u16() != 207 {
            return Err(BackupError::from_status("webdav list", status));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| BackupError::transport("webdav list", e))?;
        let marker_site = &self.site_id;
        let mut entries: Vec<BackupEntry> = parse_multistatus(&body)
            .into_iter()
            .filter(|(href, _)| is_backup_object(marker_site, href))
            .map(|(href, modified)| BackupEntry {
                id: href,
                last_modified: modified
                    .as_deref()
                    .and_then(parse_last_modified)
                    .unwrap_or_else(Utc::now),
            })
            .collect();
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    async fn do_download(&self, id: &str) -> Result<Vec<u8>, BackupError> {
        if !self.configured() {
            return Err(BackupError::NotConfigured);
        }
        let resp = self
            .dav_request("GET", &self.full_url(id))?
            .send()
            .await
            .map_err(|e| BackupError::transport("webdav download", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BackupError::from_status("webdav download", status));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| BackupError::transport("webdav download", e))?;
        Ok(bytes.to_vec())
    }

    async fn do_delete(&self, id: &str) -> Result<(), BackupError> {
        if !self.configured() {
            return Err(BackupError::NotConfigured);
        }
        let resp = self
            .dav_request("DELETE", &self.full_url(id))?
            .send()
            .await
            .map_err(|e| BackupError::transport("webdav delete", e))?;
        let status = resp.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(BackupError::from_status("webdav delete", status));
        }
        Ok(())
    }
}

impl Destination for WebDavDestination {
    fn kind(&self) -> DestinationKind {
        DestinationKind::Webdav
    }

    fn configured(&self) -> bool {
        !self.config.url.is_empty()
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

/// Extract the text content of every element with the given local name.
/// Multistatus bodies arrive with arbitrary namespace prefixes (`d:`, `D:`,
/// `lp1:`, none at all), so tags are matched on the local name alone.
/// Returns (byte offset, text) pairs in document order.
fn tag_texts(body: &str, local: &str) -> Vec<(usize, String)> {
    let lower = body.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let needle = format!("{local}>");
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(found) = lower[from..].find(&needle) {
        let name_start = from + found;
        let content_start = name_start + needle.len();
        from = content_start;
        // Walk back over an optional namespace prefix to the opening '<'.
        // Hitting '/' first means this is a closing tag; skip it.
        let mut open = None;
        let mut i = name_start;
        while i > 0 {
            i -= 1;
            match bytes[i] {
                b'<' => {
                    open = Some(i);
                    break;
                }
                b'a'..=b'z' | b'0'..=b'9' | b':' | b'.' | b'-' | b'_' => continue,
                _ => break,
            }
        }
        let Some(open) = open else { continue };
        let tag = &lower[open + 1..name_start + local.len()];
        if tag.rsplit(':').next().unwrap_or(tag) != local {
            continue;
        }
        if let Some(close) = lower[content_start..].find("</") {
            let text = body[content_start..content_start + close].trim().to_string();
            out.push((name_start, text));
        }
    }
    out
}

/// Pair each href in a multistatus body with the getlastmodified value from
/// its own response block, i.e. the first one before the next href.
fn parse_multistatus(body: &str) -> Vec<(String, Option<String>)> {
    let hrefs = tag_texts(body, "href");
    let modified = tag_texts(body, "getlastmodified");
    hrefs
        .iter()
        .enumerate()
        .map(|(idx, (pos, href))| {
            let limit = hrefs.get(idx + 1).map(|(next, _)| *next).unwrap_or(usize::MAX);
            let stamp = modified
                .iter()
                .find(|(at, _)| *at > *pos && *at < limit)
                .map(|(_, value)| value.clone());
            (href.clone(), stamp)
        })
        .collect()
}
