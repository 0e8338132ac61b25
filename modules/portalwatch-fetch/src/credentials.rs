use std::collections::HashMap;

use portalwatch_common::config::Credentials;
use tokio::sync::RwLock;
use tracing::warn;

const SERIES_METADATA_SUFFIX: &str = ".series-metadata.json";
const HTML_SUFFIX: &str = ".html";
const SERIES_LOGIN_SUFFIX: &str = ".series-login.json";
const GLOBAL_LOGIN_PATH: &str = "j_security_check";

fn strip_series_suffix(url: &str) -> &str {
    url.strip_suffix(SERIES_METADATA_SUFFIX)
        .or_else(|| url.strip_suffix(HTML_SUFFIX))
        .unwrap_or(url)
}

/// Resolves the cookie jar to present for a given URL (§4.4). All state is
/// process-local and lives only for the epoch that owns this resolver — no
/// persistence across runs.
pub struct CredentialResolver {
    client: reqwest::Client,
    portal_root: String,
    credentials: Credentials,
    global_cookies: RwLock<Option<String>>,
    path_cookies: RwLock<HashMap<String, String>>,
}

impl CredentialResolver {
    pub fn new(client: reqwest::Client, portal_root: String, credentials: Credentials) -> Self {
        Self {
            client,
            portal_root,
            credentials,
            global_cookies: RwLock::new(None),
            path_cookies: RwLock::new(HashMap::new()),
        }
    }

    /// Cookie header to attach for `url`: global login, layered with a
    /// path-scoped login if `url` (stripped of its series suffix) matches a
    /// configured prefix.
    pub async fn resolve(&self, url: &str) -> String {
        let global = match self.ensure_global_login().await {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!(error = %e, "global login failed; proceeding without cookies");
                String::new()
            }
        };

        let stripped = strip_series_suffix(url);
        let matched = self
            .credentials
            .per_path
            .iter()
            .find(|p| stripped.starts_with(p.url_prefix.as_str()));

        let Some(path_override) = matched else {
            return global;
        };

        match self.ensure_path_login(stripped, path_override).await {
            Ok(path_cookie) => merge_cookies(&global, &path_cookie),
            Err(e) => {
                warn!(url_prefix = %path_override.url_prefix, error = %e, "path login failed, falling back to global cookies");
                global
            }
        }
    }

    async fn ensure_global_login(&self) -> anyhow::Result<String> {
        if let Some(cookies) = self.global_cookies.read().await.clone() {
            return Ok(cookies);
        }

        let url = format!("{}/{GLOBAL_LOGIN_PATH}", self.portal_root.trim_end_matches('/'));
        let form = [
            ("_charset_", "utf-8"),
            ("j_username", self.credentials.global.user.as_str()),
            ("j_password", self.credentials.global.pass.as_str()),
            ("j_validate", "true"),
        ];
        let cookies = post_login(&self.client, &url, &form).await?;

        *self.global_cookies.write().await = Some(cookies.clone());
        Ok(cookies)
    }

    async fn ensure_path_login(
        &self,
        stripped_series_url: &str,
        path_override: &portalwatch_common::config::PathOverride,
    ) -> anyhow::Result<String> {
        if let Some(cookies) = self.path_cookies.read().await.get(stripped_series_url).cloned() {
            return Ok(cookies);
        }

        let url = format!("{stripped_series_url}{SERIES_LOGIN_SUFFIX}");
        let form = [
            ("_charset_", "utf-8"),
            ("username", path_override.user.as_str()),
            ("password", path_override.pass.as_str()),
        ];
        let cookies = post_login(&self.client, &url, &form).await?;

        self.path_cookies
            .write()
            .await
            .insert(stripped_series_url.to_string(), cookies.clone());
        Ok(cookies)
    }
}

async fn post_login(client: &reqwest::Client, url: &str, form: &[(&str, &str)]) -> anyhow::Result<String> {
    let response = client.post(url).form(form).send().await?;
    let cookies: Vec<String> = response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).to_string())
        .collect();
    Ok(cookies.join("; "))
}

fn merge_cookies(global: &str, path_scoped: &str) -> String {
    match (global.is_empty(), path_scoped.is_empty()) {
        (true, _) => path_scoped.to_string(),
        (false, true) => global.to_string(),
        (false, false) => format!("{global}; {path_scoped}"),
    }
}
