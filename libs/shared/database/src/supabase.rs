use anyhow::{anyhow, Context, Result};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Thin PostgREST client. Server-side callers (timer callbacks, the message
/// store) authenticate with the store key from [`AppConfig::store_api_key`].
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            api_key: config.store_api_key().to_string(),
        }
    }

    fn get_headers(&self, return_representation: bool) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.api_key).context("invalid Supabase API key")?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .context("invalid Supabase API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if return_representation {
            headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        }

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let writes = method != Method::GET;
        let mut req = self
            .client
            .request(method, &url)
            .headers(self.get_headers(writes)?);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => anyhow!("Authentication error: {}", error_text),
                404 => anyhow!("Resource not found: {}", error_text),
                _ => anyhow!("API error ({}): {}", status, error_text),
            });
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// `GET /rest/v1/{table}?{query}`.
    pub async fn select<T>(&self, table: &str, query: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let path = format!("/rest/v1/{}?{}", table, query);
        self.request(Method::GET, &path, None).await
    }

    /// Like [`select`](Self::select) but returns the first row, if any.
    pub async fn select_one<T>(&self, table: &str, query: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let rows: Vec<T> = self.select(table, &format!("{}&limit=1", query)).await?;
        Ok(rows.into_iter().next())
    }

    /// Inserts one row and returns the stored representation.
    pub async fn insert<T>(&self, table: &str, row: Value) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let path = format!("/rest/v1/{}", table);
        let rows: Vec<T> = self.request(Method::POST, &path, Some(row)).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow!("insert into {} returned no rows", table))
    }

    /// Patches the rows matched by `filter` and returns them.
    pub async fn update<T>(&self, table: &str, filter: &str, patch: Value) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let path = format!("/rest/v1/{}?{}", table, filter);
        self.request(Method::PATCH, &path, Some(patch)).await
    }
}
