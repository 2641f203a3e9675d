//! REST client for the Lieutenant cluster metadata API

use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Thin blocking client for the Lieutenant API.
pub struct Lieutenant {
    base_url: String,
    api_token: Option<String>,
    client: reqwest::blocking::Client,
}

impl Lieutenant {
    pub fn new(api_url: &str, api_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Api {
                url: api_url.to_string(),
                message: e.to_string(),
            })?;
        Ok(Lieutenant {
            base_url: api_url.trim_end_matches('/').to_string(),
            api_token,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `GET <api>/<path>`, deserializing the JSON response.
    pub fn query<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path);
        debug!("querying Lieutenant: GET {}", url);
        let mut req = self.client.get(&url);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().map_err(|e| Error::Api {
            url: url.clone(),
            message: format!("Unable to connect to Lieutenant: {}", e),
        })?;
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Api {
                url,
                message: api_error_message(status.as_u16(), &body),
            });
        }
        serde_json::from_str(&body).map_err(|e| Error::Api {
            url,
            message: format!("Client error: Unable to parse JSON: {}", e),
        })
    }

    /// `POST <api>/<path>` with a JSON body. Redirect rewriting to GET is
    /// not acceptable for POST-only endpoints, so redirects are not
    /// followed.
    pub fn post(&self, path: &str, data: &serde_json::Value) -> Result<()> {
        let url = self.endpoint(path);
        debug!("posting to Lieutenant: POST {}", url);
        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(data);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().map_err(|e| Error::Api {
            url: url.clone(),
            message: format!("Unable to connect to Lieutenant: {}", e),
        })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(Error::Api {
                url,
                message: api_error_message(status.as_u16(), &body),
            });
        }
        Ok(())
    }
}

/// Prefer the API's own `reason` field when reporting HTTP errors.
fn api_error_message(status: u16, body: &str) -> String {
    let reason = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("reason").and_then(|r| r.as_str()).map(str::to_string));
    match reason {
        Some(r) => format!("API returned {}: {}", status, r),
        None => format!("API returned {}", status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        let api = Lieutenant::new(
            "https://api.syn.example.com/",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            api.endpoint("/clusters/c-cluster"),
            "https://api.syn.example.com/clusters/c-cluster"
        );
    }

    #[test]
    fn test_api_error_message_with_reason() {
        assert_eq!(
            api_error_message(404, r#"{"reason": "cluster not found"}"#),
            "API returned 404: cluster not found"
        );
        assert_eq!(api_error_message(500, "not json"), "API returned 500");
    }
}
