use crate::blacklist::RevocationCheck;
use crate::errors::StoreError;
use crate::models::Info;
use async_trait::async_trait;
use std::time::Duration;

/// Header carrying the shared service key on `/internal` routes.
pub const SERVICE_KEY_HEADER: &str = "x-service-key";

/// Revocation check answered by the IDM service over HTTP.
///
/// Services that do not talk to Redis directly ask the IDM instead, through its
/// internal route. That route takes no session token, only the shared service key.
pub struct RemoteBlacklist {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl RemoteBlacklist {
    pub fn new(base_url: &str, service_key: &str, timeout: Duration) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        })
    }

    fn check_url(&self, user_id: &str) -> String {
        format!("{}/internal/blacklist/{}", self.base_url, user_id)
    }
}

/// 200 is clear, 403 is revoked; anything else (a refused service key
/// included) is not an answer.
pub fn revocation_from_info(info: &Info) -> Result<bool, StoreError> {
    match info.status {
        200 => Ok(false),
        403 => Ok(true),
        other => Err(StoreError::Protocol(format!(
            "blacklist check answered {}: {}",
            other, info.message
        ))),
    }
}

#[async_trait]
impl RevocationCheck for RemoteBlacklist {
    async fn is_revoked(&self, user_id: &str) -> Result<bool, StoreError> {
        let response = self
            .http
            .get(self.check_url(user_id))
            .header(SERVICE_KEY_HEADER, &self.service_key)
            .send()
            .await?;
        let status = response.status();

        let info: Info = response.json().await.map_err(|e| {
            StoreError::Protocol(format!("unreadable blacklist answer ({}): {}", status, e))
        })?;

        revocation_from_info(&info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_mapping() {
        assert!(!revocation_from_info(&Info::new(200, "clear")).unwrap());
        assert!(revocation_from_info(&Info::new(403, "revoked")).unwrap());
        assert!(matches!(
            revocation_from_info(&Info::new(404, "no such user")),
            Err(StoreError::Protocol(_))
        ));
        assert!(revocation_from_info(&Info::new(401, "service key required")).is_err());
        assert!(revocation_from_info(&Info::new(500, "boom")).is_err());
    }

    #[test]
    fn test_check_url_trims_trailing_slash() {
        let remote = RemoteBlacklist::new("http://idm:8081/", "k", Duration::from_secs(1)).unwrap();
        assert_eq!(remote.check_url("42"), "http://idm:8081/internal/blacklist/42");
    }

    #[tokio::test]
    async fn test_unreachable_idm_is_store_error() {
        let remote = RemoteBlacklist::new("http://127.0.0.1:1", "k", Duration::from_millis(200)).unwrap();
        assert!(remote.is_revoked("42").await.is_err());
    }
}
