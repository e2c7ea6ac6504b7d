//! Fetching a user's flag data from the remote service.
use std::sync::atomic::{AtomicBool, Ordering};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use reqwest::{StatusCode, Url};

use crate::{Error, Result, User};

/// Source of flag data for a user.
///
/// Transport and authentication are the requestor's concern. The returned payload is a JSON
/// object mapping flag keys to flag records (see
/// [`FullDataSet::from_payload`](crate::FullDataSet::from_payload)).
pub trait FlagRequestor: Send + Sync {
    /// Fetch the raw flag payload for `user`.
    ///
    /// # Errors
    ///
    /// Errors for which [`Error::is_unrecoverable`] returns `true` stop the polling loop; all
    /// other errors are retried on the next poll.
    fn fetch(&self, user: &User) -> Result<String>;
}

impl<T: Fn(&User) -> Result<String> + Send + Sync> FlagRequestor for T {
    fn fetch(&self, user: &User) -> Result<String> {
        self(user)
    }
}

/// Configuration for [`HttpFlagRequestor`].
#[derive(Debug, Clone)]
pub struct HttpFlagRequestorConfig {
    /// Base URL of the flag service.
    pub base_url: String,
    /// Key sent in the `Authorization` header.
    pub mobile_key: String,
    /// Ask the server to include evaluation reasons in the payload.
    pub with_reasons: bool,
}

const EVALUATION_ENDPOINT: &str = "/msdk/evalx/users";

/// A [`FlagRequestor`] that fetches flags over HTTP.
pub struct HttpFlagRequestor {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    config: HttpFlagRequestorConfig,
    /// If we receive a 401 Unauthorized error during a request, it means the mobile key is not
    /// valid. We cache this error so we don't issue additional requests to the server.
    unauthorized: AtomicBool,
}

impl HttpFlagRequestor {
    /// Create a requestor. No requests are made until [`FlagRequestor::fetch`] is called.
    pub fn new(config: HttpFlagRequestorConfig) -> HttpFlagRequestor {
        HttpFlagRequestor {
            client: reqwest::blocking::Client::new(),
            config,
            unauthorized: AtomicBool::new(false),
        }
    }

    fn user_url(&self, user: &User) -> Result<Url> {
        let user_json = serde_json::to_vec(user)?;
        let encoded_user = URL_SAFE_NO_PAD.encode(user_json);

        let mut url = Url::parse(&format!(
            "{}{}/{}",
            self.config.base_url.trim_end_matches('/'),
            EVALUATION_ENDPOINT,
            encoded_user
        ))
        .map_err(Error::InvalidBaseUrl)?;

        if self.config.with_reasons {
            url.query_pairs_mut().append_pair("withReasons", "true");
        }

        Ok(url)
    }
}

impl FlagRequestor for HttpFlagRequestor {
    fn fetch(&self, user: &User) -> Result<String> {
        if self.unauthorized.load(Ordering::Relaxed) {
            return Err(Error::Unauthorized);
        }

        let url = self.user_url(user)?;

        log::debug!(target: "flagsync", user_key = user.key(); "fetching flags");
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, &self.config.mobile_key)
            .send()?;

        match response.status() {
            status if status.is_success() => {
                let payload = response.text()?;
                log::debug!(target: "flagsync", user_key = user.key(); "successfully fetched flags");
                Ok(payload)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                log::warn!(target: "flagsync", "client is not authorized. Check your mobile key");
                self.unauthorized.store(true, Ordering::Relaxed);
                Err(Error::Unauthorized)
            }
            status => {
                log::warn!(target: "flagsync", "received non-200 response while fetching flags: {:?}", status);
                Err(Error::UnexpectedStatus(status.as_u16()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    use super::{HttpFlagRequestor, HttpFlagRequestorConfig};
    use crate::{Error, User};

    fn requestor(base_url: &str, with_reasons: bool) -> HttpFlagRequestor {
        HttpFlagRequestor::new(HttpFlagRequestorConfig {
            base_url: base_url.to_owned(),
            mobile_key: "mob-key".to_owned(),
            with_reasons,
        })
    }

    #[test]
    fn encodes_user_into_url() {
        let user = User::with_key("user").with_attribute("email", "user@example.com");
        let url = requestor("https://example.com/", false).user_url(&user).unwrap();

        let encoded = url.path().rsplit('/').next().unwrap();
        let decoded: User = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(encoded).unwrap()).unwrap();

        assert!(url.as_str().starts_with("https://example.com/msdk/evalx/users/"));
        assert_eq!(decoded, user);
        assert_eq!(url.query(), None);
    }

    #[test]
    fn requests_reasons_when_configured() {
        let url = requestor("https://example.com", true)
            .user_url(&User::with_key("user"))
            .unwrap();
        assert_eq!(url.query(), Some("withReasons=true"));
    }

    #[test]
    fn invalid_base_url_is_unrecoverable() {
        let err = requestor("not a url", false)
            .user_url(&User::with_key("user"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidBaseUrl(_)));
        assert!(err.is_unrecoverable());
    }
}
