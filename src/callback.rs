//! Completion callbacks for background jobs.
//!
//! Delivery is best effort: failures are logged and never alter job state. Targets must be
//! public `https` endpoints; every address a host resolves to is checked against loopback,
//! private, link-local and multicast ranges, both when the URL is accepted and again right
//! before delivery. Redirects are never followed.

use reqwest::{Client, Url, redirect};
use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while validating or delivering a callback.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// Callback URL is malformed, uses a disallowed scheme or has no host.
    #[error("Invalid callback URL: {0}")]
    InvalidUrl(String),
    /// Host resolves to an address outside the public internet.
    #[error("Invalid callback URL: host '{host}' resolves to a {reason} IP address ({ip})")]
    BlockedAddress {
        /// Host as written in the URL.
        host: String,
        /// First offending address.
        ip: IpAddr,
        /// Address class (`private`, `loopback/localhost`, ...).
        reason: &'static str,
    },
    /// Host could not be resolved.
    #[error("Invalid callback URL: could not resolve host '{host}': {message}")]
    Unresolvable {
        /// Host as written in the URL.
        host: String,
        /// Resolver error.
        message: String,
    },
    /// HTTP layer failed before receiving a response.
    #[error("Callback request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Receiver answered with a non-success status (redirects included).
    #[error("Callback receiver responded with {0}")]
    UnexpectedStatus(reqwest::StatusCode),
}

/// Which callback targets are acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackPolicy {
    /// `https` only, and only hosts resolving to public addresses.
    #[default]
    PublicHttpsOnly,
    /// Also accept `http` and private-network hosts (local development and tests).
    AllowPrivateNetworks,
}

/// Address class that makes `ip` unacceptable as a callback target, if any.
pub fn blocked_reason(ip: IpAddr) -> Option<&'static str> {
    let ip = match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        v4 => v4,
    };
    match ip {
        IpAddr::V4(v4) if v4.is_loopback() => Some("loopback/localhost"),
        IpAddr::V4(v4) if v4.is_private() => Some("private"),
        IpAddr::V4(v4) if v4.is_link_local() => Some("link-local"),
        IpAddr::V4(v4) if v4.is_multicast() => Some("multicast"),
        IpAddr::V4(v4) if v4.is_unspecified() || v4.is_broadcast() => Some("reserved"),
        IpAddr::V6(v6) if v6.is_loopback() => Some("loopback/localhost"),
        IpAddr::V6(v6) if v6.is_unique_local() => Some("private"),
        IpAddr::V6(v6) if v6.is_unicast_link_local() => Some("link-local"),
        IpAddr::V6(v6) if v6.is_multicast() => Some("multicast"),
        IpAddr::V6(v6) if v6.is_unspecified() => Some("reserved"),
        _ => None,
    }
}

/// Syntactic validation of a caller-supplied callback URL.
pub fn parse_callback_url(raw: &str, policy: CallbackPolicy) -> Result<Url, CallbackError> {
    let url = Url::parse(raw.trim()).map_err(|err| CallbackError::InvalidUrl(err.to_string()))?;
    let scheme_ok = match policy {
        CallbackPolicy::PublicHttpsOnly => url.scheme() == "https",
        CallbackPolicy::AllowPrivateNetworks => matches!(url.scheme(), "http" | "https"),
    };
    if !scheme_ok {
        return Err(CallbackError::InvalidUrl(match policy {
            CallbackPolicy::PublicHttpsOnly => "only HTTPS URLs are allowed".to_string(),
            CallbackPolicy::AllowPrivateNetworks => {
                format!("unsupported scheme '{}'", url.scheme())
            }
        }));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(CallbackError::InvalidUrl(
            "URL must have a valid hostname".to_string(),
        ));
    }
    Ok(url)
}

/// Reject `host` when any of its resolved addresses is blocked.
pub fn check_addresses(
    host: &str,
    addresses: impl IntoIterator<Item = IpAddr>,
) -> Result<(), CallbackError> {
    for ip in addresses {
        if let Some(reason) = blocked_reason(ip) {
            return Err(CallbackError::BlockedAddress {
                host: host.to_string(),
                ip,
                reason,
            });
        }
    }
    Ok(())
}

async fn resolve(url: &Url) -> Result<Vec<IpAddr>, CallbackError> {
    let host = url.host_str().unwrap_or_default();
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    let port = url.port_or_known_default().unwrap_or(443);
    let addresses: Vec<IpAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|err| CallbackError::Unresolvable {
            host: host.to_string(),
            message: err.to_string(),
        })?
        .map(|addr| addr.ip())
        .collect();
    if addresses.is_empty() {
        return Err(CallbackError::Unresolvable {
            host: host.to_string(),
            message: "no addresses returned".to_string(),
        });
    }
    Ok(addresses)
}

/// HTTP client used to notify callers when a background job finishes.
#[derive(Clone)]
pub struct CallbackSender {
    client: Client,
    policy: CallbackPolicy,
}

impl CallbackSender {
    /// Build a sender with the given connect and total timeouts. Redirects are disabled.
    pub fn new(
        connect_timeout: Duration,
        read_timeout: Duration,
        policy: CallbackPolicy,
    ) -> Result<Self, CallbackError> {
        let client = Client::builder()
            .user_agent("docrag/callback")
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { client, policy })
    }

    /// Parse `raw` and check that its host is an acceptable target.
    pub async fn validate(&self, raw: &str) -> Result<Url, CallbackError> {
        let url = parse_callback_url(raw, self.policy)?;
        self.check_target(&url).await?;
        Ok(url)
    }

    async fn check_target(&self, url: &Url) -> Result<(), CallbackError> {
        if self.policy == CallbackPolicy::AllowPrivateNetworks {
            return Ok(());
        }
        let addresses = resolve(url).await?;
        check_addresses(url.host_str().unwrap_or_default(), addresses)
    }

    /// POST `payload` to `url`, reporting failures to the caller.
    ///
    /// The target is re-validated first so a host that started resolving to a private address
    /// after acceptance is not contacted.
    pub async fn send<T: Serialize + ?Sized>(
        &self,
        url: &Url,
        payload: &T,
    ) -> Result<(), CallbackError> {
        let url = parse_callback_url(url.as_str(), self.policy)?;
        self.check_target(&url).await?;
        let response = self.client.post(url.clone()).json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(url = %url, %status, "Callback delivered");
            Ok(())
        } else {
            Err(CallbackError::UnexpectedStatus(status))
        }
    }

    /// POST `payload` to `url`, logging instead of returning failures.
    pub async fn notify<T: Serialize + ?Sized>(&self, url: &Url, payload: &T) {
        if let Err(error) = self.send(url, payload).await {
            tracing::warn!(url = %url, error = %error, "Callback delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn sender(policy: CallbackPolicy) -> CallbackSender {
        CallbackSender::new(Duration::from_secs(1), Duration::from_secs(2), policy)
            .expect("sender")
    }

    fn ip(raw: &str) -> IpAddr {
        raw.parse().expect("ip")
    }

    #[test]
    fn classifies_non_public_addresses() {
        let cases = [
            ("10.0.0.1", "private"),
            ("172.31.255.255", "private"),
            ("192.168.0.1", "private"),
            ("127.0.0.2", "loopback/localhost"),
            ("::1", "loopback/localhost"),
            ("::ffff:127.0.0.1", "loopback/localhost"),
            ("169.254.169.254", "link-local"),
            ("fe80::1", "link-local"),
            ("224.0.0.1", "multicast"),
            ("239.255.255.255", "multicast"),
            ("fd00::1", "private"),
        ];
        for (raw, reason) in cases {
            assert_eq!(blocked_reason(ip(raw)), Some(reason), "{raw}");
        }
    }

    #[test]
    fn public_addresses_are_allowed() {
        for raw in ["8.8.8.8", "1.1.1.1", "151.101.1.140", "2001:4860:4860::8888"] {
            assert_eq!(blocked_reason(ip(raw)), None, "{raw}");
        }
    }

    #[test]
    fn only_https_is_accepted_by_default() {
        let strict = CallbackPolicy::PublicHttpsOnly;
        for raw in [
            "http://example.com/callback",
            "ftp://example.com/callback",
            "file:///etc/passwd",
            "not a url at all",
        ] {
            assert!(parse_callback_url(raw, strict).is_err(), "{raw}");
        }
        assert!(parse_callback_url("https://example.com/callback", strict).is_ok());
    }

    #[test]
    fn url_without_host_is_rejected() {
        assert!(parse_callback_url("https://", CallbackPolicy::PublicHttpsOnly).is_err());
    }

    #[test]
    fn relaxed_policy_accepts_plain_http() {
        let relaxed = CallbackPolicy::AllowPrivateNetworks;
        assert!(parse_callback_url("http://127.0.0.1:9000/hook", relaxed).is_ok());
        assert!(parse_callback_url("ftp://example.com/hook", relaxed).is_err());
    }

    #[test]
    fn every_resolved_address_is_checked() {
        let error = check_addresses("round-robin.example", [ip("8.8.8.8"), ip("192.168.1.1")])
            .expect_err("private address in the set");
        assert!(matches!(
            error,
            CallbackError::BlockedAddress { reason: "private", .. }
        ));
        assert!(check_addresses("public.example", [ip("8.8.8.8"), ip("1.1.1.1")]).is_ok());
    }

    #[tokio::test]
    async fn literal_private_hosts_are_rejected() {
        let strict = sender(CallbackPolicy::PublicHttpsOnly);
        let cases = [
            ("https://127.0.0.1/callback", "loopback/localhost"),
            ("https://[::1]/callback", "loopback/localhost"),
            ("https://169.254.169.254/latest/meta-data", "link-local"),
            ("https://10.1.2.3/callback", "private"),
        ];
        for (raw, expected) in cases {
            let error = strict.validate(raw).await.expect_err(raw);
            assert!(
                matches!(error, CallbackError::BlockedAddress { reason, .. } if reason == expected),
                "{raw}"
            );
        }
    }

    #[tokio::test]
    async fn localhost_name_is_rejected() {
        let error = sender(CallbackPolicy::PublicHttpsOnly)
            .validate("https://localhost/callback")
            .await
            .expect_err("localhost");
        assert!(error.to_string().contains("loopback/localhost"));
    }

    #[tokio::test]
    async fn strict_sender_refuses_local_receivers() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(200);
            })
            .await;

        let url = Url::parse(&server.url("/hook")).expect("url");
        let error = sender(CallbackPolicy::PublicHttpsOnly)
            .send(&url, &json!({}))
            .await
            .expect_err("local receiver");
        assert!(matches!(error, CallbackError::InvalidUrl(_)));
        assert_eq!(mock.hits_async().await, 0);
    }

    #[tokio::test]
    async fn posts_json_payload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/hook")
                    .json_body(json!({ "success": true }));
                then.status(200);
            })
            .await;

        let relaxed = sender(CallbackPolicy::AllowPrivateNetworks);
        let url = relaxed.validate(&server.url("/hook")).await.expect("url");
        relaxed
            .send(&url, &json!({ "success": true }))
            .await
            .expect("delivered");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn redirects_are_not_followed() {
        let server = MockServer::start_async().await;
        let target = server
            .mock_async(|when, then| {
                when.method(POST).path("/internal");
                then.status(200);
            })
            .await;
        let internal = server.url("/internal");
        server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(307).header("location", internal.as_str());
            })
            .await;

        let url = Url::parse(&server.url("/hook")).expect("url");
        let error = sender(CallbackPolicy::AllowPrivateNetworks)
            .send(&url, &json!({}))
            .await
            .expect_err("redirect");
        assert!(matches!(error, CallbackError::UnexpectedStatus(status) if status.as_u16() == 307));
        assert_eq!(target.hits_async().await, 0);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(403);
            })
            .await;

        let url = Url::parse(&server.url("/hook")).expect("url");
        let error = sender(CallbackPolicy::AllowPrivateNetworks)
            .send(&url, &json!({}))
            .await
            .expect_err("403 should fail");
        assert!(matches!(error, CallbackError::UnexpectedStatus(status) if status.as_u16() == 403));
    }
}
