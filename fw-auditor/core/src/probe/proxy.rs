use super::{error_chain, Outcome};
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode, Url};
use std::{sync::Arc, time::Duration};
use tracing::trace;

pub const PROXY_REJECTED: &str = "Error 403 is returned from the proxy server.";
pub const NO_PROXY: &str = "no forward proxy is configured";

/// Requests a destination URL through the forward proxy.
#[derive(Clone, Debug)]
pub struct ProxyProbe(Option<Arc<Inner>>);

#[derive(Debug)]
struct Inner {
    client: Client,
    proxy: Url,
}

impl ProxyProbe {
    pub fn new(proxy: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .proxy(reqwest::Proxy::all(proxy.clone()).context("invalid proxy URL")?)
            .timeout(timeout)
            .build()
            .context("failed to build proxy client")?;
        Ok(Self(Some(Arc::new(Inner { client, proxy }))))
    }

    /// A probe that fails every request because no proxy was configured.
    pub fn unconfigured() -> Self {
        Self(None)
    }

    pub async fn probe(&self, address: &str) -> Outcome {
        let Some(inner) = self.0.as_deref() else {
            return Outcome::Error(NO_PROXY.to_string());
        };

        let rsp = match inner.client.get(address).send().await {
            Ok(rsp) => rsp,
            Err(error) => return Outcome::Error(error_chain(&error)),
        };
        trace!(status = %rsp.status(), url = %rsp.url(), "Response");
        let outcome = classify(rsp.status(), rsp.url(), &inner.proxy);
        drop(rsp);
        outcome
    }
}

/// Reachability is all that's being tested, so any response counts as
/// success unless the proxy itself refused the request.
///
/// Proxies that deny a request typically redirect the client to a block page
/// served from the proxy's own host, so a 403 whose final URL points at the
/// proxy is attributed to the proxy rather than to the origin.
fn classify(status: StatusCode, responder: &Url, proxy: &Url) -> Outcome {
    if status == StatusCode::FORBIDDEN && same_host(responder, proxy) {
        return Outcome::Error(PROXY_REJECTED.to_string());
    }
    Outcome::Success
}

fn same_host(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    fn url(s: &str) -> Url {
        s.parse().unwrap()
    }

    #[test]
    fn classifies_responses() {
        let proxy = url("http://proxy.internal:3128");

        assert_eq!(
            classify(StatusCode::OK, &url("https://internal.example.com"), &proxy),
            Outcome::Success
        );
        assert_eq!(
            classify(
                StatusCode::NOT_FOUND,
                &url("https://internal.example.com/missing"),
                &proxy
            ),
            Outcome::Success
        );
        // A 403 from the origin still proves reachability.
        assert_eq!(
            classify(
                StatusCode::FORBIDDEN,
                &url("https://internal.example.com"),
                &proxy
            ),
            Outcome::Success
        );
        assert_eq!(
            classify(
                StatusCode::FORBIDDEN,
                &url("http://proxy.internal:3128/denied"),
                &proxy
            ),
            Outcome::Error(PROXY_REJECTED.to_string())
        );
        // Same host, different port.
        assert_eq!(
            classify(
                StatusCode::FORBIDDEN,
                &url("http://proxy.internal/denied"),
                &proxy
            ),
            Outcome::Success
        );
    }

    /// Serves HTTP/1 responses chosen by `respond` from the request line of
    /// each connection.
    async fn fake_proxy(respond: fn(&str, u16) -> String) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (mut conn, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        let n = conn.read(&mut chunk).await.unwrap();
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }
                    let head = String::from_utf8_lossy(&buf);
                    let request_line = head.lines().next().unwrap_or_default().to_string();
                    let rsp = respond(&request_line, port);
                    conn.write_all(rsp.as_bytes()).await.unwrap();
                    conn.shutdown().await.unwrap();
                });
            }
        });
        url(&format!("http://127.0.0.1:{port}"))
    }

    fn status(code: u16, reason: &str) -> String {
        format!("HTTP/1.1 {code} {reason}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
    }

    #[tokio::test]
    async fn proxied_ok() {
        let proxy = fake_proxy(|request_line, _| {
            assert_eq!(request_line, "GET http://internal.example.com/ HTTP/1.1");
            status(200, "OK")
        })
        .await;
        let probe = ProxyProbe::new(proxy, Duration::from_secs(1)).unwrap();

        assert_eq!(
            probe.probe("http://internal.example.com").await,
            Outcome::Success
        );
    }

    #[tokio::test]
    async fn proxied_origin_forbidden() {
        let proxy = fake_proxy(|_, _| status(403, "Forbidden")).await;
        let probe = ProxyProbe::new(proxy, Duration::from_secs(1)).unwrap();

        assert_eq!(
            probe.probe("http://internal.example.com/admin").await,
            Outcome::Success
        );
    }

    #[tokio::test]
    async fn proxy_rejects() {
        let proxy = fake_proxy(|request_line, port| {
            if request_line.contains("/denied") {
                status(403, "Forbidden")
            } else {
                format!(
                    "HTTP/1.1 302 Found\r\nlocation: http://127.0.0.1:{port}/denied\r\n\
                     content-length: 0\r\nconnection: close\r\n\r\n"
                )
            }
        })
        .await;
        let probe = ProxyProbe::new(proxy, Duration::from_secs(1)).unwrap();

        assert_eq!(
            probe.probe("http://blocked.example.com").await,
            Outcome::Error(PROXY_REJECTED.to_string())
        );
    }

    #[tokio::test]
    async fn transport_errors() {
        // Nothing listens on the proxy port.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let proxy = url(&format!("http://127.0.0.1:{port}"));
        let probe = ProxyProbe::new(proxy, Duration::from_secs(1)).unwrap();

        assert!(matches!(
            probe.probe("http://internal.example.com").await,
            Outcome::Error(_)
        ));
        assert!(matches!(
            probe.probe("not a url").await,
            Outcome::Error(_)
        ));
    }

    #[tokio::test]
    async fn unconfigured() {
        assert_eq!(
            ProxyProbe::unconfigured()
                .probe("https://internal.example.com")
                .await,
            Outcome::Error(NO_PROXY.to_string())
        );
    }
}
