//! Serves recorded scan history as JSON.
//!
//! - `GET /history` returns every row.
//! - `GET /history/<namespace>/<name>` returns the rows of one rule.

use crate::{
    core::HistoryScan,
    index::{rules::rule_id, HistoryIndex},
};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, service::service_fn, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use tokio::net::TcpListener;
use tracing::{debug, info, info_span, warn, Instrument};

type Body = Full<Bytes>;

/// Accepts connections on `listener` until `drain` is signaled.
pub async fn serve(listener: TcpListener, history: HistoryIndex, drain: drain::Watch) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "History server listening");
    }

    let signaled = drain.signaled();
    tokio::pin!(signaled);
    loop {
        let (socket, client) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(error) => {
                    warn!(%error, "Failed to accept connection");
                    continue;
                }
            },
            release = &mut signaled => {
                debug!("Shutting down");
                drop(release);
                return;
            }
        };

        let history = history.clone();
        let svc = service_fn(move |req: Request<hyper::body::Incoming>| {
            let rsp = handle(&history, &req);
            async move { Ok::<_, Infallible>(rsp) }
        });
        tokio::spawn(
            async move {
                if let Err(error) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(socket), svc)
                    .await
                {
                    debug!(%error, "Connection failed");
                }
            }
            .instrument(info_span!("conn", %client)),
        );
    }
}

fn handle<B>(history: &HistoryIndex, req: &Request<B>) -> Response<Body> {
    let rows = match req.uri().path().trim_end_matches('/') {
        "/history" => history.all(),
        path => match path.strip_prefix("/history/").and_then(|p| p.split_once('/')) {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                history.by_rule(&rule_id(ns, name))
            }
            _ => return empty(StatusCode::NOT_FOUND),
        },
    };

    match *req.method() {
        Method::GET | Method::HEAD => json(&rows),
        _ => empty(StatusCode::METHOD_NOT_ALLOWED),
    }
}

fn json(rows: &[HistoryScan]) -> Response<Body> {
    let bytes = match serde_json::to_vec(rows) {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(%error, "Failed to encode history");
            return empty(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let mut rsp = Response::new(Body::from(bytes));
    rsp.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    rsp
}

fn empty(status: StatusCode) -> Response<Body> {
    let mut rsp = Response::new(Body::default());
    *rsp.status_mut() = status;
    rsp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HistoryStore, Node, NodeAddress, Rule, RuleMetadata, ScanStatus};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use maplit::btreeset;
    use serde_json::{json, Value};

    fn mk_node() -> Node {
        let now = Utc::now();
        Node {
            id: "uid-1".into(),
            name: "node-a".to_string(),
            roles: btreeset! {"web".to_string()},
            address: NodeAddress {
                internal_ip: Some("10.0.0.1".to_string()),
                ..Default::default()
            },
            created_at: now,
            updated_at: now,
        }
    }

    fn mk_rule(id: &str, proxy: bool) -> Rule {
        Rule {
            id: id.into(),
            is_active: true,
            roles: vec!["web".to_string()],
            destination_addresses: vec![],
            destination_ports: vec![],
            is_through_proxy: proxy,
            metadata: RuleMetadata::default(),
            generation: 0,
            created_at: None,
            updated_at: None,
        }
    }

    async fn mk_history() -> HistoryIndex {
        let history = HistoryIndex::default();
        let node = mk_node();

        let mut scan = HistoryScan::pending(
            &mk_rule("ns/egress", false),
            &node,
            "10.1.0.1".to_string(),
            Some("tcp/443".to_string()),
        );
        scan.status = ScanStatus::Error;
        scan.error_message = Some("connection refused".to_string());
        history.upsert(scan).await.unwrap();

        let scan = HistoryScan::pending(
            &mk_rule("ns/web", true),
            &node,
            "https://example.com".to_string(),
            None,
        );
        history.upsert(scan).await.unwrap();
        history
    }

    async fn get(history: &HistoryIndex, method: Method, uri: &str) -> (StatusCode, Bytes) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(())
            .unwrap();
        let rsp = handle(history, &req);
        let status = rsp.status();
        let body = rsp.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    #[tokio::test]
    async fn lists_rows_by_rule() {
        let history = mk_history().await;

        let (status, body) = get(&history, Method::GET, "/history/ns/egress").await;
        assert_eq!(status, StatusCode::OK);
        let rows: Value = serde_json::from_slice(&body).unwrap();
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["ruleId"], json!("ns/egress"));
        assert_eq!(rows[0]["nodeId"], json!("uid-1"));
        assert_eq!(rows[0]["nodeAddress"]["internalIp"], json!("10.0.0.1"));
        assert_eq!(rows[0]["destinationAddress"], json!("10.1.0.1"));
        assert_eq!(rows[0]["destinationPort"], json!("tcp/443"));
        assert_eq!(rows[0]["status"], json!("error"));
        assert_eq!(rows[0]["errorMessage"], json!("connection refused"));
        assert!(rows[0].get("generation").is_none());

        let (status, body) = get(&history, Method::GET, "/history/ns/missing").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"[]");
    }

    #[tokio::test]
    async fn lists_all_rows() {
        let history = mk_history().await;
        let (status, body) = get(&history, Method::GET, "/history").await;
        assert_eq!(status, StatusCode::OK);
        let rows: Value = serde_json::from_slice(&body).unwrap();
        let ids = rows
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["ruleId"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["ns/egress", "ns/web"]);
        assert_eq!(rows[1]["destinationPort"], Value::Null);
        assert_eq!(rows[1]["isThroughProxy"], json!(true));
        assert_eq!(rows[1]["status"], json!("pending"));
    }

    #[tokio::test]
    async fn rejects_unknown_routes_and_methods() {
        let history = mk_history().await;
        for uri in ["/", "/ready", "/history/ns", "/history/ns/egress/extra"] {
            let (status, _) = get(&history, Method::GET, uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }
        let (status, _) = get(&history, Method::POST, "/history").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn serves_rows_over_http() {
        let history = mk_history().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (signal, watch) = drain::channel();
        let server = tokio::spawn(serve(listener, history, watch));

        let rsp = reqwest::get(format!("http://{addr}/history/ns/web"))
            .await
            .unwrap();
        assert_eq!(rsp.status(), reqwest::StatusCode::OK);
        assert_eq!(
            rsp.headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
        let rows: Value = serde_json::from_slice(&rsp.bytes().await.unwrap()).unwrap();
        assert_eq!(rows[0]["destinationAddress"], json!("https://example.com"));

        signal.drain().await;
        server.await.unwrap();
    }
}
