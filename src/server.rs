use crate::local::{self, LocalContext, LocalResponse};
use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use tiny_http::{Header, Response, Server};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Serves the local API until `shutdown` fires. Blocking: run it on a
/// blocking thread, handlers are driven on `runtime`.
pub fn serve(
    addr: &str,
    ctx: Arc<LocalContext>,
    runtime: Handle,
    shutdown: CancellationToken,
) -> Result<()> {
    let server = Server::http(addr)
        .map_err(|e| anyhow!("Failed to bind local API on {}: {:?}", addr, e))?;
    tracing::info!(%addr, "local API listening");

    let mut failures = RecvFailures::default();
    while !shutdown.is_cancelled() {
        let maybe_request = match server.recv_timeout(Duration::from_millis(500)) {
            Ok(maybe_request) => {
                failures.reset();
                maybe_request
            }
            Err(e) => {
                failures.record(&e)?;
                std::thread::sleep(failures.backoff());
                continue;
            }
        };
        let Some(request) = maybe_request else {
            continue;
        };

        let method = request.method().as_str().to_string();
        let url = request.url().to_string();
        let response = runtime.block_on(local::route(&ctx, &method, &url));
        tracing::info!(%method, %url, status = response.status, "local API request");

        if let Err(e) = request.respond(json_response(&response)) {
            tracing::warn!(error = %e, "failed to write local API response");
        }
    }

    tracing::info!("local API stopped");
    Ok(())
}

/// Consecutive listener errors after which `serve` gives up.
const MAX_RECV_FAILURES: u32 = 10;

/// Tracks consecutive `recv_timeout` failures so a broken listener backs off
/// and eventually stops instead of spinning.
#[derive(Debug, Default)]
struct RecvFailures {
    consecutive: u32,
}

impl RecvFailures {
    fn record(&mut self, error: &std::io::Error) -> Result<()> {
        self.consecutive += 1;
        tracing::warn!(error = %error, attempt = self.consecutive, "local API failed to receive request");
        if self.consecutive >= MAX_RECV_FAILURES {
            return Err(anyhow!(
                "Local API listener failed {} times in a row: {}",
                self.consecutive,
                error
            ));
        }
        Ok(())
    }

    fn backoff(&self) -> Duration {
        Duration::from_millis(100 * u64::from(self.consecutive.min(MAX_RECV_FAILURES)))
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

fn json_response(response: &LocalResponse) -> Response<std::io::Cursor<Vec<u8>>> {
    let mut reply = Response::from_string(response.body.to_string()).with_status_code(response.status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        reply.add_header(header);
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_recv_failures_back_off_then_give_up() {
        let error = std::io::Error::other("listener closed");
        let mut failures = RecvFailures::default();
        for attempt in 1..MAX_RECV_FAILURES {
            failures.record(&error).unwrap();
            assert_eq!(failures.backoff(), Duration::from_millis(100 * u64::from(attempt)));
        }
        let err = failures.record(&error).unwrap_err();
        assert!(err.to_string().contains("failed 10 times in a row"));

        failures.reset();
        assert_eq!(failures.backoff(), Duration::ZERO);
        assert!(failures.record(&error).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serves_routes_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("srv.db").display());
        let db = Database::new(&url).await.unwrap();
        db.run_migrations().await.unwrap();
        let bills_path = dir.path().join("bills_data.json");
        std::fs::write(&bills_path, r#"[{"id": "1", "name": "Gas"}]"#).unwrap();
        let ctx = Arc::new(LocalContext { bills_path, db });

        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap().to_string();
        drop(probe);

        let shutdown = CancellationToken::new();
        let server = {
            let (addr, ctx, shutdown) = (addr.clone(), ctx.clone(), shutdown.clone());
            let runtime = Handle::current();
            tokio::task::spawn_blocking(move || serve(&addr, ctx, runtime, shutdown))
        };

        let http = reqwest::Client::new();
        let mut bills = None;
        for _ in 0..50 {
            match http.get(format!("http://{}/api/bills", addr)).send().await {
                Ok(response) => {
                    bills = Some(response);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
        let bills = bills.expect("local API never came up");
        assert_eq!(bills.status().as_u16(), 200);
        let body: serde_json::Value = bills.json().await.unwrap();
        assert_eq!(body["bills"][0]["name"], "Gas");

        let missing = http
            .get(format!("http://{}/api/missing", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status().as_u16(), 404);

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
