//! Runs the core's HTTP requests.

use async_trait::async_trait;
use crux_http::protocol::{HttpHeader, HttpRequest, HttpResponse, HttpResult};
use events_shared::AppConfig;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::ShellError;

/// Performs one request. Dropping the returned future aborts the request.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> HttpResult;
}

#[async_trait]
impl<T: HttpExecutor + ?Sized> HttpExecutor for Arc<T> {
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        (**self).execute(request).await
    }
}

/// Executor backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new(config: &AppConfig) -> Result<Self, ShellError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn send(&self, request: HttpRequest) -> crux_http::Result<HttpResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| crux_http::Error::Url(e.to_string()))?;

        let mut builder = self.client.request(method, request.url.as_str());
        for HttpHeader { name, value } in request.headers {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(map_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|value| HttpHeader {
                    name: name.as_str().to_string(),
                    value: value.to_string(),
                })
            })
            .collect();
        let body = response.bytes().await.map_err(map_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

fn map_error(error: reqwest::Error) -> crux_http::Error {
    if error.is_timeout() {
        crux_http::Error::Timeout
    } else if error.is_builder() {
        crux_http::Error::Url(error.to_string())
    } else {
        crux_http::Error::Io(error.to_string())
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        match self.send(request).await {
            Ok(response) => {
                debug!(status = response.status, "Response");
                HttpResult::Ok(response)
            }
            Err(error) => {
                debug!(error = %error, "Request failed");
                HttpResult::Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use events_shared::client::decode_event;
    use events_shared::{EventId, ErrorKind};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Serves `/events/42`, answers every other path with a 404 and leaves
    /// `/slow` hanging.
    async fn serve() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(respond(stream));
            }
        });
        addr
    }

    async fn respond(mut stream: TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let read = stream.read(&mut buf).await.unwrap();
            if read == 0 {
                return;
            }
            request.extend_from_slice(&buf[..read]);
        }
        let head = String::from_utf8_lossy(&request);
        let path = head.split_whitespace().nth(1).unwrap_or_default().to_string();

        let (status, body) = match path.as_str() {
            "/events/42" => ("200 OK", r#"{"event":{"id":"42","title":"Meetup"}}"#),
            "/slow" => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                return;
            }
            _ => ("404 Not Found", r#"{"message":"Event not found"}"#),
        };
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
    }

    fn executor(addr: SocketAddr) -> ReqwestExecutor {
        let config = AppConfig::default()
            .with_api_base_url(&format!("http://{addr}/"))
            .unwrap();
        ReqwestExecutor::new(&config).unwrap()
    }

    fn get(addr: SocketAddr, path: &str) -> HttpRequest {
        HttpRequest::get(&format!("http://{addr}{path}"))
            .header("Accept", "application/json")
            .build()
    }

    #[tokio::test]
    async fn test_success_returns_status_and_body() {
        let addr = serve().await;

        let result = executor(addr).execute(get(addr, "/events/42")).await;

        assert_matches!(&result, HttpResult::Ok(response) => {
            assert_eq!(response.status, 200);
            assert!(response
                .headers
                .iter()
                .any(|h| h.name == "content-type" && h.value == "application/json"));
        });
        assert_eq!(
            decode_event(&EventId::new("42"), result).unwrap().title,
            "Meetup"
        );
    }

    #[tokio::test]
    async fn test_error_status_keeps_server_message() {
        let addr = serve().await;

        let result = executor(addr).execute(get(addr, "/events/999")).await;

        assert_matches!(&result, HttpResult::Ok(response) if response.status == 404);
        let error = decode_event(&EventId::new("999"), result).unwrap_err();
        assert_eq!(error.kind, ErrorKind::NotFound);
        assert_eq!(error.message.as_deref(), Some("Event not found"));
    }

    #[tokio::test]
    async fn test_refused_connection_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = executor(addr).execute(get(addr, "/events/42")).await;

        assert_matches!(result, HttpResult::Err(crux_http::Error::Io(_)));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let addr = serve().await;
        let config = AppConfig::default().with_request_timeout(Duration::from_millis(100));
        let executor = ReqwestExecutor::new(&config).unwrap();

        let result = executor.execute(get(addr, "/slow")).await;

        assert_matches!(result, HttpResult::Err(crux_http::Error::Timeout));
    }
}
