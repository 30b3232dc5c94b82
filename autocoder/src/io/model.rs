//! Model backend boundary.
//!
//! The [`ModelClient`] trait decouples the orchestrator from the transport.
//! [`HttpModelClient`] speaks the OpenAI chat-completions protocol served by
//! LM Studio, llama.cpp and similar local backends. Tests use scripted clients.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::io::config::ModelConfig;

/// Abstraction over language-model backends.
pub trait ModelClient {
    /// Send a system/user prompt pair and return the raw reply text.
    fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Check that the backend answers. Defaults to a no-op.
    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Blocking OpenAI-compatible chat completion client.
pub struct HttpModelClient {
    client: Client,
    config: ModelConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl HttpModelClient {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::TransportFailure(format!("build http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/{suffix}", self.config.endpoint.trim_end_matches('/'))
    }
}

impl ModelClient for HttpModelClient {
    #[instrument(skip_all, fields(model = %self.config.model, system_bytes = system.len(), user_bytes = user.len()))]
    fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };
        let url = self.url("chat/completions");
        debug!(url = %url, "sending chat completion");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .map_err(|e| Error::TransportFailure(format!("POST {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::TransportFailure(format!(
                "POST {url}: status {status}: {}",
                body.trim()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| Error::TransportFailure(format!("decode chat response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| Error::TransportFailure("model returned no content".to_string()))?;

        info!(reply_bytes = content.len(), "model replied");
        Ok(content)
    }

    #[instrument(skip_all)]
    fn ping(&self) -> Result<()> {
        let url = self.url("models");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::TransportFailure(format!("GET {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::TransportFailure(format!(
                "GET {url}: status {}",
                response.status()
            )));
        }
        debug!(url = %url, "model endpoint reachable");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve exactly one HTTP request with a canned reply; returns the base URL
    /// and a handle yielding the raw request (head and body).
    fn serve_once(status: &str, body: &str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let reply = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read line");
                if let Some((name, value)) = line.split_once(':')
                    && name.eq_ignore_ascii_case("content-length")
                {
                    content_length = value.trim().parse().expect("length");
                }
                let done = line == "\r\n" || line.is_empty();
                head.push_str(&line);
                if done {
                    break;
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).expect("read body");
            let mut stream = stream;
            stream.write_all(reply.as_bytes()).expect("write reply");
            head + &String::from_utf8_lossy(&body)
        });
        (format!("http://{addr}/v1"), handle)
    }

    fn client(endpoint: String) -> HttpModelClient {
        HttpModelClient::new(ModelConfig {
            endpoint,
            timeout_secs: 10,
            ..ModelConfig::default()
        })
        .expect("client")
    }

    #[test]
    fn complete_returns_first_choice_content() {
        let (endpoint, server) = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"Begin command:\ntype: read\npath: a\nEnd command."}}]}"#,
        );
        let reply = client(endpoint).complete("sys", "do it").expect("complete");
        assert!(reply.starts_with("Begin command:"));

        let request = server.join().expect("server");
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request.contains(r#""model":"local-model""#));
        assert!(request.contains(r#""role":"system","content":"sys""#));
        assert!(request.contains(r#""max_tokens":16384"#));
    }

    #[test]
    fn error_status_is_transport_failure() {
        let (endpoint, server) = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#);
        let err = client(endpoint).complete("s", "u").unwrap_err();
        assert!(matches!(err, Error::TransportFailure(ref msg) if msg.contains("500")));
        server.join().expect("server");
    }

    #[test]
    fn empty_content_is_transport_failure() {
        let (endpoint, server) = serve_once("200 OK", r#"{"choices":[]}"#);
        let err = client(endpoint).complete("s", "u").unwrap_err();
        assert!(matches!(err, Error::TransportFailure(_)));
        server.join().expect("server");
    }

    #[test]
    fn ping_hits_models_endpoint() {
        let (endpoint, server) = serve_once("200 OK", r#"{"data":[]}"#);
        client(endpoint).ping().expect("ping");
        let request = server.join().expect("server");
        assert!(request.starts_with("GET /v1/models"));
    }

    #[test]
    fn unreachable_backend_is_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let err = client(format!("http://{addr}/v1")).ping().unwrap_err();
        assert!(matches!(err, Error::TransportFailure(_)));
    }
}
