//! HTTP listener for provider delivery events.
//!
//! A hand-rolled HTTP/1.1 loop over std's TcpListener. Every POST must
//! carry a valid HMAC signature computed with the shared webhook secret;
//! unsigned or stale requests are rejected before any parsing.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use super::signing;
use crate::db::Database;
use crate::models::DeliveryEvent;
use crate::tracking::{self, TrackingOutcome};

pub struct EventListener {
    port: u16,
    db_path: PathBuf,
    secret: String,
    start_time: Instant,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct IngestResponse {
    recorded: usize,
    duplicates: usize,
    unknown: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl EventListener {
    /// Create a listener. Refuses to start without a configured secret.
    pub fn new(port: u16, db: &Database, db_path: PathBuf) -> Result<Self> {
        let secret = db
            .setting_get("webhook_secret")?
            .ok_or_else(|| anyhow!("no webhook secret; run: campaigncmd events secret --rotate"))?;

        Ok(Self {
            port,
            db_path,
            secret,
            start_time: Instant::now(),
        })
    }

    /// Accept loop (blocking). Polls the shutdown flag between accepts.
    pub fn start(&self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.port))?;
        listener.set_nonblocking(true)?;

        println!("Event listener on 0.0.0.0:{}", self.port);

        while !shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _peer)) => {
                    if let Err(e) = self.handle_connection(stream) {
                        warn!(error = %e, "event request failed");
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        stream.set_read_timeout(Some(std::time::Duration::from_secs(30)))?;
        stream.set_write_timeout(Some(std::time::Duration::from_secs(30)))?;

        let mut reader = BufReader::new(stream.try_clone()?);
        let mut request_line = String::new();
        reader.read_line(&mut request_line)?;

        let parts: Vec<&str> = request_line.trim().split_whitespace().collect();
        if parts.len() < 2 {
            return send_json(&mut stream, 400, &ErrorResponse { error: "bad request".into() });
        }

        let method = parts[0];
        let path = parts[1];

        // Parse headers
        let mut headers = HashMap::new();
        let mut content_length = 0usize;

        loop {
            let mut header_line = String::new();
            reader.read_line(&mut header_line)?;
            let header_line = header_line.trim();
            if header_line.is_empty() {
                break;
            }
            if let Some((key, value)) = header_line.split_once(':') {
                let key = key.trim().to_lowercase();
                let value = value.trim().to_string();
                if key == "content-length" {
                    content_length = value.parse().unwrap_or(0);
                }
                headers.insert(key, value);
            }
        }

        let mut body = vec![0u8; content_length];
        if content_length > 0 {
            reader.read_exact(&mut body)?;
        }

        match (method, path) {
            ("GET", "/health") => self.handle_health(&mut stream),
            ("POST", "/events") => self.handle_events(&mut stream, &headers, &body),
            _ => send_json(&mut stream, 404, &ErrorResponse { error: "not found".into() }),
        }
    }

    fn handle_health(&self, stream: &mut TcpStream) -> Result<()> {
        send_json(
            stream,
            200,
            &HealthResponse {
                status: "ok",
                uptime_secs: self.start_time.elapsed().as_secs(),
            },
        )
    }

    fn handle_events(
        &self,
        stream: &mut TcpStream,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<()> {
        let (Some(timestamp), Some(signature)) =
            (headers.get("x-timestamp"), headers.get("x-signature"))
        else {
            return send_json(
                stream,
                401,
                &ErrorResponse { error: "missing signature headers".into() },
            );
        };

        if let Err(e) = signing::verify_signature(&self.secret, timestamp, body, signature) {
            warn!(error = %e, "rejected unsigned event post");
            return send_json(stream, 401, &ErrorResponse { error: e.to_string() });
        }

        // Accept a single event object or an array of them.
        let events: Vec<DeliveryEvent> = match serde_json::from_slice::<Vec<DeliveryEvent>>(body) {
            Ok(events) => events,
            Err(_) => match serde_json::from_slice::<DeliveryEvent>(body) {
                Ok(event) => vec![event],
                Err(e) => {
                    return send_json(stream, 422, &ErrorResponse { error: e.to_string() });
                }
            },
        };

        // Each request gets its own connection; the listener may outlive
        // any single handle.
        let db = Database::open_at(self.db_path.clone())?;

        let mut response = IngestResponse {
            recorded: 0,
            duplicates: 0,
            unknown: 0,
        };
        for event in &events {
            match tracking::apply_event(&db, event)? {
                TrackingOutcome::Recorded => response.recorded += 1,
                TrackingOutcome::Duplicate => response.duplicates += 1,
                TrackingOutcome::UnknownMessage => response.unknown += 1,
            }
        }

        send_json(stream, 200, &response)
    }
}

fn send_json<T: Serialize>(stream: &mut TcpStream, status: u16, body: &T) -> Result<()> {
    let body = serde_json::to_string(body)?;
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        422 => "Unprocessable Entity",
        _ => "Error",
    };
    write!(
        stream,
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    )?;
    Ok(())
}
