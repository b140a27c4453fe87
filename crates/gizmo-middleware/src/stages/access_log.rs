//! Access logging in the Apache combined format.
//!
//! One line per response:
//!
//! ```text
//! 10.0.0.7 - - [19/Oct/2026:14:03:11 +0000] "GET /widgets?id=3 HTTP/1.1" 200 512 "-" "curl/8.4.0"
//! ```
//!
//! Lines go through a `tracing-appender` non-blocking writer to a daily
//! rotated file or stdout. The [`WorkerGuard`] returned by
//! [`AccessLog::open`] flushes buffered lines when dropped; the server holds
//! it until its listeners are closed.

use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Local};
use http::{header, HeaderMap, Method, Uri, Version};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use gizmo_config::AccessLogTarget;
use gizmo_core::{Request, RequestContext, Response};

use crate::middleware::{BoxFuture, Middleware, Next};

/// Everything one access log line needs.
#[derive(Debug, Clone)]
pub struct AccessRecord<'a> {
    /// Client host, `-` when unknown.
    pub host: &'a str,
    /// Authenticated user, `-` when none.
    pub user: &'a str,
    /// Time the request was received.
    pub time: DateTime<Local>,
    /// Request method.
    pub method: &'a Method,
    /// Request target.
    pub uri: &'a Uri,
    /// Protocol version.
    pub version: Version,
    /// Response status code.
    pub status: u16,
    /// Response body size.
    pub size: usize,
    /// `Referer` header.
    pub referer: Option<&'a str>,
    /// `User-Agent` header.
    pub user_agent: Option<&'a str>,
}

impl AccessRecord<'_> {
    /// Formats the record as a combined-format line, newline included.
    pub fn to_line(&self) -> String {
        let target = self
            .uri
            .path_and_query()
            .map_or_else(|| self.uri.path().to_string(), ToString::to_string);
        format!(
            "{} - {} [{}] \"{} {} {:?}\" {} {} \"{}\" \"{}\"\n",
            self.host,
            self.user,
            self.time.format("%d/%b/%Y:%H:%M:%S %z"),
            self.method,
            target,
            self.version,
            self.status,
            self.size,
            escape(self.referer.unwrap_or("-")),
            escape(self.user_agent.unwrap_or("-")),
        )
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn header_str<'h>(headers: &'h HeaderMap, name: header::HeaderName) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// A combined-format line writer; also usable as an HTTP middleware stage.
#[derive(Clone)]
pub struct AccessLog {
    writer: NonBlocking,
}

impl std::fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLog").finish_non_exhaustive()
    }
}

impl AccessLog {
    /// Writes lines through `writer`.
    pub fn new(writer: NonBlocking) -> Self {
        Self { writer }
    }

    /// Opens the writer for a configured target. `Disabled` yields `None`.
    pub fn open(target: &AccessLogTarget) -> io::Result<Option<(Self, WorkerGuard)>> {
        let (writer, guard) = match target {
            AccessLogTarget::Disabled => return Ok(None),
            AccessLogTarget::Stdout => tracing_appender::non_blocking(io::stdout()),
            AccessLogTarget::File(path) => tracing_appender::non_blocking(daily_file(path)?),
        };
        Ok(Some((Self::new(writer), guard)))
    }

    /// Appends one record.
    pub fn write(&self, record: &AccessRecord<'_>) {
        let line = record.to_line();
        let mut writer = self.writer.clone();
        if let Err(e) = writer.write_all(line.as_bytes()) {
            tracing::warn!(error = %e, "failed to write access log line");
        }
    }
}

fn daily_file(path: &Path) -> io::Result<RollingFileAppender> {
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "access log path has no file name",
            )
        })?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name)
        .build(directory)
        .map_err(io::Error::other)
}

impl Middleware for AccessLog {
    fn name(&self) -> &'static str {
        "access_log"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let time = Local::now();
            let method = request.method().clone();
            let uri = request.uri().clone();
            let version = request.version();
            let referer = header_str(request.headers(), header::REFERER).map(str::to_string);
            let user_agent = header_str(request.headers(), header::USER_AGENT).map(str::to_string);
            let host = ctx
                .remote_addr()
                .map_or_else(|| "-".to_string(), |addr| addr.ip().to_string());

            let response = next.run(ctx, request).await;

            let user = uri
                .authority()
                .and_then(|a| a.as_str().split_once('@'))
                .map(|(user_info, _)| user_info.split(':').next().unwrap_or("-").to_string());

            self.write(&AccessRecord {
                host: &host,
                user: user.as_deref().filter(|u| !u.is_empty()).unwrap_or("-"),
                time,
                method: &method,
                uri: &uri,
                version,
                status: response.status().as_u16(),
                size: response.body().len(),
                referer: referer.as_deref(),
                user_agent: user_agent.as_deref(),
            });
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::TimeZone;
    use futures_util::FutureExt;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_combined_format() {
        let method = Method::GET;
        let uri: Uri = "/widgets?id=3".parse().unwrap();
        let record = AccessRecord {
            host: "10.0.0.7",
            user: "-",
            time: Local.with_ymd_and_hms(2026, 10, 19, 14, 3, 11).unwrap(),
            method: &method,
            uri: &uri,
            version: Version::HTTP_11,
            status: 200,
            size: 512,
            referer: None,
            user_agent: Some("curl/8.4.0"),
        };
        let line = record.to_line();
        assert!(line.starts_with("10.0.0.7 - - [19/Oct/2026:14:03:11 "));
        assert!(line.ends_with("\"GET /widgets?id=3 HTTP/1.1\" 200 512 \"-\" \"curl/8.4.0\"\n"));
    }

    #[test]
    fn test_quotes_escaped() {
        let method = Method::GET;
        let uri: Uri = "/".parse().unwrap();
        let record = AccessRecord {
            host: "-",
            user: "-",
            time: Local::now(),
            method: &method,
            uri: &uri,
            version: Version::HTTP_2,
            status: 404,
            size: 0,
            referer: Some("a\"b"),
            user_agent: None,
        };
        let line = record.to_line();
        assert!(line.contains("\"HTTP/2.0\""));
        assert!(line.contains("\"a\\\"b\""));
    }

    #[tokio::test]
    async fn test_middleware_writes_one_line() {
        let captured = Captured::default();
        let (writer, guard) = tracing_appender::non_blocking(captured.clone());
        let access_log = AccessLog::new(writer);

        let request = http::Request::builder()
            .uri("/widgets")
            .header(header::USER_AGENT, "test-agent")
            .body(Bytes::new())
            .unwrap();
        let mut ctx =
            RequestContext::from_request(&request, Some("192.168.1.9:5000".parse().unwrap()));
        let next = Next::handler(|_ctx: &mut RequestContext, _req: Request| {
            async {
                let mut response = http::Response::new(Bytes::from_static(b"hello"));
                *response.status_mut() = http::StatusCode::CREATED;
                response
            }
            .boxed()
        });

        let response = access_log.process(&mut ctx, request, next).await;
        assert_eq!(response.status(), http::StatusCode::CREATED);

        drop(access_log);
        drop(guard);

        let written = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert_eq!(written.lines().count(), 1);
        assert!(written.starts_with("192.168.1.9 - - ["));
        assert!(written.contains("\"GET /widgets HTTP/1.1\" 201 5 \"-\" \"test-agent\""));
    }

    #[test]
    fn test_open_disabled() {
        assert!(AccessLog::open(&AccessLogTarget::Disabled).unwrap().is_none());
    }

    #[test]
    fn test_open_file_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = AccessLogTarget::File(dir.path().join("access.log"));
        let (log, guard) = AccessLog::open(&target).unwrap().unwrap();
        let method = Method::POST;
        let uri: Uri = "/x".parse().unwrap();
        log.write(&AccessRecord {
            host: "-",
            user: "-",
            time: Local::now(),
            method: &method,
            uri: &uri,
            version: Version::HTTP_11,
            status: 204,
            size: 0,
            referer: None,
            user_agent: None,
        });
        drop(log);
        drop(guard);

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }
}
