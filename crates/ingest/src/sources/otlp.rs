// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! The OTLP logs receiver: a gRPC `Export` service and an HTTP
//! `POST /v1/logs` endpoint feeding the unified line channel.
//!
//! Every accepted request is expanded into flat records and re-serialized
//! as canonical single-record JSON lines, so downstream the receiver's
//! output is indistinguishable from any other source. The receiver never
//! back-pressures its callers: when the pipeline is full, lines are
//! dropped with a warning.

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use prost::Message;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::warn;

use opentelemetry_proto::tonic::collector::logs::v1::logs_service_server::{
    LogsService, LogsServiceServer,
};
use opentelemetry_proto::tonic::collector::logs::v1::{
    ExportLogsServiceRequest, ExportLogsServiceResponse,
};
use opentelemetry_proto::tonic::logs::v1::LogsData;

use tailscope_pdata::otlp;

use crate::diag::{Diagnostic, DiagnosticSender};

/// HTTP request timeout.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on an HTTP body.
const MAX_HTTP_BODY_BYTES: usize = 16 * 1024 * 1024;

const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";
const CONTENT_TYPE_PROTOBUF_ALT: &str = "application/protobuf";
const CONTENT_TYPE_JSON: &str = "application/json";

/// Shared forwarding half of both endpoints.
#[derive(Debug, Clone)]
pub(crate) struct OtlpForwarder {
    tx: mpsc::Sender<String>,
    diagnostics: DiagnosticSender,
}

impl OtlpForwarder {
    pub(crate) fn new(tx: mpsc::Sender<String>, diagnostics: DiagnosticSender) -> OtlpForwarder {
        OtlpForwarder { tx, diagnostics }
    }

    /// Expands a batch and pushes one canonical JSON line per record.
    /// Full-channel lines are dropped, not awaited.
    fn forward(&self, logs_data: &LogsData) {
        let mut dropped = 0u64;
        for record in otlp::expand(logs_data) {
            let line = otlp::to_canonical_json(&record);
            match self.tx.try_send(line) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
        if dropped > 0 {
            warn!(dropped, "pipeline full; OTLP lines dropped");
            self.diagnostics
                .emit(Diagnostic::OtlpLinesDropped { count: dropped });
        }
    }
}

/// The gRPC logs service implementation.
#[derive(Debug, Clone)]
pub(crate) struct GrpcLogsReceiver {
    forwarder: OtlpForwarder,
}

#[tonic::async_trait]
impl LogsService for GrpcLogsReceiver {
    async fn export(
        &self,
        request: tonic::Request<ExportLogsServiceRequest>,
    ) -> Result<tonic::Response<ExportLogsServiceResponse>, tonic::Status> {
        let logs_data = LogsData {
            resource_logs: request.into_inner().resource_logs,
        };
        self.forwarder.forward(&logs_data);
        Ok(tonic::Response::new(ExportLogsServiceResponse {
            partial_success: None,
        }))
    }
}

/// Serves the gRPC endpoint on an already-bound listener until
/// cancellation.
pub(crate) async fn serve_grpc(
    listener: TcpListener,
    forwarder: OtlpForwarder,
    cancel: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    let service = LogsServiceServer::new(GrpcLogsReceiver { forwarder });
    Server::builder()
        .add_service(service)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), cancel.cancelled_owned())
        .await
}

#[derive(Clone)]
struct HttpState {
    forwarder: OtlpForwarder,
}

/// The HTTP router: `POST /v1/logs` only; other methods answer 405.
pub(crate) fn http_router(forwarder: OtlpForwarder) -> Router {
    Router::new()
        .route("/v1/logs", post(export_logs))
        .with_state(HttpState { forwarder })
}

/// Serves the HTTP endpoint on an already-bound listener until
/// cancellation.
pub(crate) async fn serve_http(
    listener: TcpListener,
    forwarder: OtlpForwarder,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, http_router(forwarder))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

async fn export_logs(State(state): State<HttpState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(CONTENT_TYPE_PROTOBUF)
        .to_owned();
    let wants_json = parts
        .headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains(CONTENT_TYPE_JSON));

    let bytes = match tokio::time::timeout(
        HTTP_REQUEST_TIMEOUT,
        axum::body::to_bytes(body, MAX_HTTP_BODY_BYTES),
    )
    .await
    {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(_)) => return (StatusCode::BAD_REQUEST, "unreadable body").into_response(),
        Err(_) => return (StatusCode::REQUEST_TIMEOUT, "body read timed out").into_response(),
    };

    let logs_data = if content_type.starts_with(CONTENT_TYPE_JSON) {
        serde_json::from_slice::<serde_json::Value>(&bytes)
            .ok()
            .and_then(|value| otlp::logs_data_from_json(&value))
    } else if content_type.starts_with(CONTENT_TYPE_PROTOBUF)
        || content_type.starts_with(CONTENT_TYPE_PROTOBUF_ALT)
    {
        ExportLogsServiceRequest::decode(bytes.as_ref())
            .ok()
            .map(|request| LogsData {
                resource_logs: request.resource_logs,
            })
    } else {
        // Unknown content types are tried as protobuf, the default.
        ExportLogsServiceRequest::decode(bytes.as_ref())
            .ok()
            .map(|request| LogsData {
                resource_logs: request.resource_logs,
            })
    };

    let Some(logs_data) = logs_data else {
        return (StatusCode::BAD_REQUEST, "malformed OTLP logs payload").into_response();
    };
    state.forwarder.forward(&logs_data);

    // The response Content-Type mirrors the Accept header; protobuf is
    // the default.
    if wants_json {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CONTENT_TYPE_JSON)],
            "{}",
        )
            .into_response()
    } else {
        let body = ExportLogsServiceResponse {
            partial_success: None,
        }
        .encode_to_vec();
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CONTENT_TYPE_PROTOBUF)],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::collector::logs::v1::logs_service_client::LogsServiceClient;
    use opentelemetry_proto::tonic::common::v1::any_value::Value as AnyValueEnum;
    use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
    use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn sample_request() -> ExportLogsServiceRequest {
        ExportLogsServiceRequest {
            resource_logs: vec![ResourceLogs {
                resource: Some(Resource {
                    attributes: vec![KeyValue {
                        key: "service.name".to_owned(),
                        value: Some(AnyValue {
                            value: Some(AnyValueEnum::StringValue("svc".to_owned())),
                        }),
                    }],
                    ..Default::default()
                }),
                scope_logs: vec![ScopeLogs {
                    log_records: vec![LogRecord {
                        severity_number: 9,
                        severity_text: "INFO".to_owned(),
                        body: Some(AnyValue {
                            value: Some(AnyValueEnum::StringValue("hello".to_owned())),
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    #[tokio::test]
    async fn grpc_export_forwards_canonical_lines() {
        let port = portpicker::pick_unused_port().expect("free port");
        let addr = format!("127.0.0.1:{port}");
        let listener = TcpListener::bind(&addr).await.expect("bind");
        let (tx, mut rx) = mpsc::channel(100);
        let (diagnostics, _diag_rx) = crate::diag::channel();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve_grpc(
            listener,
            OtlpForwarder::new(tx, diagnostics),
            cancel.clone(),
        ));

        let mut client = LogsServiceClient::connect(format!("http://{addr}"))
            .await
            .expect("connect");
        let response = client.export(sample_request()).await.expect("export");
        assert!(response.into_inner().partial_success.is_none());

        let line = rx.recv().await.expect("one line");
        let value: serde_json::Value = serde_json::from_str(&line).expect("canonical JSON");
        assert_eq!(value["severityText"], "INFO");
        assert_eq!(value["body"]["stringValue"], "hello");
        assert_eq!(value["attributes"][0]["key"], "service.name");

        cancel.cancel();
        server.await.expect("join").expect("serve");
    }

    async fn raw_http_request(addr: &str, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(request.as_bytes())
            .await
            .expect("write request");
        let mut response = String::new();
        let _ = stream
            .read_to_string(&mut response)
            .await
            .expect("read response");
        response
    }

    #[tokio::test]
    async fn http_json_export_accepted() {
        let port = portpicker::pick_unused_port().expect("free port");
        let addr = format!("127.0.0.1:{port}");
        let listener = TcpListener::bind(&addr).await.expect("bind");
        let (tx, mut rx) = mpsc::channel(100);
        let (diagnostics, _diag_rx) = crate::diag::channel();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve_http(
            listener,
            OtlpForwarder::new(tx, diagnostics),
            cancel.clone(),
        ));

        let body = r#"{"resourceLogs":[{"resource":{"attributes":[]},"scopeLogs":[{"logRecords":[{"severityText":"WARN","body":{"stringValue":"careful"}}]}]}]}"#;
        let request = format!(
            "POST /v1/logs HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nAccept: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let response = raw_http_request(&addr, &request).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains("content-type: application/json"), "{response}");

        let line = rx.recv().await.expect("one line");
        assert!(line.contains("\"severityText\":\"WARN\""));

        cancel.cancel();
        server.await.expect("join").expect("serve");
    }

    #[tokio::test]
    async fn http_rejects_malformed_and_wrong_method() {
        let port = portpicker::pick_unused_port().expect("free port");
        let addr = format!("127.0.0.1:{port}");
        let listener = TcpListener::bind(&addr).await.expect("bind");
        let (tx, _rx) = mpsc::channel(100);
        let (diagnostics, _diag_rx) = crate::diag::channel();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve_http(
            listener,
            OtlpForwarder::new(tx, diagnostics),
            cancel.clone(),
        ));

        let bad_body = "this is not otlp";
        let bad = format!(
            "POST /v1/logs HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{bad_body}",
            bad_body.len()
        );
        let response = raw_http_request(&addr, &bad).await;
        assert!(response.starts_with("HTTP/1.1 400"), "{response}");

        let get = format!(
            "GET /v1/logs HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n"
        );
        let response = raw_http_request(&addr, &get).await;
        assert!(response.starts_with("HTTP/1.1 405"), "{response}");

        cancel.cancel();
        server.await.expect("join").expect("serve");
    }

    #[tokio::test]
    async fn full_channel_drops_with_diagnostic() {
        let (tx, mut rx) = mpsc::channel(1);
        let (diagnostics, mut diag_rx) = crate::diag::channel();
        let forwarder = OtlpForwarder::new(tx, diagnostics);

        let mut request = sample_request();
        request.resource_logs[0].scope_logs[0]
            .log_records
            .push(LogRecord {
                severity_number: 17,
                body: Some(AnyValue {
                    value: Some(AnyValueEnum::StringValue("second".to_owned())),
                }),
                ..Default::default()
            });
        let logs_data = LogsData {
            resource_logs: request.resource_logs,
        };
        forwarder.forward(&logs_data);

        // One line fit; the second was dropped and reported.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(
            diag_rx.try_recv().expect("diagnostic"),
            Diagnostic::OtlpLinesDropped { count: 1 }
        );
    }
}
