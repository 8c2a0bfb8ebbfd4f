// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! gRPC collector: one `StreamTelemetry` client stream per batch.
//!
//! Wire messages are declared by hand with `prost` derives, so the crate
//! builds without `protoc`.

use std::time::Duration;

use async_trait::async_trait;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::event::TelemetryEvent;

use super::collector::{CollectorClient, StreamAck};

/// Full method path of the client-streaming RPC.
pub const STREAM_TELEMETRY_PATH: &str = "/arc.telemetry.v1.TelemetryService/StreamTelemetry";

/// Per-batch deadline, connect included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// `arc.telemetry.v1` messages.
pub mod proto {
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TelemetryEvent {
        /// Seconds since the Unix epoch.
        #[prost(double, tag = "1")]
        pub timestamp: f64,
        #[prost(string, tag = "2")]
        pub request_id: String,
        #[prost(string, tag = "3")]
        pub pipeline_id: String,
        #[prost(string, tag = "4")]
        pub application_id: String,
        #[prost(string, tag = "5")]
        pub agent_name: String,
        #[prost(message, optional, tag = "6")]
        pub llm_interaction: Option<LlmInteraction>,
        #[prost(bool, tag = "7")]
        pub pattern_matched: bool,
        /// JSON object, empty when no fix was applied.
        #[prost(string, tag = "8")]
        pub fix_applied: String,
        #[prost(double, tag = "9")]
        pub interception_latency_ms: f64,
        #[prost(map = "string, string", tag = "10")]
        pub metadata: HashMap<String, String>,
        #[prost(message, optional, tag = "11")]
        pub error_info: Option<ErrorInfo>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct LlmInteraction {
        #[prost(string, tag = "1")]
        pub provider: String,
        #[prost(string, tag = "2")]
        pub model: String,
        /// JSON object of the request as sent by the caller.
        #[prost(string, tag = "3")]
        pub request_body: String,
        /// JSON summary of the response, empty on failure.
        #[prost(string, tag = "4")]
        pub response_body: String,
        #[prost(double, tag = "5")]
        pub latency_ms: f64,
        #[prost(uint64, tag = "6")]
        pub prompt_tokens: u64,
        #[prost(uint64, tag = "7")]
        pub completion_tokens: u64,
        #[prost(uint64, tag = "8")]
        pub total_tokens: u64,
        #[prost(string, tag = "9")]
        pub response_id: String,
        #[prost(string, tag = "10")]
        pub response_model: String,
        #[prost(string, tag = "11")]
        pub finish_reason: String,
        #[prost(string, tag = "12")]
        pub user_input: String,
        #[prost(string, tag = "13")]
        pub agent_output: String,
        #[prost(message, repeated, tag = "14")]
        pub tool_calls: Vec<ToolCall>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ToolCall {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(string, tag = "2")]
        pub r#type: String,
        #[prost(string, tag = "3")]
        pub function_name: String,
        #[prost(string, tag = "4")]
        pub function_arguments: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ErrorInfo {
        #[prost(string, tag = "1")]
        pub error_type: String,
        #[prost(string, tag = "2")]
        pub error_message: String,
        #[prost(string, tag = "3")]
        pub stack_trace: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct StreamTelemetryResponse {
        #[prost(bool, tag = "1")]
        pub success: bool,
        #[prost(string, tag = "2")]
        pub message: String,
        #[prost(uint64, tag = "3")]
        pub events_received: u64,
    }
}

/// Convert an event into its wire form.
pub fn encode_event(event: &TelemetryEvent) -> Result<proto::TelemetryEvent, TransportError> {
    let interaction = &event.llm_interaction;
    let response_body = match &interaction.response_body {
        Some(body) => to_json(body)?,
        None => String::new(),
    };
    let fix_applied = match &event.fix_applied {
        Some(fix) => fix.to_string(),
        None => String::new(),
    };

    Ok(proto::TelemetryEvent {
        timestamp: event.timestamp.timestamp_micros() as f64 / 1_000_000.0,
        request_id: event.request_id.clone(),
        pipeline_id: event.pipeline_id.clone(),
        application_id: event.application_id.clone(),
        agent_name: event.agent_name.clone(),
        llm_interaction: Some(proto::LlmInteraction {
            provider: interaction.provider.clone(),
            model: interaction.model.clone(),
            request_body: to_json(&interaction.request_body)?,
            response_body,
            latency_ms: interaction.latency_ms,
            prompt_tokens: interaction.prompt_tokens,
            completion_tokens: interaction.completion_tokens,
            total_tokens: interaction.total_tokens,
            response_id: interaction.response_id.clone(),
            response_model: interaction.response_model.clone(),
            finish_reason: interaction.finish_reason.clone(),
            user_input: interaction.user_input.clone(),
            agent_output: interaction.agent_output.clone(),
            tool_calls: interaction
                .tool_calls
                .iter()
                .map(|call| proto::ToolCall {
                    id: call.id.clone(),
                    r#type: call.call_type.clone(),
                    function_name: call
                        .function
                        .as_ref()
                        .map(|f| f.name.clone())
                        .unwrap_or_default(),
                    function_arguments: call
                        .function
                        .as_ref()
                        .map(|f| f.arguments.clone())
                        .unwrap_or_default(),
                })
                .collect(),
        }),
        pattern_matched: event.pattern_matched,
        fix_applied,
        interception_latency_ms: event.interception_latency_ms,
        metadata: event
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        error_info: event.error_info.as_ref().map(|error| proto::ErrorInfo {
            error_type: error.error_type.clone(),
            error_message: error.error_message.clone(),
            stack_trace: error.stack_trace.clone(),
        }),
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, TransportError> {
    serde_json::to_string(value).map_err(|e| TransportError::Stream(e.to_string()))
}

/// Add `http://` when the configured address has no scheme (`localhost:50051`).
pub fn endpoint_uri(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

/// Map a failed call to the transport error the shipper counts.
fn status_error(status: &Status) -> TransportError {
    match status.code() {
        Code::InvalidArgument
        | Code::FailedPrecondition
        | Code::PermissionDenied
        | Code::Unauthenticated
        | Code::ResourceExhausted => TransportError::Rejected(status.message().to_string()),
        code => TransportError::Stream(format!("{code:?}: {}", status.message())),
    }
}

fn ack_from(response: proto::StreamTelemetryResponse) -> Result<StreamAck, TransportError> {
    if !response.success {
        return Err(TransportError::Rejected(if response.message.is_empty() {
            "collector reported failure".to_string()
        } else {
            response.message
        }));
    }
    Ok(StreamAck {
        accepted: response.events_received,
        message: Some(response.message).filter(|m| !m.is_empty()),
    })
}

/// Collector reached over gRPC.
///
/// The channel connects lazily: building the client never dials, and a
/// collector that is down only fails the batches sent while it is down.
#[derive(Debug, Clone)]
pub struct GrpcCollector {
    address: String,
    channel: Channel,
}

impl GrpcCollector {
    /// Client for `address` (`host:port` or a full `http(s)://` URI).
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(address: &str) -> Result<Self, TransportError> {
        Self::with_timeout(address, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(address: &str, timeout: Duration) -> Result<Self, TransportError> {
        let endpoint = Endpoint::from_shared(endpoint_uri(address))
            .map_err(|e| TransportError::Stream(format!("invalid collector address {address}: {e}")))?
            .connect_timeout(timeout)
            .timeout(timeout);

        Ok(Self {
            address: address.to_string(),
            channel: endpoint.connect_lazy(),
        })
    }
}

#[async_trait]
impl CollectorClient for GrpcCollector {
    fn endpoint(&self) -> &str {
        &self.address
    }

    async fn stream_events(&self, batch: Vec<TelemetryEvent>) -> Result<StreamAck, TransportError> {
        let messages = batch
            .iter()
            .map(encode_event)
            .collect::<Result<Vec<_>, _>>()?;
        let count = messages.len();

        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| TransportError::Stream(format!("collector not ready: {e}")))?;

        let request = tonic::Request::new(futures_util::stream::iter(messages));
        let path = PathAndQuery::from_static(STREAM_TELEMETRY_PATH);
        let codec = tonic_prost::ProstCodec::default();

        let response: tonic::Response<proto::StreamTelemetryResponse> = grpc
            .client_streaming(request, path, codec)
            .await
            .map_err(|status| {
                warn!(endpoint = %self.address, code = ?status.code(), "Telemetry stream failed");
                status_error(&status)
            })?;

        let ack = ack_from(response.into_inner())?;
        debug!(endpoint = %self.address, sent = count, accepted = ack.accepted, "Telemetry batch acknowledged");
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ErrorInfo, LlmInteraction};
    use crate::types::{FixDescriptor, FunctionCall, RequestParameters, ToolCallInfo};
    use chrono::{TimeZone, Utc};
    use prost::Message;
    use std::collections::BTreeMap;

    fn event() -> TelemetryEvent {
        TelemetryEvent {
            timestamp: Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap(),
            request_id: "req-1".to_string(),
            pipeline_id: "pipe".to_string(),
            application_id: "support-bot".to_string(),
            agent_name: "planner".to_string(),
            llm_interaction: LlmInteraction {
                provider: "openai".to_string(),
                model: "gpt-x".to_string(),
                request_body: RequestParameters::new().with("temperature", 0.2),
                prompt_tokens: 5,
                completion_tokens: 3,
                total_tokens: 8,
                tool_calls: vec![ToolCallInfo {
                    id: "call_1".to_string(),
                    call_type: "function".to_string(),
                    function: Some(FunctionCall {
                        name: "lookup".to_string(),
                        arguments: "{\"q\":1}".to_string(),
                    }),
                }],
                ..LlmInteraction::default()
            },
            pattern_matched: true,
            fix_applied: Some(FixDescriptor::new().with("temperature", 0)),
            interception_latency_ms: 0.04,
            metadata: BTreeMap::from([("success".to_string(), "false".to_string())]),
            error_info: Some(ErrorInfo {
                error_type: "TimedOut".to_string(),
                error_message: "slow".to_string(),
                stack_trace: String::new(),
            }),
        }
    }

    #[test]
    fn test_encode_event_fields() {
        let message = encode_event(&event()).unwrap();

        assert_eq!(message.timestamp, 1_700_000_000.25);
        assert_eq!(message.request_id, "req-1");
        assert!(message.pattern_matched);
        assert_eq!(message.fix_applied, r#"{"temperature":0}"#);
        assert_eq!(message.metadata.get("success").map(String::as_str), Some("false"));
        assert_eq!(message.error_info.as_ref().unwrap().error_type, "TimedOut");

        let interaction = message.llm_interaction.as_ref().unwrap();
        assert_eq!(interaction.request_body, r#"{"temperature":0.2}"#);
        assert_eq!(interaction.response_body, "");
        assert_eq!(interaction.total_tokens, 8);
        assert_eq!(interaction.tool_calls[0].function_name, "lookup");
        assert_eq!(interaction.tool_calls[0].r#type, "function");
    }

    #[test]
    fn test_encoded_event_decodes_on_the_wire() {
        let message = encode_event(&event()).unwrap();
        let bytes = message.encode_to_vec();
        let decoded = proto::TelemetryEvent::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_endpoint_uri_adds_scheme() {
        assert_eq!(endpoint_uri("localhost:50051"), "http://localhost:50051");
        assert_eq!(endpoint_uri("https://collector:443"), "https://collector:443");
    }

    #[test]
    fn test_ack_from_response() {
        let ack = ack_from(proto::StreamTelemetryResponse {
            success: true,
            message: String::new(),
            events_received: 3,
        })
        .unwrap();
        assert_eq!(ack, StreamAck::accepted(3));

        let err = ack_from(proto::StreamTelemetryResponse {
            success: false,
            message: "schema mismatch".to_string(),
            events_received: 0,
        })
        .unwrap_err();
        assert!(matches!(err, TransportError::Rejected(m) if m == "schema mismatch"));
    }

    #[test]
    fn test_status_error_kinds() {
        assert!(matches!(
            status_error(&Status::invalid_argument("bad event")),
            TransportError::Rejected(_)
        ));
        assert!(matches!(
            status_error(&Status::unavailable("down")),
            TransportError::Stream(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_collector_fails_the_batch() {
        let collector = GrpcCollector::with_timeout("127.0.0.1:1", Duration::from_millis(500)).unwrap();
        assert_eq!(collector.endpoint(), "127.0.0.1:1");

        let err = collector.stream_events(vec![event()]).await.unwrap_err();
        assert!(matches!(err, TransportError::Stream(_)));
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected_up_front() {
        assert!(GrpcCollector::new("not a uri").is_err());
    }
}
