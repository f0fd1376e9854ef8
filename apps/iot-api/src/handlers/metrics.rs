//! 采集链路计数快照
//!
//! - GET /metrics

use crate::AppState;
use api_contract::{ApiResponse, BufferDto, MetricsDto};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use iot_telemetry::metrics;

fn average(total: u64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    total as f64 / count as f64
}

pub async fn get_metrics(State(state): State<AppState>) -> Response {
    let snapshot = metrics().snapshot();
    let buffer = state.pipeline.buffer();
    let dto = MetricsDto {
        raw_events: snapshot.raw_events,
        decoded_measurements: snapshot.decoded_measurements,
        dropped_malformed: snapshot.dropped_malformed,
        dropped_unknown_device: snapshot.dropped_unknown_device,
        dropped_invalid: snapshot.dropped_invalid,
        status_messages: snapshot.status_messages,
        registry_errors: snapshot.registry_errors,
        buffer_overflow: snapshot.buffer_overflow,
        batches_flushed: snapshot.batches_flushed,
        rows_written: snapshot.rows_written,
        rows_failed: snapshot.rows_failed,
        batches_lost: snapshot.batches_lost,
        rows_lost: snapshot.rows_lost,
        write_retries: snapshot.write_retries,
        bus_reconnects: snapshot.bus_reconnects,
        avg_write_latency_ms: average(
            snapshot.write_latency_ms_total,
            snapshot.write_latency_ms_count,
        ),
        avg_end_to_end_latency_ms: average(
            snapshot.end_to_end_latency_ms_total,
            snapshot.end_to_end_latency_ms_count,
        ),
        subscriber_state: state
            .subscriber
            .as_ref()
            .map(|subscriber| format!("{:?}", subscriber.state()).to_lowercase()),
        buffer: Some(BufferDto {
            len: buffer.len(),
            capacity: buffer.capacity(),
            batch_size: buffer.batch_size(),
        }),
    };
    (StatusCode::OK, Json(ApiResponse::success(dto))).into_response()
}
