use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

pub struct RelayMetrics {
    request_duration_count: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    ws_duration_count: Mutex<HashMap<String, u64>>,
    ws_duration_sum_ms: Mutex<HashMap<String, u64>>,
    ws_errors_total: Mutex<HashMap<String, u64>>,
    ws_rate_total: Mutex<HashMap<String, u64>>,
    active_connections: AtomicU64,
    active_rooms: AtomicU64,
    stale_document_proposals_total: AtomicU64,
    chat_messages_evicted_total: AtomicU64,
}

static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

impl Default for RelayMetrics {
    fn default() -> Self {
        Self {
            request_duration_count: Mutex::new(HashMap::new()),
            request_duration_sum_ms: Mutex::new(HashMap::new()),
            request_errors_total: Mutex::new(HashMap::new()),
            request_rate_total: Mutex::new(HashMap::new()),
            ws_duration_count: Mutex::new(HashMap::new()),
            ws_duration_sum_ms: Mutex::new(HashMap::new()),
            ws_errors_total: Mutex::new(HashMap::new()),
            ws_rate_total: Mutex::new(HashMap::new()),
            active_connections: AtomicU64::new(0),
            active_rooms: AtomicU64::new(0),
            stale_document_proposals_total: AtomicU64::new(0),
            chat_messages_evicted_total: AtomicU64::new(0),
        }
    }
}

pub fn set_global_metrics(metrics: Arc<RelayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_ws_event(event: &str, is_error: bool, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_event(event, is_error, latency_ms);
    }
}

pub fn connection_opened() {
    if let Some(metrics) = global_metrics() {
        metrics.active_connections.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn connection_closed() {
    if let Some(metrics) = global_metrics() {
        saturating_decrement(&metrics.active_connections);
    }
}

pub fn set_active_rooms(count: usize) {
    if let Some(metrics) = global_metrics() {
        metrics.active_rooms.store(count as u64, Ordering::SeqCst);
    }
}

pub fn increment_stale_document_proposals() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_stale_document_proposals();
    }
}

pub fn increment_chat_messages_evicted() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_chat_messages_evicted();
    }
}

impl RelayMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        increment_counter(&self.request_duration_count, &key, 1);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn record_ws_event(&self, event: &str, is_error: bool, latency_ms: u64) {
        let normalized_event = normalize_ws_event(event);
        increment_label_counter(&self.ws_rate_total, &normalized_event, 1);
        increment_label_counter(&self.ws_duration_sum_ms, &normalized_event, latency_ms);
        increment_label_counter(&self.ws_duration_count, &normalized_event, 1);
        if is_error {
            increment_label_counter(&self.ws_errors_total, &normalized_event, 1);
        }
    }

    pub fn increment_stale_document_proposals(&self) {
        self.stale_document_proposals_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_chat_messages_evicted(&self) {
        self.chat_messages_evicted_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP relay_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE relay_request_rate_total counter\n");
        append_counter_lines(&mut output, "relay_request_rate_total", &self.request_rate_total);

        output.push_str(
            "# HELP relay_request_errors_total Total HTTP error responses by endpoint.\n",
        );
        output.push_str("# TYPE relay_request_errors_total counter\n");
        append_counter_lines(&mut output, "relay_request_errors_total", &self.request_errors_total);

        output.push_str("# HELP relay_request_duration_ms_sum Sum of HTTP request latency in milliseconds by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output.push_str("# HELP relay_request_duration_ms_count Count of HTTP request latency samples by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_count counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_count",
            &self.request_duration_count,
        );

        output.push_str("# HELP relay_ws_rate_total Total websocket events by event type.\n");
        output.push_str("# TYPE relay_ws_rate_total counter\n");
        append_label_counter_lines(&mut output, "relay_ws_rate_total", &self.ws_rate_total);

        output.push_str(
            "# HELP relay_ws_errors_total Total websocket events answered with an error.\n",
        );
        output.push_str("# TYPE relay_ws_errors_total counter\n");
        append_label_counter_lines(&mut output, "relay_ws_errors_total", &self.ws_errors_total);

        output.push_str("# HELP relay_ws_duration_ms_sum Sum of websocket event handling latency in milliseconds.\n");
        output.push_str("# TYPE relay_ws_duration_ms_sum counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_duration_ms_sum",
            &self.ws_duration_sum_ms,
        );

        output.push_str(
            "# HELP relay_ws_duration_ms_count Count of websocket latency samples by event type.\n",
        );
        output.push_str("# TYPE relay_ws_duration_ms_count counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_duration_ms_count",
            &self.ws_duration_count,
        );

        output.push_str("# HELP relay_active_connections Currently open websocket connections.\n");
        output.push_str("# TYPE relay_active_connections gauge\n");
        output.push_str(&format!(
            "relay_active_connections {}\n",
            self.active_connections.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP relay_active_rooms Rooms currently held in memory.\n");
        output.push_str("# TYPE relay_active_rooms gauge\n");
        output.push_str(&format!(
            "relay_active_rooms {}\n",
            self.active_rooms.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP relay_stale_document_proposals_total Editor updates built on an outdated document version.\n");
        output.push_str("# TYPE relay_stale_document_proposals_total counter\n");
        output.push_str(&format!(
            "relay_stale_document_proposals_total {}\n",
            self.stale_document_proposals_total.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP relay_chat_messages_evicted_total Chat messages dropped from bounded room history.\n");
        output.push_str("# TYPE relay_chat_messages_evicted_total counter\n");
        output.push_str(&format!(
            "relay_chat_messages_evicted_total {}\n",
            self.chat_messages_evicted_total.load(Ordering::SeqCst)
        ));

        output
    }
}

fn saturating_decrement(value: &AtomicU64) {
    let _ = value.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
        Some(current.saturating_sub(1))
    });
}

fn normalize_endpoint(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut normalized_segments = Vec::new();
    let mut previous_segment = "";
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        if previous_segment == "rooms" {
            normalized_segments.push("{room_id}".to_string());
        } else if uuid::Uuid::parse_str(segment).is_ok() {
            normalized_segments.push("{uuid}".to_string());
        } else if segment.chars().all(|character| character.is_ascii_digit()) {
            normalized_segments.push("{number}".to_string());
        } else {
            normalized_segments.push(segment.to_string());
        }
        previous_segment = segment;
    }

    if normalized_segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", normalized_segments.join("/"))
    }
}

fn normalize_ws_event(event: &str) -> String {
    let normalized = event.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left_key, _), (right_key, _)| {
        left_key
            .method
            .cmp(&right_key.method)
            .then_with(|| left_key.endpoint.cmp(&right_key.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{event=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::{escape_label_value, normalize_endpoint, saturating_decrement, RelayMetrics};

    #[test]
    fn render_prometheus_includes_red_and_room_metrics() {
        let metrics = RelayMetrics::default();
        metrics.record_http_request("GET", "/v1/rooms/demo", 200, 15);
        metrics.record_http_request("get", "/v1/rooms/team-notes", 404, 25);
        metrics.record_ws_event("chat-message", false, 11);
        metrics.record_ws_event("chat-message", true, 19);
        metrics.record_ws_event("  ", false, 1);
        metrics.increment_stale_document_proposals();
        metrics.increment_chat_messages_evicted();
        metrics.increment_chat_messages_evicted();

        let rendered = metrics.render_prometheus();

        assert!(rendered.contains(
            "relay_request_rate_total{method=\"GET\",endpoint=\"/v1/rooms/{room_id}\"} 2"
        ));
        assert!(rendered.contains(
            "relay_request_errors_total{method=\"GET\",endpoint=\"/v1/rooms/{room_id}\"} 1"
        ));
        assert!(rendered.contains("relay_request_duration_ms_sum"));
        assert!(rendered.contains("relay_request_duration_ms_count"));
        assert!(rendered.contains("relay_ws_rate_total{event=\"chat-message\"} 2"));
        assert!(rendered.contains("relay_ws_errors_total{event=\"chat-message\"} 1"));
        assert!(rendered.contains("relay_ws_duration_ms_sum{event=\"chat-message\"} 30"));
        assert!(rendered.contains("relay_ws_rate_total{event=\"unknown\"} 1"));
        assert!(rendered.contains("relay_active_connections 0"));
        assert!(rendered.contains("relay_active_rooms 0"));
        assert!(rendered.contains("relay_stale_document_proposals_total 1"));
        assert!(rendered.contains("relay_chat_messages_evicted_total 2"));
    }

    #[test]
    fn endpoints_collapse_identifiers() {
        assert_eq!(normalize_endpoint(""), "/");
        assert_eq!(normalize_endpoint("/healthz"), "/healthz");
        assert_eq!(normalize_endpoint("/v1/rooms/demo"), "/v1/rooms/{room_id}");
        assert_eq!(
            normalize_endpoint("/v1/sessions/00000000-0000-0000-0000-000000000001"),
            "/v1/sessions/{uuid}"
        );
        assert_eq!(normalize_endpoint("/v1/items/42"), "/v1/items/{number}");
    }

    #[test]
    fn gauges_never_underflow() {
        let value = AtomicU64::new(0);
        saturating_decrement(&value);
        assert_eq!(value.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape_label_value("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }
}
