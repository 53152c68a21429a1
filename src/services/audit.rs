//! Structured audit/event pipeline with sensitive-data masking.
//!
//! Events are buffered in memory and flushed to every configured sink on a
//! background timer. Critical events (logins, logouts, `security.*`,
//! `data.delete`, `module.violation`, `admin.*`) are additionally flushed
//! synchronously at log time, bounded by a short timeout. Sink failure is
//! logged through tracing and never propagated to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use crate::config::AuditConfig;
use crate::models::{AuditEvent, AuditMetadata, AuditResult, OriginMetadata};

/// Replacement written over masked detail values.
pub const MASK: &str = "[REDACTED]";

/// Field names (matched case-insensitively, as substrings) always masked in
/// detail maps. `extra_masked_fields` in config extends this set.
pub const DEFAULT_MASKED_FIELDS: &[&str] = &[
    "password",
    "token",
    "secret",
    "key",
    "authorization",
    "cookie",
    "credential",
];

/// Caller context attached to an audit record.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub origin: OriginMetadata,
    pub request_id: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl AuditContext {
    /// Context for events with no acting identity (reapers, startup).
    pub fn system() -> Self {
        Self::default()
    }

    pub fn for_identity(user_id: impl Into<String>, origin: OriginMetadata) -> Self {
        Self {
            user_id: Some(user_id.into()),
            origin,
            ..Self::default()
        }
    }
}

/// Destination for flushed audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn write(&self, events: &[AuditEvent]) -> anyhow::Result<()>;

    /// Read-side query surface. `None` means this sink does not support
    /// querying; the pipeline delegates to the first sink that does.
    async fn search(&self, _filter: &AuditFilter) -> Option<Vec<AuditEvent>> {
        None
    }
}

/// Filters for the read-side query surface.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub result: Option<AuditResult>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(user_id) = &self.user_id {
            if event.user_id.as_deref() != Some(user_id.as_str()) {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &event.action != action {
                return false;
            }
        }
        if let Some(resource) = &self.resource {
            if &event.resource != resource {
                return false;
            }
        }
        if let Some(result) = self.result {
            if event.result != result {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp > until {
                return false;
            }
        }
        true
    }
}

/// Aggregate counts over a period, for dashboards.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AuditStatistics {
    pub total: usize,
    pub success: usize,
    pub failure: usize,
    pub error: usize,
    pub by_action: HashMap<String, usize>,
}

pub struct AuditPipeline {
    buffer: Mutex<VecDeque<AuditEvent>>,
    sinks: Vec<Arc<dyn AuditSink>>,
    masked_fields: Vec<String>,
    buffer_capacity: usize,
    critical_flush_timeout: std::time::Duration,
    flush_interval: std::time::Duration,
}

impl AuditPipeline {
    pub fn new(config: &AuditConfig, sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        let mut masked_fields: Vec<String> = DEFAULT_MASKED_FIELDS
            .iter()
            .map(|f| f.to_string())
            .collect();
        masked_fields.extend(
            config
                .extra_masked_fields
                .iter()
                .map(|f| f.to_ascii_lowercase()),
        );

        Self {
            buffer: Mutex::new(VecDeque::new()),
            sinks,
            masked_fields,
            buffer_capacity: config.buffer_capacity.max(1),
            critical_flush_timeout: std::time::Duration::from_millis(
                config.critical_flush_timeout_ms,
            ),
            flush_interval: std::time::Duration::from_secs(config.flush_interval_seconds),
        }
    }

    /// Record an event. Never fails: audit delivery failure must not fail
    /// the triggering business operation.
    #[allow(clippy::too_many_arguments)]
    pub async fn log(
        &self,
        action: &str,
        resource: &str,
        resource_id: Option<&str>,
        ctx: &AuditContext,
        mut details: Value,
        result: AuditResult,
        error_message: Option<&str>,
    ) {
        mask_sensitive(&mut details, &self.masked_fields);

        let event = AuditEvent::new(
            action,
            resource,
            resource_id.map(str::to_string),
            ctx.user_id.clone(),
            ctx.session_id.clone(),
            &ctx.origin,
            details,
            result,
            error_message.map(str::to_string),
            AuditMetadata {
                request_id: ctx.request_id.clone(),
                roles: ctx.roles.clone(),
                permissions: ctx.permissions.clone(),
            },
        );

        let critical = event.is_critical();
        {
            let mut buffer = self.buffer.lock().expect("audit buffer lock poisoned");
            if buffer.len() >= self.buffer_capacity {
                buffer.pop_front();
                tracing::warn!(capacity = self.buffer_capacity, "audit buffer full, dropping oldest event");
            }
            buffer.push_back(event.clone());
        }

        if critical {
            self.flush_critical(&event).await;
        }
    }

    /// Bounded synchronous flush of a single critical event. Falls back to
    /// buffered-only delivery on timeout or sink failure.
    async fn flush_critical(&self, event: &AuditEvent) {
        let batch = std::slice::from_ref(event);
        for sink in &self.sinks {
            match tokio::time::timeout(self.critical_flush_timeout, sink.write(batch)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(sink = sink.name(), action = %event.action, error = %e, "critical audit flush failed, event remains buffered");
                }
                Err(_) => {
                    tracing::error!(sink = sink.name(), action = %event.action, "critical audit flush timed out, event remains buffered");
                }
            }
        }
    }

    /// Drain the buffer into every sink. Returns the number of events
    /// drained.
    pub async fn flush(&self) -> usize {
        let batch: Vec<AuditEvent> = {
            let mut buffer = self.buffer.lock().expect("audit buffer lock poisoned");
            buffer.drain(..).collect()
        };
        if batch.is_empty() {
            return 0;
        }

        for sink in &self.sinks {
            if let Err(e) = sink.write(&batch).await {
                tracing::error!(sink = sink.name(), count = batch.len(), error = %e, "audit sink flush failed");
            }
        }
        batch.len()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().expect("audit buffer lock poisoned").len()
    }

    /// Background flush timer. The task respects the flush interval as its
    /// deadline cadence; one slow sink cannot block the next tick forever
    /// because each write is independent per flush call.
    pub fn spawn_flusher(self: &Arc<Self>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pipeline.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let flushed = pipeline.flush().await;
                if flushed > 0 {
                    tracing::debug!(count = flushed, "audit buffer flushed");
                }
            }
        })
    }

    /// Query persisted events via the first query-capable sink.
    pub async fn search(&self, filter: &AuditFilter) -> Vec<AuditEvent> {
        for sink in &self.sinks {
            if let Some(mut events) = sink.search(filter).await {
                if let Some(limit) = filter.limit {
                    events.truncate(limit);
                }
                return events;
            }
        }
        Vec::new()
    }

    /// Aggregate counts over the trailing `period`.
    pub async fn statistics(&self, period: Duration) -> AuditStatistics {
        let filter = AuditFilter {
            since: Some(Utc::now() - period),
            ..AuditFilter::default()
        };
        let events = self.search(&filter).await;

        let mut stats = AuditStatistics {
            total: events.len(),
            ..AuditStatistics::default()
        };
        for event in &events {
            match event.result {
                AuditResult::Success => stats.success += 1,
                AuditResult::Failure => stats.failure += 1,
                AuditResult::Error => stats.error += 1,
            }
            *stats.by_action.entry(event.action.clone()).or_insert(0) += 1;
        }
        stats
    }
}

// Masking --------------------------------------------------------------------

fn is_sensitive(field: &str, masked_fields: &[String]) -> bool {
    let field = field.to_ascii_lowercase();
    masked_fields.iter().any(|m| field.contains(m.as_str()))
}

/// Replace sensitive values anywhere in a detail map, at any nesting depth.
/// A matching key's entire value is replaced, objects included.
pub fn mask_sensitive(value: &mut Value, masked_fields: &[String]) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if is_sensitive(key, masked_fields) {
                    *val = Value::String(MASK.to_string());
                } else {
                    mask_sensitive(val, masked_fields);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                mask_sensitive(item, masked_fields);
            }
        }
        _ => {}
    }
}

// Sinks ----------------------------------------------------------------------

/// Writes each event as a structured tracing record. Doubles as the local
/// fallback channel: it cannot fail.
#[derive(Default)]
pub struct TracingSink;

#[async_trait]
impl AuditSink for TracingSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn write(&self, events: &[AuditEvent]) -> anyhow::Result<()> {
        for event in events {
            tracing::info!(
                target: "audit",
                event_id = %event.id,
                action = %event.action,
                resource = %event.resource,
                user_id = event.user_id.as_deref().unwrap_or("-"),
                result = event.result.as_str(),
                "audit event"
            );
        }
        Ok(())
    }
}

/// Appends events as JSON lines.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuditSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn write(&self, events: &[AuditEvent]) -> anyhow::Result<()> {
        let mut out = String::new();
        for event in events {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(out.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps events in memory and serves the query surface. Used as the
/// query-capable sink in single-process deployments and in tests.
#[derive(Default)]
pub struct MemorySink {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<AuditEvent> {
        self.events.read().expect("memory sink lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().expect("memory sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write(&self, events: &[AuditEvent]) -> anyhow::Result<()> {
        let mut store = self.events.write().expect("memory sink lock poisoned");
        // Critical events are flushed both synchronously and through the
        // buffered path; keep the persisted set deduplicated by event id.
        for event in events {
            if !store.iter().any(|e| e.id == event.id) {
                store.push(event.clone());
            }
        }
        Ok(())
    }

    async fn search(&self, filter: &AuditFilter) -> Option<Vec<AuditEvent>> {
        let store = self.events.read().expect("memory sink lock poisoned");
        Some(store.iter().filter(|e| filter.matches(e)).cloned().collect())
    }
}

// Export ---------------------------------------------------------------------

pub fn export_json(events: &[AuditEvent]) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(events)?)
}

pub fn export_csv(events: &[AuditEvent]) -> String {
    let mut out = String::from(
        "id,timestamp,user_id,session_id,action,resource,resource_id,ip_address,user_agent,result,error_message,details\n",
    );
    for event in events {
        let row = [
            event.id.clone(),
            event.timestamp.to_rfc3339(),
            event.user_id.clone().unwrap_or_default(),
            event.session_id.clone().unwrap_or_default(),
            event.action.clone(),
            event.resource.clone(),
            event.resource_id.clone().unwrap_or_default(),
            event.ip_address.clone(),
            event.user_agent.clone(),
            event.result.as_str().to_string(),
            event.error_message.clone().unwrap_or_default(),
            event.details.to_string(),
        ];
        let escaped: Vec<String> = row.iter().map(|f| csv_escape(f)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn export_xml(events: &[AuditEvent]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<auditEvents>\n");
    for event in events {
        out.push_str("  <event>\n");
        push_xml_field(&mut out, "id", &event.id);
        push_xml_field(&mut out, "timestamp", &event.timestamp.to_rfc3339());
        push_xml_field(&mut out, "userId", event.user_id.as_deref().unwrap_or(""));
        push_xml_field(
            &mut out,
            "sessionId",
            event.session_id.as_deref().unwrap_or(""),
        );
        push_xml_field(&mut out, "action", &event.action);
        push_xml_field(&mut out, "resource", &event.resource);
        push_xml_field(
            &mut out,
            "resourceId",
            event.resource_id.as_deref().unwrap_or(""),
        );
        push_xml_field(&mut out, "ipAddress", &event.ip_address);
        push_xml_field(&mut out, "userAgent", &event.user_agent);
        push_xml_field(&mut out, "result", event.result.as_str());
        push_xml_field(
            &mut out,
            "errorMessage",
            event.error_message.as_deref().unwrap_or(""),
        );
        push_xml_field(&mut out, "details", &event.details.to_string());
        out.push_str("  </event>\n");
    }
    out.push_str("</auditEvents>\n");
    out
}

fn push_xml_field(out: &mut String, tag: &str, value: &str) {
    out.push_str(&format!("    <{}>{}</{}>\n", tag, xml_escape(value), tag));
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn masked_fields() -> Vec<String> {
        DEFAULT_MASKED_FIELDS.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn masks_nested_and_derived_field_names() {
        let mut details = json!({
            "password": "secret",
            "nested": { "token": "abc", "note": "visible" },
            "api_key": "k-123",
            "items": [ { "authorization": "Bearer x" } ],
            "count": 3
        });
        mask_sensitive(&mut details, &masked_fields());

        assert_eq!(details["password"], MASK);
        assert_eq!(details["nested"]["token"], MASK);
        assert_eq!(details["nested"]["note"], "visible");
        assert_eq!(details["api_key"], MASK);
        assert_eq!(details["items"][0]["authorization"], MASK);
        assert_eq!(details["count"], 3);
    }

    #[test]
    fn matching_key_masks_whole_object_value() {
        let mut details = json!({ "credentials": { "user": "a", "password": "b" } });
        mask_sensitive(&mut details, &masked_fields());
        assert_eq!(details["credentials"], MASK);
    }

    #[test]
    fn csv_escapes_embedded_quotes_and_commas() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn xml_escapes_markup() {
        assert_eq!(xml_escape("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }
}
