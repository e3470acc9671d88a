use oneiric_domain::{ActivityRecord, ResolutionTrace, TraceDecision};
use oneiric_lifecycle::EntryStatus;
use oneiric_remote::UrlStatus;
use oneiric_runtime::{HealthSnapshot, SlotRow};

/// Render the `list` view as an aligned table.
pub fn render_slots(rows: &[SlotRow]) -> String {
    if rows.is_empty() {
        return "No candidates registered.".to_string();
    }
    let mut out = format!(
        "{:<10} {:<20} {:<14} {:<12} {:<11} {:<10}\n",
        "DOMAIN", "KEY", "PROVIDER", "STATE", "ACTIVITY", "SOURCE"
    );
    for row in rows {
        let provider = row
            .active_provider
            .clone()
            .unwrap_or_else(|| format!("({})", row.resolved_provider));
        out.push_str(&format!(
            "{:<10} {:<20} {:<14} {:<12} {:<11} {:<10}\n",
            row.domain, row.key, provider, row.state, row.activity, row.source
        ));
    }
    out
}

/// Render a resolution trace, winner first, shadowed entries indented.
pub fn render_trace(trace: &ResolutionTrace) -> String {
    let mut out = format!("{}/{}\n", trace.domain, trace.key);
    if let Some(provider) = &trace.override_provider {
        out.push_str(&format!("  override: {provider}\n"));
    }
    if trace.considered.is_empty() {
        out.push_str("  (no candidates)\n");
        return out;
    }
    for entry in &trace.considered {
        let marker = match entry.decision {
            TraceDecision::Selected => "*",
            TraceDecision::Shadowed => " ",
        };
        out.push_str(&format!(
            "  {} {:<14} source={:<15} stack={:<4} priority={}\n",
            marker, entry.provider, entry.source.to_string(), entry.stack_level, entry.priority
        ));
    }
    out
}

pub fn render_status(entries: &[EntryStatus]) -> String {
    if entries.is_empty() {
        return "No live slots.".to_string();
    }
    let mut out = format!(
        "{:<10} {:<20} {:<12} {:<14} {:<8}\n",
        "DOMAIN", "KEY", "STATE", "PROVIDER", "HEALTH"
    );
    for entry in entries {
        let health = match &entry.last_health {
            Some(h) if h.ok => "ok".to_string(),
            Some(h) => format!("failing: {}", h.detail),
            None => "-".to_string(),
        };
        out.push_str(&format!(
            "{:<10} {:<20} {:<12} {:<14} {:<8}\n",
            entry.domain,
            entry.key,
            entry.state,
            entry.provider.as_deref().unwrap_or("-"),
            health
        ));
    }
    out
}

pub fn render_activity(records: &[ActivityRecord]) -> String {
    if records.is_empty() {
        return "All slots accepting.".to_string();
    }
    let mut out = format!(
        "{:<10} {:<20} {:<11} {:<22} REASON\n",
        "DOMAIN", "KEY", "STATE", "SINCE"
    );
    for record in records {
        out.push_str(&format!(
            "{:<10} {:<20} {:<11} {:<22} {}\n",
            record.domain,
            record.key,
            record.state,
            record.since.format("%Y-%m-%dT%H:%M:%SZ"),
            record.reason.as_deref().unwrap_or("-")
        ));
    }
    out
}

pub fn render_remote(statuses: &[UrlStatus]) -> String {
    if statuses.is_empty() {
        return "No manifest URLs synced yet.".to_string();
    }
    let mut out = format!("{:<50} {:<10} {:<9} LAST\n", "URL", "BREAKER", "DISABLED");
    for status in statuses {
        out.push_str(&format!(
            "{:<50} {:<10} {:<9} {}\n",
            status.url,
            status.breaker,
            status.disabled,
            status.last_result.as_deref().unwrap_or("-")
        ));
    }
    out
}

pub fn render_health(snapshot: &HealthSnapshot) -> String {
    let mut out = format!("overall: {}\n", snapshot.status);
    for component in &snapshot.components {
        out.push_str(&format!(
            "  {:<30} {:<10} {}\n",
            component.name,
            component.status,
            if component.detail.is_empty() { "-" } else { &component.detail }
        ));
    }
    out
}
