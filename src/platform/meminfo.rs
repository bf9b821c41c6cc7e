//! Memory telemetry shared by both transports

use serde_json::{json, Value};

use crate::mqtt::transport::Telemetry;

pub const MEMINFO_SUFFIX: &str = "meminfo";
const UNKNOWN: &str = "Unknown";

/// Memory figures in bytes. `None` everywhere means the platform could not tell us.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryReport {
    figures: Option<Figures>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Figures {
    avail: u64,
    total: u64,
}

impl MemoryReport {
    pub fn unknown() -> Self {
        Self { figures: None }
    }

    pub fn from_available(avail: u64, total: u64) -> Self {
        if total == 0 {
            return Self::unknown();
        }
        Self {
            figures: Some(Figures { avail, total }),
        }
    }

    /// Allocator view: total is whatever is free plus whatever is handed out.
    pub fn from_heap(free: u64, allocated: u64) -> Self {
        Self::from_available(free, free + allocated)
    }

    pub fn to_json(&self) -> Value {
        match self.figures {
            Some(Figures { avail, total }) => {
                let used = total.saturating_sub(avail);
                json!({
                    "mem_avail": avail,
                    "mem_total": total,
                    "pct_avail": percent(avail, total),
                    "pct_used": percent(used, total),
                })
            }
            None => json!({
                "mem_avail": UNKNOWN,
                "mem_total": UNKNOWN,
                "pct_avail": UNKNOWN,
                "pct_used": UNKNOWN,
            }),
        }
    }

    pub fn to_telemetry(&self) -> Telemetry {
        Telemetry {
            suffix: MEMINFO_SUFFIX.to_string(),
            payload: self.to_json().to_string(),
        }
    }
}

fn percent(part: u64, total: u64) -> f64 {
    ((part as f64 / total as f64) * 10_000.0).round() / 100.0
}

/// Extracts `(MemAvailable, MemTotal)` in kB from the contents of `/proc/meminfo`.
pub fn parse_proc_meminfo(raw: &str) -> Option<(u64, u64)> {
    let mut avail = None;
    let mut total = None;
    for line in raw.lines() {
        let mut parts = line.split_whitespace();
        let key = parts.next();
        let value = parts.next().and_then(|v| v.parse::<u64>().ok());
        match key {
            Some("MemAvailable:") => avail = value,
            Some("MemTotal:") => total = value,
            _ => {}
        }
    }
    Some((avail?, total?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_report_rounds_to_two_places() {
        let report = MemoryReport::from_heap(1000, 2000);
        let value = report.to_json();
        assert_eq!(value["mem_avail"], 1000);
        assert_eq!(value["mem_total"], 3000);
        assert_eq!(value["pct_avail"], 33.33);
        assert_eq!(value["pct_used"], 66.67);
    }

    #[test]
    fn unknown_report_uses_sentinel() {
        let telemetry = MemoryReport::unknown().to_telemetry();
        assert_eq!(telemetry.suffix, "meminfo");
        assert_eq!(
            telemetry.payload,
            r#"{"mem_avail":"Unknown","mem_total":"Unknown","pct_avail":"Unknown","pct_used":"Unknown"}"#
        );
    }

    #[test]
    fn parses_proc_meminfo() {
        let raw = "MemTotal:        8000000 kB\nMemFree:          100 kB\nMemAvailable:    2000000 kB\n";
        assert_eq!(parse_proc_meminfo(raw), Some((2_000_000, 8_000_000)));
        assert_eq!(parse_proc_meminfo("MemTotal: 5 kB\n"), None);
    }
}
