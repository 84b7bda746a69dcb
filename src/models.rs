use serde::{Deserialize, Serialize};

/// Body of `GET /`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Versions {
    pub name: String,
    pub version: String,
    /// Image backend doing the pixel work
    pub backend: String,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStats {
    pub uptime: u64,
    pub uptime_human: String,
    pub number_of_cpus: usize,
}

impl HealthStats {
    pub fn new(uptime_secs: u64) -> Self {
        Self {
            uptime: uptime_secs,
            uptime_human: format_uptime(uptime_secs),
            number_of_cpus: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

fn format_uptime(secs: u64) -> String {
    let (days, rest) = (secs / 86_400, secs % 86_400);
    let (hours, rest) = (rest / 3_600, rest % 3_600);
    let (minutes, seconds) = (rest / 60, rest % 60);

    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// One entry of the test form
#[derive(Debug, Clone)]
pub struct FormOperation {
    pub title: &'static str,
    pub endpoint: &'static str,
    pub args: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(5), "5s");
        assert_eq!(format_uptime(65), "1m 5s");
        assert_eq!(format_uptime(3_661), "1h 1m 1s");
        assert_eq!(format_uptime(90_061), "1d 1h 1m 1s");
    }

    #[test]
    fn test_health_stats_serialize_camel_case() {
        let json = serde_json::to_value(HealthStats::new(10)).unwrap();
        assert_eq!(json["uptime"], 10);
        assert!(json.get("uptimeHuman").is_some());
        assert!(json["numberOfCpus"].as_u64().unwrap() >= 1);
    }
}
