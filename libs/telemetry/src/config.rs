use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub json_logs: bool,
    /// Directive used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            json_logs: false,
            default_filter: "info".into(),
        }
    }

    pub fn from_env(default_service_name: &str) -> Self {
        Self::from_lookup(default_service_name, |name| env::var(name).ok())
    }

    pub fn from_lookup<F>(default_service_name: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_name = lookup("SERVICE_NAME")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default_service_name.to_string());
        let json_logs = lookup("LOG_FORMAT")
            .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
            .unwrap_or(false);

        Self {
            service_name,
            json_logs,
            ..Self::new("")
        }
    }
}
