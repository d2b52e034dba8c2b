use crate::engine::BlockId;
use log::Level;

/// Formats `key=value` metadata onto log lines through the `log` facade.
#[derive(Debug, Clone, Copy)]
pub struct StructuredLogger {
    enabled: bool,
}

impl StructuredLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn log_operation(&self, level: Level, operation: &str, metadata: &[(&str, String)]) {
        if !self.enabled {
            return;
        }

        log::log!(level, "{}", format_with_metadata(&format!("Op: {}", operation), metadata));
    }

    pub fn log_connection(&self, level: Level, address: &str, action: &str) {
        if !self.enabled {
            return;
        }

        log::log!(level, "Connection {}: {}", action, address);
    }

    pub fn log_error(&self, error: &str, metadata: &[(&str, String)]) {
        if !self.enabled {
            return;
        }

        log::error!("{}", format_with_metadata(&format!("Error: {}", error), metadata));
    }

    pub fn log_collection(&self, reclaimed: &[BlockId]) {
        if !self.enabled || reclaimed.is_empty() {
            return;
        }

        let ids: Vec<String> = reclaimed.iter().map(|id| id.to_string()).collect();
        log::info!(
            "Collector reclaimed {} block(s): [{}]",
            reclaimed.len(),
            ids.join(", ")
        );
    }

    pub fn log_metric(&self, name: &str, value: f64, unit: &str) {
        if !self.enabled {
            return;
        }

        log::info!("Metric: {}={}{}", name, value, unit);
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new(true)
    }
}

fn format_with_metadata(head: &str, metadata: &[(&str, String)]) -> String {
    let mut message = head.to_string();
    for (key, value) in metadata {
        message.push_str(&format!(", {}={}", key, value));
    }
    message
}
