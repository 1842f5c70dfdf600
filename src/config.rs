use serde::{Deserialize, Serialize};

/// Visit engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// General engine settings
    pub general: GeneralConfig,

    /// Queue management configuration
    pub queues: QueueConfig,

    /// Dispatch configuration
    pub dispatch: DispatchConfig,
}

/// General engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Service name stamped on every outgoing event
    pub application_name: String,

    /// Width of the zero-padded ticket number (ticket = prefix + number)
    pub ticket_number_width: usize,
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Default service level agreement per queue, in seconds
    pub default_sla_seconds: i64,

    /// Default return delay applied when an operation does not supply one
    pub default_return_delay_seconds: i64,

    /// Default transfer delay applied when an operation does not supply one
    pub default_transfer_delay_seconds: i64,
}

/// Dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Branch parameter key holding the branch-wide auto-call toggle
    pub auto_call_parameter: String,

    /// Call method recorded when a rule-selected visit is dispatched
    pub call_next_method: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            queues: QueueConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            application_name: "visit-engine".to_string(),
            ticket_number_width: 3,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_sla_seconds: 900,
            default_return_delay_seconds: 0,
            default_transfer_delay_seconds: 0,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            auto_call_parameter: "autoCallMode".to_string(),
            call_next_method: "callNext".to_string(),
        }
    }
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.general.application_name.is_empty() {
            return Err("application_name cannot be empty".to_string());
        }
        if self.general.ticket_number_width == 0 {
            return Err("ticket_number_width must be at least 1".to_string());
        }
        if self.queues.default_sla_seconds <= 0 {
            return Err("default_sla_seconds must be positive".to_string());
        }
        Ok(())
    }
}
