use thiserror::Error;

#[derive(Error, Debug)]
pub enum EuiccError {
    /// 平台/版本不支援此 APDU 介面 (特權層的軟失敗)
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Transport error on slot {slot_id}: {message}")]
    TransportError { slot_id: i32, message: String },

    #[error("LPA operation failed: {message}")]
    LpaError { message: String },

    #[error("No channel available for slot {slot_id} port {port_id}")]
    ChannelUnavailable { slot_id: i32, port_id: i32 },

    #[error("Timed out after {timeout_ms}ms waiting for slot {slot_id} port {port_id} to reconnect")]
    ReconnectTimeout {
        slot_id: i32,
        port_id: i32,
        timeout_ms: u64,
    },

    #[error("Profile not found: {iccid}")]
    ProfileNotFound { iccid: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Hardware,
    Protocol,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EuiccError {
    pub fn lpa(message: impl Into<String>) -> Self {
        Self::LpaError {
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn transport(slot_id: i32, message: impl Into<String>) -> Self {
        Self::TransportError {
            slot_id,
            message: message.into(),
        }
    }

    /// 特權通道取得時，這類錯誤代表「此平台沒有 APDU 介面」，應轉為降級處理
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument { .. }
            | Self::TransportError { .. }
            | Self::ChannelUnavailable { .. }
            | Self::ReconnectTimeout { .. } => ErrorCategory::Hardware,
            Self::LpaError { .. } | Self::ProfileNotFound { .. } => ErrorCategory::Protocol,
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. }
            | Self::ValidationError { .. } => ErrorCategory::Configuration,
            Self::IoError(_) | Self::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::InvalidArgument { .. } => ErrorSeverity::Low,
            Self::ChannelUnavailable { .. }
            | Self::ReconnectTimeout { .. }
            | Self::TransportError { .. } => ErrorSeverity::Medium,
            Self::LpaError { .. }
            | Self::ProfileNotFound { .. }
            | Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. }
            | Self::ValidationError { .. } => ErrorSeverity::High,
            Self::IoError(_) | Self::SerializationError(_) => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => {
                "The privileged APDU interface is unavailable on this platform; use a removable card or the unprivileged path"
            }
            Self::TransportError { .. } => "Re-seat the card or retry once the modem has settled",
            Self::ChannelUnavailable { .. } => {
                "Check that the slot holds an eUICC and that the port is active, then retry"
            }
            Self::ReconnectTimeout { .. } => {
                "The card did not come back after a refresh; increase reconnect.timeout_ms or retry"
            }
            Self::LpaError { .. } => "Inspect the card state with the `profiles` command and retry",
            Self::ProfileNotFound { .. } => {
                "List profiles with the `profiles` command to find a valid ICCID"
            }
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. }
            | Self::ValidationError { .. } => "Fix the configuration file and run again",
            Self::IoError(_) => "Check file permissions and paths",
            Self::SerializationError(_) => "Report this as a bug together with the verbose log",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::ChannelUnavailable { slot_id, port_id } => {
                format!("Slot {} port {} is not operational", slot_id, port_id)
            }
            Self::ProfileNotFound { iccid } => {
                format!("No profile with ICCID {} on this card", iccid)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EuiccError>;
