use serde::{Deserialize, Serialize};
use std::fmt;

/// Main result type for Faultline runtime operations
pub type FaultlineResult<T> = Result<T, FaultlineError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ErrorCode {
    // General Errors
    Unknown,
    NotSupported,
    SystemNotReady,
    Timeout,

    // Config & Init
    ConfigError,
    MissingIntegration,
    MissingCredentials,
    EngineInitializationFailed,
    HealthCheckFailed,

    // Capability & Context Errors
    ContextResolutionError,
    CapabilityResolutionError,

    // Tool Errors
    ToolNotFound,
    ToolInvalidParameters,
    ToolExecutionError,

    // Agent Errors
    AgentIterationLimit,
    AgentTimeout,
    AgentExecutionError,

    // RCA Stage Errors
    IntentClassificationError,
    HypothesisGenerationError,
    EvidenceGatheringError,
    HypothesisValidationError,
    SynthesisError,

    // LLM Errors
    LLMError,
    LLMProviderNotFound,
    LLMApiError,
    LLMTimeout,
    LLMInvalidResponse,
    LLMInvalidRequest,
    LLMAuthentication,
    LLMRateLimited,

    // Job & Queue Errors
    JobNotFound,
    JobStateConflict,
    QueueError,

    // Storage Errors
    DatabaseError,
    SerializationError,
    DeserializationError,

    // Network Errors
    NetworkError,
    UpstreamServiceError,

    // Notification Errors
    NotificationError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ErrorCategory {
    System,
    Configuration,
    Capability,
    Tool,
    Agent,
    Rca,
    LLM,
    Job,
    Queue,
    Network,
    Notification,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone)]
pub struct FaultlineError {
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
}

impl FaultlineError {
    pub fn new(
        code: ErrorCode,
        category: ErrorCategory,
        severity: ErrorSeverity,
        message: &str,
    ) -> Self {
        Self {
            code,
            category,
            severity,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for FaultlineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.category, self.code, self.message)
    }
}

impl std::error::Error for FaultlineError {}

impl FaultlineError {
    pub fn is_recoverable(&self) -> bool {
        match self.severity {
            ErrorSeverity::Low | ErrorSeverity::Medium => true,
            ErrorSeverity::High => {
                matches!(self.code, ErrorCode::Timeout | ErrorCode::AgentTimeout)
            }
            ErrorSeverity::Critical => false,
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::LLMError
                | ErrorCode::LLMApiError
                | ErrorCode::LLMRateLimited
                | ErrorCode::NetworkError
                | ErrorCode::UpstreamServiceError
                | ErrorCode::ToolExecutionError
        )
    }

    /// Configuration errors carry a remediation page the user can act on.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ConfigError | ErrorCode::MissingIntegration | ErrorCode::MissingCredentials
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.code, ErrorCode::Timeout | ErrorCode::AgentTimeout)
    }

    /// Creates a "job not found" error
    pub fn job_not_found(job_id: &str) -> Self {
        Self::new(
            ErrorCode::JobNotFound,
            ErrorCategory::Job,
            ErrorSeverity::Low,
            &format!("Job '{}' not found", job_id),
        )
    }

    /// Creates a database error
    pub fn database_error(message: &str) -> Self {
        Self::new(
            ErrorCode::DatabaseError,
            ErrorCategory::System,
            ErrorSeverity::High,
            message,
        )
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for FaultlineError {
    fn from(err: serde_json::Error) -> Self {
        FaultlineError::new(
            ErrorCode::SerializationError,
            ErrorCategory::System,
            ErrorSeverity::Medium,
            &format!("JSON serialization error: {}", err),
        )
    }
}

// Conversion from sqlx::Error
impl From<sqlx::Error> for FaultlineError {
    fn from(err: sqlx::Error) -> Self {
        FaultlineError::new(
            ErrorCode::DatabaseError,
            ErrorCategory::System,
            ErrorSeverity::High,
            &format!("Database error: {}", err),
        )
    }
}
