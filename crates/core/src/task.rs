use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AevError;

/// Kind of inference workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Language,
    Image,
    Music,
    Embedding,
    Reasoning,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Language => "language",
            TaskType::Image => "image",
            TaskType::Music => "music",
            TaskType::Embedding => "embedding",
            TaskType::Reasoning => "reasoning",
        }
    }

    /// Multiplier applied to the base latency target. Media workloads take
    /// inherently longer than text.
    pub fn latency_multiplier(&self) -> u64 {
        match self {
            TaskType::Language | TaskType::Embedding => 1,
            TaskType::Reasoning => 2,
            TaskType::Image | TaskType::Music => 5,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = AevError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "language" | "text" => Ok(TaskType::Language),
            "image" => Ok(TaskType::Image),
            "music" | "audio" => Ok(TaskType::Music),
            "embedding" => Ok(TaskType::Embedding),
            "reasoning" => Ok(TaskType::Reasoning),
            other => Err(AevError::InvalidInput(format!("unknown task type '{}'", other))),
        }
    }
}

/// Task payload, one variant per workload type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskInput {
    Language { text: String },
    Image { prompt: String, count: u32 },
    Music { prompt: String, duration_ms: u64 },
    Embedding { inputs: Vec<String> },
    Reasoning { prompt: String },
}

impl TaskInput {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskInput::Language { .. } => TaskType::Language,
            TaskInput::Image { .. } => TaskType::Image,
            TaskInput::Music { .. } => TaskType::Music,
            TaskInput::Embedding { .. } => TaskType::Embedding,
            TaskInput::Reasoning { .. } => TaskType::Reasoning,
        }
    }

    /// Natural size in the unit decomposition works in: characters, images,
    /// milliseconds of audio or embedding items.
    pub fn natural_size(&self) -> u64 {
        match self {
            TaskInput::Language { text } => text.chars().count() as u64,
            TaskInput::Image { count, .. } => u64::from(*count),
            TaskInput::Music { duration_ms, .. } => *duration_ms,
            TaskInput::Embedding { inputs } => inputs.len() as u64,
            TaskInput::Reasoning { prompt } => prompt.chars().count() as u64,
        }
    }
}

/// Type-specific limits and per-request scheduling overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Maximum output size passed through to the back-end.
    #[serde(default)]
    pub max_output: Option<u32>,
    #[serde(default)]
    pub streaming: bool,
    /// Caller latency budget; the schedule never targets less than the type floor.
    #[serde(default)]
    pub latency_budget_ms: Option<u64>,
    /// Override for AevIP distribution (defaults to the tuning flag).
    #[serde(default)]
    pub distribute: Option<bool>,
    #[serde(default)]
    pub prefetch: Option<bool>,
    /// Audio segment length override.
    #[serde(default)]
    pub segment_ms: Option<u64>,
}

/// Inbound submission as received from the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_type: TaskType,
    #[serde(default)]
    pub priority: i32,
    pub input: TaskInput,
    #[serde(default)]
    pub constraints: Constraints,
}

/// A validated unit of inference work.
///
/// Immutable once decomposition begins; the scheduler only borrows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub priority: i32,
    pub input: TaskInput,
    pub constraints: Constraints,
}

impl Task {
    pub fn new(input: TaskInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority: 0,
            input,
            constraints: Constraints::default(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Validate an inbound request and turn it into a task.
    pub fn from_request(request: TaskRequest) -> Result<Self, AevError> {
        if request.input.task_type() != request.task_type {
            return Err(AevError::InvalidInput(format!(
                "task_type '{}' does not match '{}' input",
                request.task_type,
                request.input.task_type()
            )));
        }
        let task = Self {
            id: Uuid::new_v4(),
            priority: request.priority,
            input: request.input,
            constraints: request.constraints,
        };
        task.validate()?;
        Ok(task)
    }

    pub fn task_type(&self) -> TaskType {
        self.input.task_type()
    }

    /// Content hash over type, input and constraints. Identical requests hash
    /// identically regardless of task id or priority.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.task_type().as_str().as_bytes());
        hasher.update(serde_json::to_vec(&self.input).unwrap_or_default());
        hasher.update(serde_json::to_vec(&self.constraints).unwrap_or_default());
        format!("{:x}", hasher.finalize())
    }

    /// Reject zero-size input.
    pub fn validate(&self) -> Result<(), AevError> {
        if self.input.natural_size() == 0 {
            return Err(AevError::InvalidInput(format!(
                "{} task {} has zero-size input",
                self.task_type(),
                self.id
            )));
        }
        if let Some(0) = self.constraints.segment_ms {
            return Err(AevError::InvalidInput("segment_ms must be positive".into()));
        }
        Ok(())
    }
}
