use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use labelcheck_common::error::{LabelError, LabelResult};

use super::report::ComplianceReport;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    /// Set by the review front end when the user closes a review; this
    /// service only reads it back.
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("unknown session status: {value}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            status: SessionStatus::InProgress,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionFilter {
    pub user_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IterationType {
    ImageAnalysis,
    TextCheck,
    ChatQuestion,
    RevisedAnalysis,
}

impl IterationType {
    /// Iteration types whose result is a full compliance report.
    pub const ANALYSES: [IterationType; 3] = [
        IterationType::ImageAnalysis,
        IterationType::TextCheck,
        IterationType::RevisedAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImageAnalysis => "image_analysis",
            Self::TextCheck => "text_check",
            Self::ChatQuestion => "chat_question",
            Self::RevisedAnalysis => "revised_analysis",
        }
    }

    pub fn is_analysis(&self) -> bool {
        !matches!(self, Self::ChatQuestion)
    }
}

impl FromStr for IterationType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "image_analysis" => Ok(Self::ImageAnalysis),
            "text_check" => Ok(Self::TextCheck),
            "chat_question" => Ok(Self::ChatQuestion),
            "revised_analysis" => Ok(Self::RevisedAnalysis),
            _ => Err(format!("unknown iteration type: {value}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMetadata {
    pub file_name: Option<String>,
    pub media_type: String,
    pub size_bytes: u64,
}

/// Where the analysed text of a text check came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    Typed,
    PdfText,
    /// The PDF had no usable text layer and was sent as a rendered page.
    PdfImage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageAnalysisInput {
    pub file: FileMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextCheckInput {
    pub source: TextSource,
    /// Stored copy of the analysed text, possibly cut short.
    pub text_excerpt: Option<String>,
    pub text_chars: usize,
    pub excerpt_truncated: bool,
    pub file: Option<FileMetadata>,
    pub baseline_iteration_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatInput {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatResult {
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevisionInput {
    pub file: FileMetadata,
    pub baseline_iteration_id: Option<Uuid>,
}

/// Input and result of one iteration, keyed by iteration type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IterationContent {
    ImageAnalysis {
        input: ImageAnalysisInput,
        result: ComplianceReport,
    },
    TextCheck {
        input: TextCheckInput,
        result: ComplianceReport,
    },
    ChatQuestion {
        input: ChatInput,
        result: ChatResult,
    },
    RevisedAnalysis {
        input: RevisionInput,
        result: ComplianceReport,
    },
}

impl IterationContent {
    pub fn iteration_type(&self) -> IterationType {
        match self {
            Self::ImageAnalysis { .. } => IterationType::ImageAnalysis,
            Self::TextCheck { .. } => IterationType::TextCheck,
            Self::ChatQuestion { .. } => IterationType::ChatQuestion,
            Self::RevisedAnalysis { .. } => IterationType::RevisedAnalysis,
        }
    }

    pub fn report(&self) -> Option<&ComplianceReport> {
        match self {
            Self::ImageAnalysis { result, .. }
            | Self::TextCheck { result, .. }
            | Self::RevisedAnalysis { result, .. } => Some(result),
            Self::ChatQuestion { .. } => None,
        }
    }

    /// Split into the `(type, input, result)` columns of the iterations table.
    pub fn to_columns(&self) -> LabelResult<(IterationType, serde_json::Value, serde_json::Value)> {
        let (input, result) = match self {
            Self::ImageAnalysis { input, result } => (to_json(input)?, to_json(result)?),
            Self::TextCheck { input, result } => (to_json(input)?, to_json(result)?),
            Self::ChatQuestion { input, result } => (to_json(input)?, to_json(result)?),
            Self::RevisedAnalysis { input, result } => (to_json(input)?, to_json(result)?),
        };
        Ok((self.iteration_type(), input, result))
    }

    pub fn from_columns(
        kind: IterationType,
        input: serde_json::Value,
        result: serde_json::Value,
    ) -> LabelResult<Self> {
        Ok(match kind {
            IterationType::ImageAnalysis => Self::ImageAnalysis {
                input: from_json(input, kind)?,
                result: from_json(result, kind)?,
            },
            IterationType::TextCheck => Self::TextCheck {
                input: from_json(input, kind)?,
                result: from_json(result, kind)?,
            },
            IterationType::ChatQuestion => Self::ChatQuestion {
                input: from_json(input, kind)?,
                result: from_json(result, kind)?,
            },
            IterationType::RevisedAnalysis => Self::RevisedAnalysis {
                input: from_json(input, kind)?,
                result: from_json(result, kind)?,
            },
        })
    }
}

fn to_json<T: Serialize>(value: &T) -> LabelResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| LabelError::Internal(e.to_string()))
}

fn from_json<T: for<'de> Deserialize<'de>>(
    value: serde_json::Value,
    kind: IterationType,
) -> LabelResult<T> {
    serde_json::from_value(value).map_err(|e| {
        LabelError::Database(format!("corrupt {} iteration payload: {e}", kind.as_str()))
    })
}

/// One immutable step of a session's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Iteration {
    pub id: Uuid,
    pub session_id: Uuid,
    /// Store-assigned position within the session, starting at 1.
    pub sequence: i64,
    #[serde(flatten)]
    pub content: IterationContent,
    pub file_ref: Option<String>,
    pub parent_iteration_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Iteration {
    pub fn iteration_type(&self) -> IterationType {
        self.content.iteration_type()
    }
}

/// An iteration as handed to the repository; sequence and timestamp are
/// assigned on insert.
#[derive(Debug, Clone)]
pub struct NewIteration {
    pub id: Uuid,
    pub session_id: Uuid,
    pub content: IterationContent,
    pub file_ref: Option<String>,
    pub parent_iteration_id: Option<Uuid>,
}
