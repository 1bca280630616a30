use serde::{Deserialize, Serialize};

use crate::model::ids::QuestionId;

/// Position of one question in a session and the section it belongs to.
///
/// Question content lives with the content provider; the engine only needs
/// identity and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRef {
    pub id: QuestionId,
    pub section_index: usize,
}

impl QuestionRef {
    #[must_use]
    pub fn new(id: QuestionId, section_index: usize) -> Self {
        Self { id, section_index }
    }
}
