use thiserror::Error;

use crate::model::{ParseIdError, SessionModelError};

/// Umbrella error for callers that mix id parsing with session commands.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Session(#[from] SessionModelError),
    #[error(transparent)]
    ParseId(#[from] ParseIdError),
}
