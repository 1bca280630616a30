mod ids;
mod question;
mod section;
mod session;
mod snapshot;

pub use ids::{PaperId, ParseIdError, QuestionId, SessionId};
pub use question::QuestionRef;
pub use section::Section;
pub use session::{
    Advance, InstructionTimer, PaperRef, PersistedAnswers, PersistedLifecycle, SectionAdvance,
    Session, SessionConfig, SessionModelError, SessionPhase, SessionProgress,
};
pub use snapshot::{InstructionTimerSnapshot, SNAPSHOT_VERSION, SectionSnapshot, SessionSnapshot};
