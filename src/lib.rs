pub mod config;
pub mod document;
pub mod error_codes;
pub mod ingest;
pub mod isolation;
pub mod normalize;
pub mod platform;
pub mod records;
pub mod resource;
pub mod session;

pub use error_codes::{find_coded_error, has_code, CodedError};
pub use normalize::{normalize, NormalizedGame, Normalizer, SourceKind};
pub use records::{GameRecord, GameUpdate, JsonRecordStore, MemoryRecordStore, RecordStore};
pub use resource::{FileResourceHost, MemoryResourceHost, ResourceHandle, ResourceHost, ResourceRef};
pub use session::{PlaybackEnvironment, PlaybackSession, SessionHandle, SessionState};
