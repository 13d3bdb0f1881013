pub mod derivation;
pub mod error;
pub mod placeholder;
pub mod record;
pub mod session;

pub use derivation::*;
pub use error::SagaError;
pub use placeholder::Placeholder;
pub use record::{ContentBlock, Record, RecordContent, RecordKind};
pub use session::{AgentFamily, Session};

/// Current lineage block schema version.
pub const LINEAGE_SCHEMA_VERSION: u32 = 1;

/// RFC3339 wall-clock timestamp, the wire format both families use.
pub fn now_rfc3339() -> String {
    let now = time::OffsetDateTime::now_utc();
    now.format(&time::format_description::well_known::Rfc3339)
        .expect("RFC3339 formatting should not fail")
}
