//! Identifier generation for new records

use uuid::Uuid;

pub trait IdGenerator: Send + Sync {
    /// Returns a globally unique, opaque identifier.
    fn generate(&self) -> String;
}

/// Random (v4) UUIDs in hyphenated form
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
