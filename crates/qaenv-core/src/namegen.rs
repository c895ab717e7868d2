//! Environment name generation.

use uuid::Uuid;

/// Errors generating a name.
#[derive(Debug, thiserror::Error)]
pub enum NameError {
    #[error("name generation failed: {0}")]
    Generation(String),
}

/// Generates unique human-readable environment names.
pub trait NameGenerator: Send + Sync {
    fn generate(&self) -> Result<String, NameError>;
}

/// Default generator: a short word pair with a UUID-derived suffix for
/// uniqueness.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidNameGenerator;

const ADJECTIVES: &[&str] = &[
    "amber", "brisk", "calm", "dapper", "eager", "fuzzy", "gentle", "hazy", "keen", "lively",
    "mellow", "nimble", "quiet", "rustic", "sunny", "witty",
];

const ANIMALS: &[&str] = &[
    "badger", "crane", "dingo", "ferret", "gecko", "heron", "ibex", "jackal", "lemur", "marmot",
    "otter", "puffin", "quokka", "raven", "stoat", "wombat",
];

impl NameGenerator for UuidNameGenerator {
    fn generate(&self) -> Result<String, NameError> {
        let id = Uuid::new_v4();
        let bytes = id.as_bytes();
        let adjective = ADJECTIVES[bytes[0] as usize % ADJECTIVES.len()];
        let animal = ANIMALS[bytes[1] as usize % ANIMALS.len()];
        let suffix = u16::from_be_bytes([bytes[2], bytes[3]]);
        Ok(format!("{adjective}-{animal}-{suffix}"))
    }
}
