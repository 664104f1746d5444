use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub type Id = String;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// SHA-256 hex digest of a serialized document
pub fn checksum(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// Which live pointer an edge represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerType {
    Draft,
    Published,
}

impl ContainerType {
    pub fn all() -> [ContainerType; 2] {
        [ContainerType::Draft, ContainerType::Published]
    }

    /// Short form used in index names
    pub fn short_name(&self) -> &'static str {
        match self {
            ContainerType::Draft => "draft",
            ContainerType::Published => "published",
        }
    }
}

impl std::fmt::Display for ContainerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerType::Draft => write!(f, "DRAFT"),
            ContainerType::Published => write!(f, "PUBLISHED"),
        }
    }
}

/// Reference to a named element, as carried in event payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRef {
    pub uuid: Id,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable() {
        assert_eq!(checksum("{\"a\":1}"), checksum("{\"a\":1}"));
        assert_ne!(checksum("{\"a\":1}"), checksum("{\"a\":2}"));
        assert_eq!(checksum("").len(), 64);
    }

    #[test]
    fn test_container_type_wire_format() {
        let json = serde_json::to_string(&ContainerType::Published).unwrap();
        assert_eq!(json, "\"PUBLISHED\"");
        assert_eq!(ContainerType::Draft.short_name(), "draft");
    }
}
