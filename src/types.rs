//! Core identifier types shared across the engine.

use std::fmt;

/// Identifier for a pipeline stage, including the virtual `Start` and `End`
/// endpoints.
///
/// `Start` and `End` exist only as routing anchors: they never carry an
/// executable stage. Registered stages are always [`StageId::Named`].
///
/// # Examples
///
/// ```rust
/// use delver::types::StageId;
///
/// let id = StageId::from("analysis");
/// assert_eq!(id, StageId::Named("analysis".into()));
/// assert_eq!(id.encode(), "Named:analysis");
/// assert_eq!(StageId::decode("Named:analysis"), id);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StageId {
    /// Virtual entry point of a pipeline.
    Start,
    /// Virtual exit point of a pipeline.
    End,
    /// A user-registered stage.
    Named(String),
}

impl StageId {
    /// Encode for storage. `Named` variants keep a prefix so a stage literally
    /// called "Start" cannot collide with the virtual endpoint.
    pub fn encode(&self) -> String {
        match self {
            StageId::Start => "Start".into(),
            StageId::End => "End".into(),
            StageId::Named(name) => format!("Named:{name}"),
        }
    }

    /// Inverse of [`StageId::encode`]. Unknown strings decode as `Named` so
    /// old persisted rows keep loading.
    pub fn decode(encoded: &str) -> Self {
        match encoded {
            "Start" => StageId::Start,
            "End" => StageId::End,
            other => match other.strip_prefix("Named:") {
                Some(name) => StageId::Named(name.to_string()),
                None => StageId::Named(other.to_string()),
            },
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageId::Start => write!(f, "Start"),
            StageId::End => write!(f, "End"),
            StageId::Named(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for StageId {
    fn from(name: &str) -> Self {
        StageId::Named(name.to_string())
    }
}

impl From<String> for StageId {
    fn from(name: String) -> Self {
        StageId::Named(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        for id in [
            StageId::Start,
            StageId::End,
            StageId::Named("analysis".into()),
        ] {
            assert_eq!(StageId::decode(&id.encode()), id);
        }
    }

    #[test]
    fn named_start_does_not_collide_with_virtual_start() {
        let named = StageId::Named("Start".into());
        assert_eq!(named.encode(), "Named:Start");
        assert_eq!(StageId::decode("Named:Start"), named);
        assert_ne!(StageId::decode("Named:Start"), StageId::Start);
    }

    #[test]
    fn display_uses_bare_name() {
        assert_eq!(StageId::from("writing").to_string(), "writing");
    }
}
