use super::*;

/// A state type that can be snapshotted.
///
/// `SCHEMA` names the type and `VERSION` its encoding; a snapshot is only
/// decoded into a type with the same pair.
pub trait Versioned: Serialize + DeserializeOwned {
    const SCHEMA: &'static str;
    const VERSION: u32;
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    schema: String,
    version: u32,
    body: Vec<u8>,
}

pub fn encode_snapshot<S: Versioned>(state: &S) -> Result<Vec<u8>> {
    let envelope = SnapshotEnvelope {
        schema: S::SCHEMA.to_string(),
        version: S::VERSION,
        body: bincode::serialize(state)
            .with_context(|| format!("serialize {} state failed", S::SCHEMA))?,
    };
    bincode::serialize(&envelope).context("serialize snapshot envelope failed")
}

pub fn decode_snapshot<S: Versioned>(bytes: &[u8]) -> Result<S> {
    let envelope: SnapshotEnvelope =
        bincode::deserialize(bytes).context("deserialize snapshot envelope failed")?;
    if envelope.schema != S::SCHEMA || envelope.version != S::VERSION {
        return Err(RecoveryError::SchemaMismatch {
            expected: S::SCHEMA.to_string(),
            expected_version: S::VERSION,
            found: envelope.schema,
            found_version: envelope.version,
        }
        .into());
    }
    bincode::deserialize(&envelope.body)
        .with_context(|| format!("deserialize {} v{} state failed", S::SCHEMA, S::VERSION))
}
