use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowIdError;

const KEY_SEPARATOR: char = '#';

/// A value identifying a workflow, independent of the workflow's current
/// configuration.
///
/// Equality, hashing and ordering are all defined over the encoded key, so two
/// ids compare equal exactly when they encode to the same storage key, and
/// sorted listings follow the byte order of those keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawWorkflowId")]
pub struct WorkflowId {
  /// The component that owns the workflow.
  #[serde(rename = "component_id")]
  owner: String,
  /// The workflow name within the owning component.
  #[serde(rename = "id")]
  name: String,
}

#[derive(Deserialize)]
struct RawWorkflowId {
  component_id: String,
  id: String,
}

impl TryFrom<RawWorkflowId> for WorkflowId {
  type Error = WorkflowIdError;

  fn try_from(raw: RawWorkflowId) -> Result<Self, Self::Error> {
    WorkflowId::new(raw.component_id, raw.id)
  }
}

impl WorkflowId {
  /// Create a workflow id. Both parts must be non-empty.
  pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self, WorkflowIdError> {
    let owner = owner.into();
    let name = name.into();

    if owner.is_empty() {
      return Err(WorkflowIdError::InvalidIdentity { field: "owner" });
    }
    if name.is_empty() {
      return Err(WorkflowIdError::InvalidIdentity { field: "name" });
    }

    Ok(Self { owner, name })
  }

  pub fn owner(&self) -> &str {
    &self.owner
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Encode as `owner#name`.
  ///
  /// Used as the id in storage and in cluster labels. Do not change.
  pub fn key(&self) -> String {
    format!("{}{}{}", self.owner, KEY_SEPARATOR, self.name)
  }

  /// Decode a key produced by [`WorkflowId::key`].
  ///
  /// Splits on the first `#`, which must sit past index 0. Everything after
  /// it, including further `#` characters, is the name.
  pub fn parse_key(key: &str) -> Result<Self, WorkflowIdError> {
    match key.find(KEY_SEPARATOR) {
      Some(pos) if pos > 0 => Self::new(&key[..pos], &key[pos + 1..])
        .map_err(|_| WorkflowIdError::MalformedKey(key.to_string())),
      _ => Err(WorkflowIdError::MalformedKey(key.to_string())),
    }
  }

  fn key_bytes(&self) -> impl Iterator<Item = u8> + '_ {
    self
      .owner
      .bytes()
      .chain(std::iter::once(KEY_SEPARATOR as u8))
      .chain(self.name.bytes())
  }
}

impl PartialEq for WorkflowId {
  fn eq(&self, other: &Self) -> bool {
    self.key_bytes().eq(other.key_bytes())
  }
}

impl Eq for WorkflowId {}

impl Hash for WorkflowId {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.key().hash(state);
  }
}

impl PartialOrd for WorkflowId {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for WorkflowId {
  fn cmp(&self, other: &Self) -> Ordering {
    self.key_bytes().cmp(other.key_bytes())
  }
}

impl fmt::Display for WorkflowId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}{}", self.owner, KEY_SEPARATOR, self.name)
  }
}

impl FromStr for WorkflowId {
  type Err = WorkflowIdError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse_key(s)
  }
}
