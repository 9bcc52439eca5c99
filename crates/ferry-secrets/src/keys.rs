//! Service-account key issuance.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::lock;

/// A freshly issued service-account key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountKey {
  pub id: String,
  pub service_account: String,
  /// Credential file contents, mounted into the execution as-is.
  pub json: String,
}

/// Trait for issuing and revoking service-account keys.
#[async_trait]
pub trait ServiceAccountKeyManager: Send + Sync {
  async fn create_key(&self, service_account: &str) -> Result<ServiceAccountKey, StoreError>;

  async fn delete_key(&self, service_account: &str, key_id: &str) -> Result<(), StoreError>;
}

/// In-memory key manager. Tracks live keys per service account.
#[derive(Debug, Default)]
pub struct InMemoryKeyManager {
  keys: Mutex<BTreeMap<String, String>>,
  fail_create: AtomicBool,
  fail_delete: AtomicBool,
}

impl InMemoryKeyManager {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make key creation fail until reset.
  pub fn set_fail_create(&self, fail: bool) {
    self.fail_create.store(fail, Ordering::SeqCst);
  }

  /// Make key deletion fail until reset.
  pub fn set_fail_delete(&self, fail: bool) {
    self.fail_delete.store(fail, Ordering::SeqCst);
  }

  /// Ids of the live keys for a service account.
  pub fn keys(&self, service_account: &str) -> Vec<String> {
    lock(&self.keys)
      .iter()
      .filter(|(_, account)| *account == service_account)
      .map(|(id, _)| id.clone())
      .collect()
  }
}

#[async_trait]
impl ServiceAccountKeyManager for InMemoryKeyManager {
  async fn create_key(&self, service_account: &str) -> Result<ServiceAccountKey, StoreError> {
    if self.fail_create.load(Ordering::SeqCst) {
      return Err(StoreError::Other("key quota exhausted".to_string()));
    }

    let id = Uuid::new_v4().simple().to_string();
    let json = serde_json::json!({
      "type": "service_account",
      "client_email": service_account,
      "private_key_id": id,
    })
    .to_string();

    lock(&self.keys).insert(id.clone(), service_account.to_string());
    Ok(ServiceAccountKey {
      id,
      service_account: service_account.to_string(),
      json,
    })
  }

  async fn delete_key(&self, service_account: &str, key_id: &str) -> Result<(), StoreError> {
    if self.fail_delete.load(Ordering::SeqCst) {
      return Err(StoreError::Other("permission denied".to_string()));
    }

    let mut keys = lock(&self.keys);
    match keys.get(key_id) {
      Some(account) if account == service_account => {
        keys.remove(key_id);
        Ok(())
      }
      _ => Err(StoreError::NotFound(key_id.to_string())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_create_and_delete_key() {
    let manager = InMemoryKeyManager::new();

    let key = manager.create_key("etl@project.iam").await.unwrap();
    assert_eq!(manager.keys("etl@project.iam"), vec![key.id.clone()]);
    assert!(key.json.contains("etl@project.iam"));

    assert!(manager.delete_key("other@project.iam", &key.id).await.is_err());
    manager.delete_key("etl@project.iam", &key.id).await.unwrap();
    assert!(manager.keys("etl@project.iam").is_empty());
  }
}
