//! Backend-native secret storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::StoreError;

/// A secret as held by the cluster's secret store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSecret {
  pub name: String,
  pub labels: BTreeMap<String, String>,
  pub data: BTreeMap<String, String>,
}

impl StoredSecret {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      labels: BTreeMap::new(),
      data: BTreeMap::new(),
    }
  }

  pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.labels.insert(key.into(), value.into());
    self
  }

  pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.data.insert(key.into(), value.into());
    self
  }

  /// Returns true if every selector pair is present in the labels.
  pub fn matches(&self, selector: &BTreeMap<String, String>) -> bool {
    selector
      .iter()
      .all(|(k, v)| self.labels.get(k).is_some_and(|l| l == v))
  }
}

/// Trait for a cluster's native secret store.
///
/// Implementations talk to the cluster control plane; calls may block on
/// network I/O and must be safe to issue concurrently.
#[async_trait]
pub trait SecretStore: Send + Sync {
  /// Create a secret. Fails with [`StoreError::AlreadyExists`] if the name is taken.
  async fn create_secret(&self, secret: StoredSecret) -> Result<(), StoreError>;

  /// Fetch a secret by name.
  async fn get_secret(&self, name: &str) -> Result<Option<StoredSecret>, StoreError>;

  /// List secrets whose labels contain every pair in `selector`.
  async fn list_secrets(
    &self,
    selector: &BTreeMap<String, String>,
  ) -> Result<Vec<StoredSecret>, StoreError>;

  /// Delete a secret. Fails with [`StoreError::NotFound`] if it does not exist.
  async fn delete_secret(&self, name: &str) -> Result<(), StoreError>;
}

/// Store operations that can be paused in [`InMemorySecretStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
  /// Pauses after the listing has been taken, before it is returned.
  List,
  /// Pauses before the secret is removed.
  Delete,
}

/// A one-shot pause point armed with [`InMemorySecretStore::hold`].
#[derive(Debug, Default)]
pub struct Hold {
  reached: Notify,
  released: Notify,
}

impl Hold {
  /// Wait until an operation is paused at this hold.
  pub async fn reached(&self) {
    self.reached.notified().await;
  }

  /// Let the paused operation continue.
  pub fn release(&self) {
    self.released.notify_one();
  }

  async fn pause(&self) {
    self.reached.notify_one();
    self.released.notified().await;
  }
}

/// In-memory secret store.
///
/// Suitable for clusterless backends and testing. Supports fault injection
/// (unavailability) and pausing individual operations so tests can
/// interleave them deterministically.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
  secrets: Mutex<BTreeMap<String, StoredSecret>>,
  holds: Mutex<HashMap<StoreOp, Arc<Hold>>>,
  unavailable: AtomicBool,
}

impl InMemorySecretStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every subsequent call fail with [`StoreError::Unavailable`].
  pub fn set_unavailable(&self, unavailable: bool) {
    self.unavailable.store(unavailable, Ordering::SeqCst);
  }

  /// Pause the next `op` until the returned hold is released.
  pub fn hold(&self, op: StoreOp) -> Arc<Hold> {
    let hold = Arc::new(Hold::default());
    lock(&self.holds).insert(op, hold.clone());
    hold
  }

  /// Names of all stored secrets, sorted.
  pub fn names(&self) -> Vec<String> {
    lock(&self.secrets).keys().cloned().collect()
  }

  pub fn contains(&self, name: &str) -> bool {
    lock(&self.secrets).contains_key(name)
  }

  fn check_available(&self) -> Result<(), StoreError> {
    if self.unavailable.load(Ordering::SeqCst) {
      Err(StoreError::Unavailable("secret store is unreachable".to_string()))
    } else {
      Ok(())
    }
  }

  async fn pause_at(&self, op: StoreOp) {
    let hold = lock(&self.holds).remove(&op);
    if let Some(hold) = hold {
      hold.pause().await;
    }
  }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
  async fn create_secret(&self, secret: StoredSecret) -> Result<(), StoreError> {
    self.check_available()?;
    let mut secrets = lock(&self.secrets);
    if secrets.contains_key(&secret.name) {
      return Err(StoreError::AlreadyExists(secret.name));
    }
    secrets.insert(secret.name.clone(), secret);
    Ok(())
  }

  async fn get_secret(&self, name: &str) -> Result<Option<StoredSecret>, StoreError> {
    self.check_available()?;
    Ok(lock(&self.secrets).get(name).cloned())
  }

  async fn list_secrets(
    &self,
    selector: &BTreeMap<String, String>,
  ) -> Result<Vec<StoredSecret>, StoreError> {
    self.check_available()?;
    let listed: Vec<StoredSecret> = lock(&self.secrets)
      .values()
      .filter(|s| s.matches(selector))
      .cloned()
      .collect();

    self.pause_at(StoreOp::List).await;
    Ok(listed)
  }

  async fn delete_secret(&self, name: &str) -> Result<(), StoreError> {
    self.check_available()?;
    self.pause_at(StoreOp::Delete).await;

    match lock(&self.secrets).remove(name) {
      Some(_) => Ok(()),
      None => Err(StoreError::NotFound(name.to_string())),
    }
  }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  match mutex.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_in_memory_secret_store() {
    let store = InMemorySecretStore::new();
    let secret = StoredSecret::new("db-creds")
      .with_label("team", "a")
      .with_data("password", "hunter2");

    store.create_secret(secret.clone()).await.unwrap();
    assert_eq!(
      store.create_secret(secret.clone()).await,
      Err(StoreError::AlreadyExists("db-creds".to_string()))
    );
    assert_eq!(store.get_secret("db-creds").await.unwrap(), Some(secret));

    store.delete_secret("db-creds").await.unwrap();
    assert_eq!(store.get_secret("db-creds").await.unwrap(), None);
    assert_eq!(
      store.delete_secret("db-creds").await,
      Err(StoreError::NotFound("db-creds".to_string()))
    );
  }

  #[tokio::test]
  async fn test_list_by_selector() {
    let store = InMemorySecretStore::new();
    store
      .create_secret(StoredSecret::new("a").with_label("managed", "true"))
      .await
      .unwrap();
    store
      .create_secret(StoredSecret::new("b").with_label("managed", "false"))
      .await
      .unwrap();
    store.create_secret(StoredSecret::new("c")).await.unwrap();

    let selector = BTreeMap::from([("managed".to_string(), "true".to_string())]);
    let listed = store.list_secrets(&selector).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "a");

    assert_eq!(store.list_secrets(&BTreeMap::new()).await.unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_unavailable() {
    let store = InMemorySecretStore::new();
    store.set_unavailable(true);
    assert!(matches!(
      store.get_secret("x").await,
      Err(StoreError::Unavailable(_))
    ));

    store.set_unavailable(false);
    assert_eq!(store.get_secret("x").await, Ok(None));
  }

  #[tokio::test]
  async fn test_hold_pauses_delete() {
    let store = Arc::new(InMemorySecretStore::new());
    store.create_secret(StoredSecret::new("a")).await.unwrap();

    let hold = store.hold(StoreOp::Delete);
    let task = {
      let store = store.clone();
      tokio::spawn(async move { store.delete_secret("a").await })
    };

    hold.reached().await;
    assert!(store.contains("a"));

    hold.release();
    task.await.unwrap().unwrap();
    assert!(!store.contains("a"));
  }
}
