//! Reference-counted lifecycle of managed service-account secrets.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use ferry_runner::Secret;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{SecretError, StoreError};
use crate::keys::ServiceAccountKeyManager;
use crate::store::{SecretStore, StoredSecret, lock};

/// Name prefix of every secret the manager creates. Declared secrets may not use it.
pub const MANAGED_PREFIX: &str = "ferry-sa-";

pub const LABEL_MANAGED: &str = "ferry.managed";
pub const LABEL_SERVICE_ACCOUNT: &str = "ferry.service-account";
pub const LABEL_KEY_ID: &str = "ferry.key-id";

/// Data key under which the service-account key file is stored.
pub const KEY_FILE: &str = "key.json";

/// A managed secret holding one service-account key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretHandle {
  pub name: String,
  pub service_account: String,
  pub key_id: String,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
  /// Secrets deleted by this sweep.
  pub reclaimed: Vec<String>,
  /// Managed secrets kept because they are referenced or mounted.
  pub retained: Vec<String>,
  /// Secrets selected for reclaiming whose deletion failed. The next sweep
  /// picks them up again.
  pub failed: Vec<String>,
}

struct Binding {
  /// Name the handle of this generation is created under.
  name: String,
  handle: Arc<OnceCell<SecretHandle>>,
  executions: HashSet<String>,
}

impl Binding {
  fn new(service_account: &str) -> Self {
    Self {
      name: managed_secret_name(service_account),
      handle: Arc::default(),
      executions: HashSet::new(),
    }
  }
}

/// Materializes service-account credentials as backend-native secrets and
/// reclaims them once nothing uses them.
///
/// One managed secret per service account is shared by every execution that
/// runs as that account. Executions hold references by id: [`bind`] adds one
/// before any store I/O and [`release`] drops it. Secrets are only ever
/// deleted by [`sweep`], and only when no reference is held and no live
/// execution mounts them.
///
/// A sweep removes the binding it reclaims in the same critical section that
/// checks its references, so a later [`bind`] always starts a new generation
/// under a fresh secret name instead of reusing one that is being deleted.
///
/// [`bind`]: SecretLifecycleManager::bind
/// [`release`]: SecretLifecycleManager::release
/// [`sweep`]: SecretLifecycleManager::sweep
pub struct SecretLifecycleManager {
  store: Arc<dyn SecretStore>,
  keys: Arc<dyn ServiceAccountKeyManager>,
  whitelist: BTreeSet<String>,
  bindings: Mutex<HashMap<String, Binding>>,
}

impl SecretLifecycleManager {
  pub fn new<I, S>(
    store: Arc<dyn SecretStore>,
    keys: Arc<dyn ServiceAccountKeyManager>,
    whitelist: I,
  ) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      store,
      keys,
      whitelist: whitelist.into_iter().map(Into::into).collect(),
      bindings: Mutex::new(HashMap::new()),
    }
  }

  pub fn is_allowed(&self, service_account: &str) -> bool {
    self.whitelist.contains(service_account)
  }

  /// Bind `execution_id` to the managed secret for `service_account`,
  /// creating the key and secret if this is the first binding of the current
  /// generation. Concurrent binds for one account share a single creation.
  ///
  /// On failure the execution's reference is dropped again.
  #[instrument(name = "secret_bind", skip(self))]
  pub async fn bind(
    &self,
    service_account: &str,
    execution_id: &str,
  ) -> Result<SecretHandle, SecretError> {
    if !self.is_allowed(service_account) {
      return Err(SecretError::ServiceAccountNotAllowed(
        service_account.to_string(),
      ));
    }

    let (name, cell) = {
      let mut bindings = lock(&self.bindings);
      let binding = bindings
        .entry(service_account.to_string())
        .or_insert_with(|| Binding::new(service_account));
      binding.executions.insert(execution_id.to_string());
      (binding.name.clone(), binding.handle.clone())
    };

    match cell
      .get_or_try_init(|| self.materialize(service_account, &name))
      .await
    {
      Ok(handle) => {
        debug!(secret = %handle.name, "bound execution to managed secret");
        Ok(handle.clone())
      }
      Err(e) => {
        warn!(secret = %name, error = %e, "failed to materialize managed secret");
        self.release(execution_id);
        Err(e)
      }
    }
  }

  /// Drop every reference held by `execution_id`. Never deletes anything.
  pub fn release(&self, execution_id: &str) {
    let mut bindings = lock(&self.bindings);
    for (service_account, binding) in bindings.iter_mut() {
      if binding.executions.remove(execution_id) {
        debug!(
          execution_id = %execution_id,
          service_account = %service_account,
          remaining = binding.executions.len(),
          "released managed secret reference"
        );
      }
    }
  }

  /// Check that a user-declared secret exists and is not a managed one.
  pub async fn validate_declared(&self, secret: &Secret) -> Result<(), SecretError> {
    if secret.name.starts_with(MANAGED_PREFIX) {
      return Err(SecretError::ReservedName(secret.name.clone()));
    }

    let existing = self
      .store
      .get_secret(&secret.name)
      .await
      .map_err(|e| SecretError::store("read", &secret.name, e))?;

    match existing {
      Some(_) => Ok(()),
      None => Err(SecretError::MissingSecret(secret.name.clone())),
    }
  }

  /// Delete managed secrets that nothing references.
  ///
  /// `mounted` holds the names of secrets mounted by executions that still
  /// exist on the backend; those are never reclaimed. Managed secrets
  /// without a binding in this process (older generations, or secrets left
  /// by a previous process) are reclaimed under the same rule.
  #[instrument(name = "secret_sweep", skip(self, mounted))]
  pub async fn sweep(&self, mounted: &HashSet<String>) -> Result<SweepReport, SecretError> {
    let listed = self
      .store
      .list_secrets(&managed_selector())
      .await
      .map_err(|e| SecretError::store("list", format!("{}*", MANAGED_PREFIX), e))?;

    let mut report = SweepReport::default();

    let reclaim: Vec<SecretHandle> = {
      let mut bindings = lock(&self.bindings);
      let mut reclaim = Vec::new();

      for secret in listed {
        let Some(service_account) = secret.labels.get(LABEL_SERVICE_ACCOUNT).cloned() else {
          warn!(secret = %secret.name, "managed secret has no service account label");
          continue;
        };

        if mounted.contains(&secret.name) {
          report.retained.push(secret.name);
          continue;
        }

        if let Some(binding) = bindings.get(&service_account)
          && binding.name == secret.name
        {
          if !binding.executions.is_empty() {
            report.retained.push(secret.name);
            continue;
          }
          bindings.remove(&service_account);
        }

        reclaim.push(SecretHandle {
          key_id: secret.labels.get(LABEL_KEY_ID).cloned().unwrap_or_default(),
          name: secret.name,
          service_account,
        });
      }

      // Generations whose creation failed and that nobody waits on.
      bindings.retain(|_, b| !b.executions.is_empty() || b.handle.initialized());
      reclaim
    };

    for handle in reclaim {
      match self.store.delete_secret(&handle.name).await {
        Ok(()) | Err(StoreError::NotFound(_)) => {}
        Err(e) => {
          warn!(secret = %handle.name, error = %e, "failed to delete managed secret");
          report.failed.push(handle.name);
          continue;
        }
      }

      if !handle.key_id.is_empty() {
        self.revoke_key(&handle.service_account, &handle.key_id).await;
      }

      info!(
        secret = %handle.name,
        service_account = %handle.service_account,
        "reclaimed managed secret"
      );
      report.reclaimed.push(handle.name);
    }

    Ok(report)
  }

  /// Number of executions referencing the current binding of an account.
  pub fn references(&self, service_account: &str) -> usize {
    lock(&self.bindings)
      .get(service_account)
      .map(|b| b.executions.len())
      .unwrap_or(0)
  }

  /// The materialized handle of the current binding of an account, if any.
  pub fn handle(&self, service_account: &str) -> Option<SecretHandle> {
    lock(&self.bindings)
      .get(service_account)
      .and_then(|b| b.handle.get().cloned())
  }

  async fn materialize(
    &self,
    service_account: &str,
    name: &str,
  ) -> Result<SecretHandle, SecretError> {
    let key = self
      .keys
      .create_key(service_account)
      .await
      .map_err(|e| SecretError::key("create", service_account, e))?;

    let secret = StoredSecret::new(name)
      .with_label(LABEL_MANAGED, "true")
      .with_label(LABEL_SERVICE_ACCOUNT, service_account)
      .with_label(LABEL_KEY_ID, &key.id)
      .with_data(KEY_FILE, key.json);

    match self.store.create_secret(secret).await {
      Ok(()) => {
        info!(
          secret = %name,
          service_account = %service_account,
          key_id = %key.id,
          "created managed secret"
        );
        Ok(SecretHandle {
          name: name.to_string(),
          service_account: service_account.to_string(),
          key_id: key.id,
        })
      }
      Err(StoreError::AlreadyExists(_)) => self.adopt(service_account, name, &key.id).await,
      Err(e) => {
        self.revoke_key(service_account, &key.id).await;
        Err(SecretError::store("create", name, e))
      }
    }
  }

  /// Take over a secret of this generation created by an earlier attempt
  /// whose result was lost, revoking the key issued for this attempt.
  async fn adopt(
    &self,
    service_account: &str,
    name: &str,
    unused_key_id: &str,
  ) -> Result<SecretHandle, SecretError> {
    let existing = self.store.get_secret(name).await;
    self.revoke_key(service_account, unused_key_id).await;

    let existing = existing.map_err(|e| SecretError::store("read", name, e))?;
    let key_id = existing
      .filter(|s| s.labels.get(LABEL_SERVICE_ACCOUNT).map(String::as_str) == Some(service_account))
      .and_then(|s| s.labels.get(LABEL_KEY_ID).cloned())
      .ok_or_else(|| {
        SecretError::store("create", name, StoreError::AlreadyExists(name.to_string()))
      })?;

    debug!(secret = %name, "adopted existing managed secret");
    Ok(SecretHandle {
      name: name.to_string(),
      service_account: service_account.to_string(),
      key_id,
    })
  }

  async fn revoke_key(&self, service_account: &str, key_id: &str) {
    if let Err(e) = self.keys.delete_key(service_account, key_id).await {
      warn!(
        service_account = %service_account,
        key_id = %key_id,
        error = %e,
        "failed to delete service account key"
      );
    }
  }
}

/// A fresh secret name for a new generation of an account's binding.
///
/// The account part is stable per account; the generation part is random.
pub fn managed_secret_name(service_account: &str) -> String {
  let account = Uuid::new_v5(&Uuid::NAMESPACE_OID, service_account.as_bytes())
    .simple()
    .to_string();
  let generation = Uuid::new_v4().simple().to_string();
  format!("{}{}-{}", MANAGED_PREFIX, &account[..12], &generation[..8])
}

fn managed_selector() -> BTreeMap<String, String> {
  BTreeMap::from([(LABEL_MANAGED.to_string(), "true".to_string())])
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::keys::InMemoryKeyManager;
  use crate::store::InMemorySecretStore;

  const ETL: &str = "etl@project.iam";

  fn manager() -> (SecretLifecycleManager, Arc<InMemorySecretStore>, Arc<InMemoryKeyManager>) {
    let store = Arc::new(InMemorySecretStore::new());
    let keys = Arc::new(InMemoryKeyManager::new());
    let manager = SecretLifecycleManager::new(store.clone(), keys.clone(), [ETL]);
    (manager, store, keys)
  }

  #[test]
  fn test_managed_secret_name() {
    let a = managed_secret_name(ETL);
    let b = managed_secret_name(ETL);

    assert!(a.starts_with(MANAGED_PREFIX));
    assert_eq!(a.len(), MANAGED_PREFIX.len() + 12 + 1 + 8);
    // Same account part, different generation.
    assert_eq!(a[..MANAGED_PREFIX.len() + 12], b[..MANAGED_PREFIX.len() + 12]);
    assert_ne!(a, b);
  }

  #[tokio::test]
  async fn test_bind_rejects_unlisted_account() {
    let (manager, store, _) = manager();

    let err = manager.bind("rogue@project.iam", "exec-1").await.unwrap_err();
    assert!(matches!(err, SecretError::ServiceAccountNotAllowed(_)));
    assert!(store.names().is_empty());
    assert_eq!(manager.references("rogue@project.iam"), 0);
  }

  #[tokio::test]
  async fn test_bindings_share_one_secret() {
    let (manager, store, keys) = manager();

    let first = manager.bind(ETL, "exec-1").await.unwrap();
    let second = manager.bind(ETL, "exec-2").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.names(), vec![first.name.clone()]);
    assert_eq!(keys.keys(ETL), vec![first.key_id.clone()]);
    assert_eq!(manager.references(ETL), 2);
  }

  #[tokio::test]
  async fn test_release_never_deletes() {
    let (manager, store, _) = manager();
    let handle = manager.bind(ETL, "exec-1").await.unwrap();

    manager.release("exec-1");
    assert_eq!(manager.references(ETL), 0);
    assert!(store.contains(&handle.name));
  }

  #[tokio::test]
  async fn test_sweep_reclaims_unreferenced() {
    let (manager, store, keys) = manager();
    let handle = manager.bind(ETL, "exec-1").await.unwrap();

    let report = manager.sweep(&HashSet::new()).await.unwrap();
    assert!(report.reclaimed.is_empty());
    assert_eq!(report.retained, vec![handle.name.clone()]);

    manager.release("exec-1");
    let report = manager.sweep(&HashSet::new()).await.unwrap();
    assert_eq!(report.reclaimed, vec![handle.name.clone()]);
    assert!(!store.contains(&handle.name));
    assert!(keys.keys(ETL).is_empty());
    assert_eq!(manager.handle(ETL), None);
  }

  #[tokio::test]
  async fn test_sweep_keeps_mounted_secrets() {
    let (manager, store, _) = manager();
    let handle = manager.bind(ETL, "exec-1").await.unwrap();
    manager.release("exec-1");

    let mounted = HashSet::from([handle.name.clone()]);
    let report = manager.sweep(&mounted).await.unwrap();

    assert!(report.reclaimed.is_empty());
    assert!(store.contains(&handle.name));
  }

  #[tokio::test]
  async fn test_bind_after_reclaim_uses_new_generation() {
    let (manager, store, _) = manager();
    let old = manager.bind(ETL, "exec-1").await.unwrap();
    manager.release("exec-1");
    manager.sweep(&HashSet::new()).await.unwrap();

    let new = manager.bind(ETL, "exec-2").await.unwrap();
    assert_ne!(old.name, new.name);
    assert_ne!(old.key_id, new.key_id);
    assert_eq!(store.names(), vec![new.name]);
  }

  #[tokio::test]
  async fn test_failed_key_creation_drops_reference() {
    let (manager, store, keys) = manager();
    keys.set_fail_create(true);

    let err = manager.bind(ETL, "exec-1").await.unwrap_err();
    assert!(matches!(err, SecretError::Key { .. }));
    assert_eq!(manager.references(ETL), 0);
    assert!(store.names().is_empty());

    keys.set_fail_create(false);
    let handle = manager.bind(ETL, "exec-2").await.unwrap();
    assert_eq!(manager.references(ETL), 1);
    assert!(store.contains(&handle.name));
  }

  #[tokio::test]
  async fn test_unavailable_store_revokes_new_key() {
    let (manager, store, keys) = manager();
    store.set_unavailable(true);

    let err = manager.bind(ETL, "exec-1").await.unwrap_err();
    assert!(matches!(err, SecretError::Unavailable(_)));
    assert!(keys.keys(ETL).is_empty());
    assert_eq!(manager.references(ETL), 0);
  }

  #[tokio::test]
  async fn test_sweep_reclaims_orphans() {
    let (manager, store, keys) = manager();
    let key = keys.create_key(ETL).await.unwrap();
    store
      .create_secret(
        StoredSecret::new("ferry-sa-leftover-00000000")
          .with_label(LABEL_MANAGED, "true")
          .with_label(LABEL_SERVICE_ACCOUNT, ETL)
          .with_label(LABEL_KEY_ID, &key.id),
      )
      .await
      .unwrap();
    store
      .create_secret(StoredSecret::new("db-creds"))
      .await
      .unwrap();

    let report = manager.sweep(&HashSet::new()).await.unwrap();

    assert_eq!(report.reclaimed, vec!["ferry-sa-leftover-00000000".to_string()]);
    assert_eq!(store.names(), vec!["db-creds".to_string()]);
    assert!(keys.keys(ETL).is_empty());
  }

  #[tokio::test]
  async fn test_key_delete_failure_is_not_fatal() {
    let (manager, store, keys) = manager();
    let handle = manager.bind(ETL, "exec-1").await.unwrap();
    manager.release("exec-1");
    keys.set_fail_delete(true);

    let report = manager.sweep(&HashSet::new()).await.unwrap();
    assert_eq!(report.reclaimed, vec![handle.name.clone()]);
    assert!(!store.contains(&handle.name));
    assert_eq!(keys.keys(ETL), vec![handle.key_id]);
  }

  #[tokio::test]
  async fn test_validate_declared() {
    let (manager, store, _) = manager();
    store
      .create_secret(StoredSecret::new("db-creds"))
      .await
      .unwrap();

    manager
      .validate_declared(&Secret::new("db-creds", "/etc/db"))
      .await
      .unwrap();

    let err = manager
      .validate_declared(&Secret::new("missing", "/etc/db"))
      .await
      .unwrap_err();
    assert!(matches!(err, SecretError::MissingSecret(name) if name == "missing"));

    let err = manager
      .validate_declared(&Secret::new("ferry-sa-abc", "/etc/db"))
      .await
      .unwrap_err();
    assert!(matches!(err, SecretError::ReservedName(_)));
  }
}
