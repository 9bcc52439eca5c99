use std::sync::{Arc, RwLock};

/// Shared holder for the identifier of the currently active backend.
///
/// Cloning shares the underlying value. Routers read it through
/// [`ActiveBackend::resolver`] on every call, so [`ActiveBackend::set`] moves
/// new traffic to a different backend without a restart.
#[derive(Debug, Clone)]
pub struct ActiveBackend {
  current: Arc<RwLock<String>>,
}

impl ActiveBackend {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      current: Arc::new(RwLock::new(id.into())),
    }
  }

  pub fn get(&self) -> String {
    match self.current.read() {
      Ok(current) => current.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }

  pub fn set(&self, id: impl Into<String>) {
    let id = id.into();
    match self.current.write() {
      Ok(mut current) => *current = id,
      Err(poisoned) => *poisoned.into_inner() = id,
    }
  }

  /// A supplier returning the active identifier at the time it is called.
  pub fn resolver(&self) -> impl Fn() -> String + Send + Sync + 'static {
    let active = self.clone();
    move || active.get()
  }
}
