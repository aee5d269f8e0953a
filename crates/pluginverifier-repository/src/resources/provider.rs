use futures::future::BoxFuture;

/// The outcome of a single [`ResourceProvider::provide`] call.
#[derive(Debug)]
pub enum ProvideResult<R> {
    /// The resource was provisioned.
    Provided(R),
    /// The resource does not exist; the string explains why.
    NotFound(String),
    /// Provisioning failed.
    Failed(String, anyhow::Error),
}

/// Provisions resources that are missing from a [`ResourceRepository`](super::ResourceRepository).
///
/// The repository guarantees that at most one `provide` call per key is in flight. Retrying
/// transient errors is up to the provider.
pub trait ResourceProvider<K, R>: Send + Sync + 'static {
    fn provide<'a>(&'a self, key: &'a K) -> BoxFuture<'a, ProvideResult<R>>;
}

/// Releases whatever a resource holds once it leaves the repository.
///
/// Called exactly once per resource, never while the resource is locked, and never with the
/// repository mutex held. Errors are logged by the repository.
pub trait ResourceDisposer<K, R>: Send + Sync + 'static {
    fn dispose(&self, key: &K, resource: R) -> anyhow::Result<()>;
}

impl<K, R, F> ResourceDisposer<K, R> for F
where
    F: Fn(&K, R) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn dispose(&self, key: &K, resource: R) -> anyhow::Result<()> {
        self(key, resource)
    }
}
