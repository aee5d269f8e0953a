use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use pluginverifier_repository::files::{DownloadResult, FileDownloader};
use pluginverifier_repository::resources::{
    CapacitySweepPolicy, CountWeight, ProvideResult, ResourceProvider, ResourceRepository,
};
use pluginverifier_test::{Counter, Gate};

pub type TestRepository = ResourceRepository<String, String, CountWeight>;

/// Provides `resource-{key}`, except for keys that start with `missing`, `broken` or `panic`.
///
/// With a gate, every call blocks until the gate is opened.
#[derive(Clone, Default)]
pub struct FakeProvider {
    pub calls: Counter,
    pub gate: Option<Gate>,
}

impl FakeProvider {
    pub fn gated(gate: &Gate) -> Self {
        Self {
            calls: Counter::new(),
            gate: Some(gate.clone()),
        }
    }
}

impl ResourceProvider<String, String> for FakeProvider {
    fn provide<'a>(&'a self, key: &'a String) -> BoxFuture<'a, ProvideResult<String>> {
        Box::pin(async move {
            self.calls.hit();
            if let Some(gate) = &self.gate {
                gate.wait().await;
            }

            if key.starts_with("missing") {
                ProvideResult::NotFound(format!("no such plugin: {key}"))
            } else if key.starts_with("broken") {
                ProvideResult::Failed(
                    "download failed".into(),
                    anyhow::anyhow!("connection reset"),
                )
            } else if key.starts_with("panic") {
                panic!("provider exploded");
            } else {
                ProvideResult::Provided(format!("resource-{key}"))
            }
        })
    }
}

/// A repository holding at most `capacity` resources, counting disposals in `disposed`.
pub fn counting_repository(
    capacity: u64,
    provider: FakeProvider,
    disposed: &Counter,
) -> TestRepository {
    let disposed = disposed.clone();
    ResourceRepository::builder(|_: &String| CountWeight(1))
        .name("test")
        .sweep_policy(CapacitySweepPolicy::new(CountWeight(capacity)))
        .disposer(move |_: &String, _: String| -> anyhow::Result<()> {
            disposed.hit();
            Ok(())
        })
        .build(provider)
}

/// Waits until `counter` reached `count`, letting other tasks run in the meantime.
pub async fn wait_for(counter: &Counter, count: usize) {
    while counter.get() < count {
        tokio::task::yield_now().await;
    }
}

/// Writes `{key}` into the staging directory, except for keys that start with `missing`.
#[derive(Clone, Default)]
pub struct FakeDownloader {
    pub calls: Counter,
}

impl FileDownloader<String> for FakeDownloader {
    fn download<'a>(
        &'a self,
        key: &'a String,
        staging_dir: &'a Path,
    ) -> BoxFuture<'a, DownloadResult> {
        Box::pin(async move {
            self.calls.hit();
            if key.starts_with("missing") {
                return DownloadResult::NotFound(format!("no such plugin: {key}"));
            }

            let path = staging_dir.join(key);
            match std::fs::write(&path, key.as_bytes()) {
                Ok(()) => DownloadResult::Downloaded(path),
                Err(e) => DownloadResult::Failed("failed to write download".into(), e.into()),
            }
        })
    }
}

/// Writes a file of `size` bytes into `dir`.
pub fn write_file(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, vec![b'x'; size]).unwrap();
    path
}
