//! Persists the proxy store to a YAML state file.

use super::GlobalState;
use crate::proxystore::Store;
use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct Store2File {
    path: PathBuf,
    store: Arc<Store>,
}

// === impl Store2File ===

impl Store2File {
    pub fn new(path: impl Into<PathBuf>, store: Arc<Store>) -> Self {
        Self {
            path: path.into(),
            store,
        }
    }

    /// Rewrites the file on every revision of a fully synced store, until the store closes or
    /// `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut rev = 0;
        loop {
            let mut state = None;
            let (next, closed) = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                res = self.store.view(rev, |tree| {
                    if tree.all_synced() {
                        state = Some(GlobalState::from_tree(tree));
                    }
                }) => res,
            };
            if closed {
                return Ok(());
            }
            rev = next;

            if let Some(state) = state {
                self.write(&state).await?;
                info!(rev, path = %self.path.display(), "Wrote state file");
            }
        }
    }

    /// Writes through a temporary file so readers never observe a partial document.
    async fn write(&self, state: &GlobalState) -> Result<()> {
        let yaml = serde_yaml::to_string(state).context("failed to encode state")?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, yaml)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        jobs::file2store::read_state,
        proxystore::Set,
        test_util::{init_tracing, mk_endpoint, mk_service},
    };
    use tokio::time;

    #[tokio::test]
    async fn writes_synced_state() {
        let _tracing = init_tracing();
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("state.yaml");
        let store = Store::shared();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Store2File::new(&path, store.clone()).run(cancel.clone()));

        // Partially synced stores are not written.
        store.update(|tx| {
            tx.set_service(mk_service("ns", "svc"), vec![]);
            tx.set_sync(Set::Services);
        });
        time::sleep(time::Duration::from_millis(50)).await;
        assert!(!path.exists());

        store.update(|tx| {
            let mut ep = mk_endpoint("ns", "svc", "svc-abcde", "pod-1", "10.0.0.1");
            ep.node_name = "node-a".to_string();
            tx.set_endpoints_of_source("ns", "svc-abcde", vec![ep]);
            tx.set_sync(Set::Nodes);
            tx.set_sync(Set::Endpoints);
        });

        let state = time::timeout(time::Duration::from_secs(5), async {
            loop {
                if let Ok(state) = read_state(&path).await {
                    return state;
                }
                time::sleep(time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("state must be written");

        assert!(state.nodes.is_empty());
        assert_eq!(state.services.len(), 1);
        let svc = &state.services[0];
        assert_eq!(svc.service.name, "svc");
        assert_eq!(svc.endpoints.len(), 1);
        let ep = &svc.endpoints[0];
        assert_eq!(ep.node_name, "node-a");
        assert_eq!(ep.pod_name, "pod-1");
        assert!(ep.source_name.is_empty());
        assert!(ep.namespace.is_empty());

        store.close();
        task.await
            .expect("job must not panic")
            .expect("job must succeed");
        drop(cancel);
    }
}
