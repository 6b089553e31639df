//! Scoped provisioning of secrets as worker-side files.
//!
//! A scope renders a set of `(path, renderable)` pairs, writes each rendered
//! value to its path before the wrapped steps run, and removes every file
//! when the scope ends. The execution engine is obligated to call
//! [`ProvisionScope::end`] on every exit path — success, step failure, or
//! build cancellation. A scope that is dropped without `end` still cleans up
//! after itself, so a panicking engine cannot leak secret files.

use crate::context::{BuildContext, BuildId};
use crate::error::SecretError;
use crate::manager::SecretManager;
use crate::render::Renderable;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One file to materialize: where it goes and what it renders from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretFileSpec {
    pub path: PathBuf,
    pub source: Renderable,
}

impl SecretFileSpec {
    pub fn new(path: impl Into<PathBuf>, source: Renderable) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

/// Tracks which paths are provisioned by the active scopes of each build and
/// refuses overlapping provisions at `begin` time.
#[derive(Debug, Default)]
pub struct Provisioner {
    active: Mutex<HashMap<BuildId, HashSet<PathBuf>>>,
}

impl Provisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render and write every spec, returning the scope that owns the files.
    ///
    /// Fails with `ConflictingProvision` if any path is already owned by an
    /// active scope of the same build (or repeated within `specs`). On a
    /// render or write failure, files already written by this call are
    /// removed before the error is returned.
    pub async fn begin(
        self: &Arc<Self>,
        ctx: &BuildContext,
        manager: &SecretManager,
        specs: Vec<SecretFileSpec>,
    ) -> Result<ProvisionScope, SecretError> {
        let paths: Vec<PathBuf> = specs.iter().map(|spec| spec.path.clone()).collect();
        self.reserve(ctx.build_id(), &paths)?;

        let mut written: Vec<PathBuf> = Vec::new();
        for spec in &specs {
            match write_secret_file(spec, manager, ctx).await {
                Ok(()) => written.push(spec.path.clone()),
                Err(err) => {
                    for path in &written {
                        if let Err(cleanup_err) = remove_secret_file(path).await {
                            warn!(
                                path = %path.display(),
                                error = %cleanup_err,
                                "failed to remove partially provisioned file"
                            );
                        }
                    }
                    self.release(ctx.build_id(), &paths);
                    return Err(err);
                }
            }
        }

        info!(
            build = %ctx.build_id(),
            files = written.len(),
            "provisioned secret files"
        );
        Ok(ProvisionScope {
            build: ctx.build_id(),
            paths,
            provisioner: Arc::clone(self),
            released: false,
        })
    }

    fn reserve(&self, build: BuildId, paths: &[PathBuf]) -> Result<(), SecretError> {
        let mut active = self.active.lock();
        let owned = active.entry(build).or_default();
        let mut requested: HashSet<&PathBuf> = HashSet::new();
        for path in paths {
            if owned.contains(path) || !requested.insert(path) {
                return Err(SecretError::ConflictingProvision {
                    build,
                    path: path.clone(),
                });
            }
        }
        for path in paths {
            owned.insert(path.clone());
        }
        Ok(())
    }

    fn release(&self, build: BuildId, paths: &[PathBuf]) {
        let mut active = self.active.lock();
        if let Some(owned) = active.get_mut(&build) {
            for path in paths {
                owned.remove(path);
            }
            if owned.is_empty() {
                active.remove(&build);
            }
        }
    }
}

/// The bounded lifetime during which a set of secret files exists on the
/// worker. Call [`end`](Self::end) when the wrapped steps finish, however
/// they finish.
#[derive(Debug)]
pub struct ProvisionScope {
    build: BuildId,
    paths: Vec<PathBuf>,
    provisioner: Arc<Provisioner>,
    released: bool,
}

impl ProvisionScope {
    pub fn build_id(&self) -> BuildId {
        self.build
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove every file this scope provisioned and release the paths.
    ///
    /// All removals are attempted even if one fails; the first failure is
    /// reported after the paths have been released.
    pub async fn end(mut self) -> Result<(), SecretError> {
        self.released = true;
        let mut first_err: Option<SecretError> = None;

        for path in &self.paths {
            match remove_secret_file(path).await {
                Ok(()) => debug!(path = %path.display(), "removed provisioned secret file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to remove secret file");
                    first_err.get_or_insert(SecretError::ProvisionIo {
                        path: path.clone(),
                        source: err,
                    });
                }
            }
        }

        self.provisioner.release(self.build, &self.paths);
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

impl Drop for ProvisionScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Last-resort synchronous cleanup for scopes abandoned without end().
        warn!(build = %self.build, "provision scope dropped without end; removing files");
        for path in &self.paths {
            if let Ok(meta) = std::fs::metadata(path) {
                let _ = std::fs::write(path, vec![0u8; meta.len() as usize]);
            }
            let _ = std::fs::remove_file(path);
        }
        self.provisioner.release(self.build, &self.paths);
    }
}

async fn write_secret_file(
    spec: &SecretFileSpec,
    manager: &SecretManager,
    ctx: &BuildContext,
) -> Result<(), SecretError> {
    let rendered = spec.source.render(manager, ctx).await?;

    if let Some(parent) = spec.path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SecretError::ProvisionIo {
                    path: spec.path.clone(),
                    source,
                })?;
        }
    }

    tokio::fs::write(&spec.path, rendered.as_bytes())
        .await
        .map_err(|source| SecretError::ProvisionIo {
            path: spec.path.clone(),
            source,
        })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&spec.path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|source| SecretError::ProvisionIo {
                path: spec.path.clone(),
                source,
            })?;
    }

    Ok(())
}

/// Overwrite then unlink, so the value does not linger in the file's blocks.
async fn remove_secret_file(path: &Path) -> std::io::Result<()> {
    if let Ok(meta) = tokio::fs::metadata(path).await {
        let _ = tokio::fs::write(path, vec![0u8; meta.len() as usize]).await;
    }
    tokio::fs::remove_file(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::SecretIdentifier;
    use crate::providers::{FetchOutcome, SecretProvider};
    use crate::redaction::RedactionRegistry;
    use crate::value::SecretValue;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct OneSecret;

    #[async_trait]
    impl SecretProvider for OneSecret {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch(
            &self,
            identifier: &SecretIdentifier,
        ) -> Result<FetchOutcome, SecretError> {
            if identifier.path() == "token" {
                Ok(FetchOutcome::Found(SecretValue::new("t0k3n", "stub")))
            } else {
                Ok(FetchOutcome::NotFound)
            }
        }
    }

    fn setup() -> (SecretManager, BuildContext, Arc<Provisioner>) {
        let mut manager = SecretManager::new();
        manager.register(Arc::new(OneSecret));
        let ctx = BuildContext::new(BuildId::new(1), Arc::new(RedactionRegistry::new()));
        (manager, ctx, Arc::new(Provisioner::new()))
    }

    #[tokio::test]
    async fn files_exist_during_scope_and_are_removed_at_end() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("netrc");
        let (manager, ctx, provisioner) = setup();

        let scope = provisioner
            .begin(
                &ctx,
                &manager,
                vec![SecretFileSpec::new(&target, Renderable::Secret("token".into()))],
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "t0k3n");
        scope.end().await.unwrap();
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn provisioned_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("keyfile");
        let (manager, ctx, provisioner) = setup();

        let scope = provisioner
            .begin(
                &ctx,
                &manager,
                vec![SecretFileSpec::new(&target, Renderable::Secret("token".into()))],
            )
            .await
            .unwrap();

        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        scope.end().await.unwrap();
    }

    #[tokio::test]
    async fn overlapping_paths_conflict() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("shared");
        let (manager, ctx, provisioner) = setup();

        let scope = provisioner
            .begin(
                &ctx,
                &manager,
                vec![SecretFileSpec::new(&target, Renderable::Secret("token".into()))],
            )
            .await
            .unwrap();

        let err = provisioner
            .begin(
                &ctx,
                &manager,
                vec![SecretFileSpec::new(&target, Renderable::Secret("token".into()))],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::ConflictingProvision { .. }));

        scope.end().await.unwrap();
    }

    #[tokio::test]
    async fn path_is_reusable_after_end() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("reused");
        let (manager, ctx, provisioner) = setup();

        let spec = || SecretFileSpec::new(&target, Renderable::Secret("token".into()));
        let scope = provisioner.begin(&ctx, &manager, vec![spec()]).await.unwrap();
        scope.end().await.unwrap();

        let scope = provisioner.begin(&ctx, &manager, vec![spec()]).await.unwrap();
        scope.end().await.unwrap();
    }

    #[tokio::test]
    async fn disjoint_scopes_coexist() {
        let dir = TempDir::new().unwrap();
        let (manager, ctx, provisioner) = setup();

        let a = provisioner
            .begin(
                &ctx,
                &manager,
                vec![SecretFileSpec::new(
                    dir.path().join("a"),
                    Renderable::Secret("token".into()),
                )],
            )
            .await
            .unwrap();
        let b = provisioner
            .begin(
                &ctx,
                &manager,
                vec![SecretFileSpec::new(
                    dir.path().join("b"),
                    Renderable::Secret("token".into()),
                )],
            )
            .await
            .unwrap();

        a.end().await.unwrap();
        b.end().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_paths_within_one_request_conflict() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("dup");
        let (manager, ctx, provisioner) = setup();

        let err = provisioner
            .begin(
                &ctx,
                &manager,
                vec![
                    SecretFileSpec::new(&target, Renderable::Secret("token".into())),
                    SecretFileSpec::new(&target, Renderable::Secret("token".into())),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::ConflictingProvision { .. }));
    }

    #[tokio::test]
    async fn failed_render_removes_already_written_files() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good");
        let bad = dir.path().join("bad");
        let (manager, ctx, provisioner) = setup();

        let err = provisioner
            .begin(
                &ctx,
                &manager,
                vec![
                    SecretFileSpec::new(&good, Renderable::Secret("token".into())),
                    SecretFileSpec::new(&bad, Renderable::Secret("ghost".into())),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::SecretNotFound { .. }));
        assert!(!good.exists());

        // The reservation was rolled back too: the paths are free again.
        let scope = provisioner
            .begin(
                &ctx,
                &manager,
                vec![SecretFileSpec::new(&good, Renderable::Secret("token".into()))],
            )
            .await
            .unwrap();
        scope.end().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_scope_still_cleans_up() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("leaked");
        let (manager, ctx, provisioner) = setup();

        let scope = provisioner
            .begin(
                &ctx,
                &manager,
                vec![SecretFileSpec::new(&target, Renderable::Secret("token".into()))],
            )
            .await
            .unwrap();
        assert!(target.exists());
        drop(scope);
        assert!(!target.exists());

        // And the path registration was released.
        let scope = provisioner
            .begin(
                &ctx,
                &manager,
                vec![SecretFileSpec::new(&target, Renderable::Secret("token".into()))],
            )
            .await
            .unwrap();
        scope.end().await.unwrap();
    }

    #[tokio::test]
    async fn end_tolerates_already_removed_files() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("gone");
        let (manager, ctx, provisioner) = setup();

        let scope = provisioner
            .begin(
                &ctx,
                &manager,
                vec![SecretFileSpec::new(&target, Renderable::Secret("token".into()))],
            )
            .await
            .unwrap();
        std::fs::remove_file(&target).unwrap();
        scope.end().await.unwrap();
    }

    #[tokio::test]
    async fn parent_directories_are_created() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested/dir/secret");
        let (manager, ctx, provisioner) = setup();

        let scope = provisioner
            .begin(
                &ctx,
                &manager,
                vec![SecretFileSpec::new(&target, Renderable::Secret("token".into()))],
            )
            .await
            .unwrap();
        assert!(target.exists());
        scope.end().await.unwrap();
        assert!(!target.exists());
    }
}
