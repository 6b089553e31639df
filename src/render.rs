//! Deferred rendering of secret references.
//!
//! Configuration carries [`Renderable`] values instead of resolved secrets;
//! nothing is resolved while the build graph is loaded or constructed. The
//! execution engine renders at the instant a step needs the value, so a
//! rotated backend secret is always picked up and no resolved value outlives
//! its use.

use crate::context::BuildContext;
use crate::error::SecretError;
use crate::manager::SecretManager;
use serde::{Deserialize, Serialize};

const PLACEHOLDER_OPEN: &str = "%(secret:";
const PLACEHOLDER_CLOSE: &str = ")s";

/// A configuration primitive rendered at step execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Renderable {
    /// Plain text, rendered as-is.
    Literal(String),
    /// A direct secret reference: renders to exactly the resolved value.
    Secret(String),
    /// Literal text with embedded `%(secret:<reference>)s` placeholders.
    Interpolate(String),
}

impl Renderable {
    pub async fn render(
        &self,
        manager: &SecretManager,
        ctx: &BuildContext,
    ) -> Result<String, SecretError> {
        match self {
            Renderable::Literal(text) => Ok(text.clone()),
            Renderable::Secret(name) => {
                let value = manager.resolve(ctx, name).await?;
                Ok(value.reveal().to_string())
            }
            Renderable::Interpolate(template) => interpolate(template, manager, ctx).await,
        }
    }
}

impl From<&str> for Renderable {
    fn from(text: &str) -> Self {
        Renderable::Literal(text.to_string())
    }
}

/// Substitute every `%(secret:...)s` placeholder in `template`.
///
/// Each occurrence is resolved independently — two placeholders naming the
/// same reference trigger two resolutions, so a mid-template rotation is
/// honored. Any unresolvable placeholder aborts the whole render; no
/// partially substituted text is ever produced. An unterminated placeholder
/// is not an error: the text is kept verbatim.
pub async fn interpolate(
    template: &str,
    manager: &SecretManager,
    ctx: &BuildContext,
) -> Result<String, SecretError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(PLACEHOLDER_OPEN) {
        let after = &rest[start + PLACEHOLDER_OPEN.len()..];
        let Some(end) = after.find(PLACEHOLDER_CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = &after[..end];
        let value = manager.resolve(ctx, name).await?;
        out.push_str(value.reveal());
        rest = &after[end + PLACEHOLDER_CLOSE.len()..];
    }
    out.push_str(rest);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BuildId;
    use crate::identifier::SecretIdentifier;
    use crate::providers::{FetchOutcome, SecretProvider};
    use crate::redaction::RedactionRegistry;
    use crate::value::SecretValue;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MapProvider {
        entries: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl MapProvider {
        fn new(entries: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                entries: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SecretProvider for MapProvider {
        fn name(&self) -> &str {
            "map"
        }

        async fn fetch(
            &self,
            identifier: &SecretIdentifier,
        ) -> Result<FetchOutcome, SecretError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.entries.get(&identifier.path()) {
                Some(value) => Ok(FetchOutcome::Found(SecretValue::new(value, self.name()))),
                None => Ok(FetchOutcome::NotFound),
            }
        }
    }

    fn setup(entries: &[(&str, &str)]) -> (SecretManager, BuildContext, Arc<MapProvider>) {
        let provider = MapProvider::new(entries);
        let mut manager = SecretManager::new();
        manager.register(Arc::clone(&provider) as Arc<dyn SecretProvider>);
        let ctx = BuildContext::new(BuildId::new(1), Arc::new(RedactionRegistry::new()));
        (manager, ctx, provider)
    }

    #[tokio::test]
    async fn literal_renders_verbatim() {
        let (manager, ctx, _) = setup(&[]);
        let out = Renderable::from("plain text").render(&manager, &ctx).await.unwrap();
        assert_eq!(out, "plain text");
    }

    #[tokio::test]
    async fn direct_reference_renders_to_exactly_the_value() {
        let (manager, ctx, _) = setup(&[("token", "t0k3n")]);
        let out = Renderable::Secret("token".into())
            .render(&manager, &ctx)
            .await
            .unwrap();
        assert_eq!(out, "t0k3n");
    }

    #[tokio::test]
    async fn template_substitutes_placeholders() {
        let (manager, ctx, _) = setup(&[("user", "admin"), ("pw", "hunter2")]);
        let out = Renderable::Interpolate(
            "postgres://%(secret:user)s:%(secret:pw)s@db/prod".into(),
        )
        .render(&manager, &ctx)
        .await
        .unwrap();
        assert_eq!(out, "postgres://admin:hunter2@db/prod");
    }

    #[tokio::test]
    async fn unresolvable_placeholder_aborts_whole_render() {
        let (manager, ctx, _) = setup(&[("user", "admin")]);
        let err = Renderable::Interpolate("%(secret:user)s and %(secret:ghost)s".into())
            .render(&manager, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::SecretNotFound { .. }));
    }

    #[tokio::test]
    async fn direct_missing_reference_fails() {
        let (manager, ctx, _) = setup(&[]);
        let err = Renderable::Secret("ghost".into())
            .render(&manager, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::SecretNotFound { .. }));
    }

    #[tokio::test]
    async fn repeated_placeholder_resolves_each_occurrence() {
        let (manager, ctx, provider) = setup(&[("token", "t")]);
        let out = Renderable::Interpolate("%(secret:token)s-%(secret:token)s".into())
            .render(&manager, &ctx)
            .await
            .unwrap();
        assert_eq!(out, "t-t");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unterminated_placeholder_is_kept_verbatim() {
        let (manager, ctx, provider) = setup(&[]);
        let out = Renderable::Interpolate("broken %(secret:tail".into())
            .render(&manager, &ctx)
            .await
            .unwrap();
        assert_eq!(out, "broken %(secret:tail");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn template_without_placeholders_passes_through() {
        let (manager, ctx, provider) = setup(&[]);
        let out = Renderable::Interpolate("no secrets here".into())
            .render(&manager, &ctx)
            .await
            .unwrap();
        assert_eq!(out, "no secrets here");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn renderable_serde_round_trip() {
        let renderable = Renderable::Interpolate("x %(secret:a)s".into());
        let json = serde_json::to_string(&renderable).unwrap();
        let back: Renderable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, renderable);
    }
}
