//! Version-range resolution.
//!
//! Resolves a range requirement against the union of cache-resident and
//! remote-known references for a name. Selection order: highest version
//! satisfying the range first; on an exact version tie, a cache-resident
//! candidate beats a remote-only one (reuse over fetch); within the same
//! version and residency, the highest revision wins. A strictly newer
//! remote version always beats an older cached one.

use tracing::debug;

use keel_schema::RecipeReference;

use crate::cache::CacheLayout;
use crate::error::{CoreError, ResolutionError};
use crate::remote::RemoteSet;

/// Resolves version ranges to concrete references.
#[derive(Debug)]
pub struct RangeResolver<'a> {
    cache: &'a CacheLayout,
}

struct Candidate {
    reference: RecipeReference,
    cached: bool,
}

impl<'a> RangeResolver<'a> {
    /// Create a resolver reading candidates from `cache`.
    pub fn new(cache: &'a CacheLayout) -> Self {
        Self { cache }
    }

    /// Resolve `name` in `user/channel` against `range`.
    ///
    /// Remote candidates are considered only when `allow_remotes` is set;
    /// build-mode exclusion passes `false` so a reference being produced
    /// locally can never be satisfied from a remote.
    pub async fn resolve(
        &self,
        name: &str,
        range: &str,
        user: &str,
        channel: &str,
        remotes: &RemoteSet,
        allow_remotes: bool,
    ) -> Result<RecipeReference, CoreError> {
        let mut candidates: Vec<Candidate> = Vec::new();

        for reference in self.cache.cached_versions(name)? {
            if reference.user == user
                && reference.channel == channel
                && reference.version.satisfies(range)
            {
                candidates.push(Candidate {
                    reference,
                    cached: true,
                });
            }
        }

        if allow_remotes {
            for remote in remotes.iter() {
                for reference in remote.search(name).await? {
                    if reference.user == user
                        && reference.channel == channel
                        && reference.version.satisfies(range)
                    {
                        // Same (version, revision) already cached: the cache
                        // candidate stands, keeping the residency bias.
                        let duplicate = candidates
                            .iter()
                            .any(|c| c.reference == reference && c.cached);
                        if !duplicate {
                            candidates.push(Candidate {
                                reference,
                                cached: false,
                            });
                        }
                    }
                }
            }
        }

        if candidates.is_empty() {
            return Err(ResolutionError::NoMatchingVersion {
                name: name.to_string(),
                range: range.to_string(),
            }
            .into());
        }

        candidates.sort_by(|a, b| {
            b.reference
                .version
                .cmp(&a.reference.version)
                .then_with(|| b.cached.cmp(&a.cached))
                .then_with(|| b.reference.revision.cmp(&a.reference.revision))
        });

        let best = candidates.remove(0);
        debug!(
            name,
            range,
            resolved = %best.reference,
            cached = best.cached,
            "range resolved"
        );
        Ok(best.reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keel_schema::{Blake3Hash, FileTreeManifest, PackageReference};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct SearchOnlyRemote {
        refs: Vec<RecipeReference>,
    }

    #[async_trait]
    impl crate::remote::Remote for SearchOnlyRemote {
        fn name(&self) -> &str {
            "search-only"
        }

        async fn search(&self, name: &str) -> Result<Vec<RecipeReference>, CoreError> {
            Ok(self
                .refs
                .iter()
                .filter(|r| r.name == name)
                .cloned()
                .collect())
        }

        async fn get_recipe(
            &self,
            reference: &RecipeReference,
        ) -> Result<(Vec<crate::remote::RemoteFile>, FileTreeManifest), CoreError> {
            Err(CoreError::remote("search-only", format!("no recipe {reference}")))
        }

        async fn recipe_manifest(
            &self,
            _reference: &RecipeReference,
        ) -> Result<Option<FileTreeManifest>, CoreError> {
            Ok(None)
        }

        async fn package_manifest(
            &self,
            _reference: &PackageReference,
        ) -> Result<Option<FileTreeManifest>, CoreError> {
            Ok(None)
        }

        async fn get_package(
            &self,
            reference: &PackageReference,
        ) -> Result<(Vec<crate::remote::RemoteFile>, FileTreeManifest), CoreError> {
            Err(CoreError::remote("search-only", format!("no package {reference}")))
        }

        async fn upload_package(
            &self,
            _reference: &PackageReference,
            _files: Vec<crate::remote::RemoteFile>,
            _manifest: FileTreeManifest,
        ) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn remotes_with(refs: Vec<RecipeReference>) -> RemoteSet {
        let mut set = RemoteSet::new();
        set.add(Arc::new(SearchOnlyRemote { refs }));
        set
    }

    fn export(cache: &CacheLayout, name: &str, version: &str) {
        cache
            .export_recipe(
                &RecipeReference::new(name, version, "core", "stable"),
                &[("recipe.toml".to_string(), format!("{name} {version}").into_bytes())],
            )
            .unwrap();
    }

    #[tokio::test]
    async fn highest_satisfying_version_wins() {
        let tmp = tempdir().unwrap();
        let cache = CacheLayout::new(tmp.path()).unwrap();
        export(&cache, "zlib", "1.2.0");
        export(&cache, "zlib", "1.4.0");
        export(&cache, "zlib", "2.0.0");

        let resolver = RangeResolver::new(&cache);
        let resolved = resolver
            .resolve("zlib", ">=1.0, <2.0", "core", "stable", &RemoteSet::new(), true)
            .await
            .unwrap();
        assert_eq!(resolved.version, "1.4.0");
    }

    #[tokio::test]
    async fn newer_remote_version_beats_older_cached() {
        let tmp = tempdir().unwrap();
        let cache = CacheLayout::new(tmp.path()).unwrap();
        export(&cache, "zlib", "1.2.0");
        let remotes = remotes_with(vec![RecipeReference::new("zlib", "1.5.0", "core", "stable")]);

        let resolver = RangeResolver::new(&cache);
        let resolved = resolver
            .resolve("zlib", ">=1.0, <2.0", "core", "stable", &remotes, true)
            .await
            .unwrap();
        assert_eq!(resolved.version, "1.5.0");
    }

    #[tokio::test]
    async fn cache_wins_version_ties() {
        let tmp = tempdir().unwrap();
        let cache = CacheLayout::new(tmp.path()).unwrap();
        export(&cache, "zlib", "1.5.0");
        // Remote offers the same version under a different revision.
        let remote_ref = RecipeReference::new("zlib", "1.5.0", "core", "stable")
            .with_revision(Blake3Hash::compute(b"remote revision"));
        let remotes = remotes_with(vec![remote_ref]);

        let resolver = RangeResolver::new(&cache);
        let resolved = resolver
            .resolve("zlib", ">=1.0", "core", "stable", &remotes, true)
            .await
            .unwrap();
        let cached_rev = cache
            .metadata(&RecipeReference::new("zlib", "1.5.0", "core", "stable"))
            .unwrap()
            .recipe_revision;
        assert_eq!(resolved.revision, cached_rev);
    }

    #[tokio::test]
    async fn build_mode_exclusion_ignores_remotes() {
        let tmp = tempdir().unwrap();
        let cache = CacheLayout::new(tmp.path()).unwrap();
        let remotes = remotes_with(vec![RecipeReference::new("zlib", "1.5.0", "core", "stable")]);

        let resolver = RangeResolver::new(&cache);
        let err = resolver
            .resolve("zlib", ">=1.0", "core", "stable", &remotes, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Resolution(ResolutionError::NoMatchingVersion { .. })
        ));
    }

    #[tokio::test]
    async fn channel_mismatch_is_filtered() {
        let tmp = tempdir().unwrap();
        let cache = CacheLayout::new(tmp.path()).unwrap();
        export(&cache, "zlib", "1.5.0");

        let resolver = RangeResolver::new(&cache);
        let err = resolver
            .resolve("zlib", ">=1.0", "core", "testing", &RemoteSet::new(), true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Resolution(ResolutionError::NoMatchingVersion { .. })
        ));
    }
}
