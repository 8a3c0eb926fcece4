//! Build orchestration for bundle dependency packages.
//!
//! One call to [`BuildOrchestrator::build_bundle`] is one build attempt. It
//! walks the [`BuildStage`] state machine, consults the fingerprint cache and
//! only contacts the resolver and the upload endpoint on a cache miss.
//!
//! Locking: one attempt per bundle at a time (policy from [`BuildConfig`]),
//! and one attempt per fingerprint from `CacheCheck` through `Finalizing`.
//! The bundle lock is always taken first.

mod cancel;
mod config;
mod locks;
mod retry;
mod stage;

pub use cancel::CancelHandle;
pub use config::BuildConfig;
pub use locks::{KeyedGuard, KeyedLocks, LockPolicy};
pub use retry::{retry_with_backoff, Retried, RetryConfig};
pub use stage::{BuildAttempt, BuildStage, StageTransition};

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use depbundle_state::{ArtifactCache, ArtifactRef, BuildArtifact, BuildFingerprint, Platform};
use tokio::task::JoinSet;
use tracing::{info, warn, Instrument};

use crate::archive::{self, PackageMetadata};
use crate::cache::FingerprintIndex;
use crate::consolidate::{consolidate, ConsolidatedRequirementSet};
use crate::error::{BuildError, Result};
use crate::fingerprint::fingerprint;
use crate::manifest::{serialize_with_third_party, AddonManifest, BASE_SOURCE};
use crate::obs;
use crate::registry::{AddonRegistry, BundleAddon, Packager};

/// Successful build attempt.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// The `Ready` artifact now assigned to the bundle
    pub artifact: BuildArtifact,
    /// Whether an existing artifact was reused
    pub cache_hit: bool,
    pub fingerprint: BuildFingerprint,
    pub transitions: Vec<StageTransition>,
}

impl BuildOutcome {
    /// Stages visited, starting with `Fetching`.
    pub fn stages(&self) -> Vec<BuildStage> {
        stages_of(&self.transitions)
    }
}

/// Failed build attempt.
#[derive(Debug)]
pub struct BuildFailure {
    pub bundle_name: String,
    pub platform: Platform,
    /// Stage the attempt was in when it failed
    pub stage: BuildStage,
    pub error: BuildError,
    /// The artifact under construction, marked `Failed`
    pub artifact: Option<BuildArtifact>,
    pub transitions: Vec<StageTransition>,
}

impl BuildFailure {
    pub fn stages(&self) -> Vec<BuildStage> {
        stages_of(&self.transitions)
    }
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bundle '{}' ({}) failed during {}: {}",
            self.bundle_name, self.platform, self.stage, self.error
        )
    }
}

impl std::error::Error for BuildFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

fn stages_of(transitions: &[StageTransition]) -> Vec<BuildStage> {
    std::iter::once(BuildStage::Fetching)
        .chain(transitions.iter().map(|t| t.to))
        .collect()
}

fn enter(attempt: &mut BuildAttempt, bundle_name: &str, stage: BuildStage) -> Result<()> {
    attempt.advance(stage)?;
    obs::emit_stage_entered(bundle_name, stage);
    Ok(())
}

/// Drives build attempts against injected collaborators.
pub struct BuildOrchestrator {
    registry: Arc<dyn AddonRegistry>,
    packager: Arc<dyn Packager>,
    index: FingerprintIndex,
    config: BuildConfig,
    bundle_locks: KeyedLocks,
    fingerprint_locks: KeyedLocks,
}

impl BuildOrchestrator {
    pub fn new(
        registry: Arc<dyn AddonRegistry>,
        packager: Arc<dyn Packager>,
        cache: Arc<dyn ArtifactCache>,
        config: BuildConfig,
    ) -> Self {
        Self {
            registry,
            packager,
            index: FingerprintIndex::new(cache),
            config,
            bundle_locks: KeyedLocks::new(),
            fingerprint_locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Build (or reuse) the dependency package of `bundle_name` for `platform`.
    ///
    /// With `force_rebuild` the cache is not consulted, but the new artifact
    /// still replaces the cached record.
    pub async fn build_bundle(
        &self,
        bundle_name: &str,
        platform: Platform,
        force_rebuild: bool,
    ) -> std::result::Result<BuildOutcome, BuildFailure> {
        self.build_bundle_with_cancel(bundle_name, platform, force_rebuild, &CancelHandle::new())
            .await
    }

    /// [`build_bundle`](Self::build_bundle) observing `cancel` at every stage
    /// boundary up to `Uploading`. An upload in progress is never interrupted.
    pub async fn build_bundle_with_cancel(
        &self,
        bundle_name: &str,
        platform: Platform,
        force_rebuild: bool,
        cancel: &CancelHandle,
    ) -> std::result::Result<BuildOutcome, BuildFailure> {
        let span = obs::build_span(bundle_name, platform, force_rebuild);
        self.run_attempt(bundle_name, platform, force_rebuild, cancel)
            .instrument(span)
            .await
    }

    /// Fetch and consolidate a bundle's manifests without building.
    pub async fn consolidate_only(&self, bundle_name: &str) -> Result<ConsolidatedRequirementSet> {
        let (base, addons) = self.fetch_manifests(bundle_name).await?;
        Ok(consolidate(base.as_ref(), &addons)?)
    }

    async fn run_attempt(
        &self,
        bundle_name: &str,
        platform: Platform,
        force_rebuild: bool,
        cancel: &CancelHandle,
    ) -> std::result::Result<BuildOutcome, BuildFailure> {
        let started = Instant::now();
        obs::emit_build_started(bundle_name, platform);

        let mut attempt = BuildAttempt::new();
        if let Err(error) = self.config.validate() {
            return Err(self.fail(bundle_name, platform, attempt, None, error));
        }
        let Some(_bundle_guard) = self
            .bundle_locks
            .acquire(bundle_name, self.config.lock_policy)
            .await
        else {
            let error = BuildError::BuildInProgress {
                bundle: bundle_name.to_string(),
            };
            return Err(self.fail(bundle_name, platform, attempt, None, error));
        };

        let mut artifact = None;
        let result = self
            .execute(
                bundle_name,
                platform,
                force_rebuild,
                cancel,
                &mut attempt,
                &mut artifact,
            )
            .await;

        match result {
            Ok(outcome) => {
                obs::emit_build_finished(
                    bundle_name,
                    platform,
                    &outcome.fingerprint,
                    outcome.cache_hit,
                    started.elapsed().as_millis() as u64,
                );
                Ok(outcome)
            }
            Err(error) => Err(self.fail(bundle_name, platform, attempt, artifact, error)),
        }
    }

    async fn execute(
        &self,
        bundle_name: &str,
        platform: Platform,
        force_rebuild: bool,
        cancel: &CancelHandle,
        attempt: &mut BuildAttempt,
        artifact_slot: &mut Option<BuildArtifact>,
    ) -> Result<BuildOutcome> {
        obs::emit_stage_entered(bundle_name, BuildStage::Fetching);
        cancel.check()?;
        let (base, addons) = self.fetch_manifests(bundle_name).await?;

        cancel.check()?;
        enter(attempt, bundle_name, BuildStage::Consolidating)?;
        let set = consolidate(base.as_ref(), &addons)?;
        let third_party = set.third_party_for(platform)?;
        let manifest_text = serialize_with_third_party(&set, &third_party)?;
        let fingerprint = fingerprint(&set, platform, &third_party)?;

        cancel.check()?;
        enter(attempt, bundle_name, BuildStage::CacheCheck)?;
        let _fingerprint_guard = self
            .fingerprint_locks
            .acquire(fingerprint.as_str(), LockPolicy::Wait)
            .await;

        if !force_rebuild {
            if let Some(hit) = self.index.lookup(&fingerprint, self.registry.as_ref()).await? {
                cancel.check()?;
                enter(attempt, bundle_name, BuildStage::CacheHit)?;
                let location = hit.location.clone().ok_or_else(|| BuildError::CacheInconsistency {
                    fingerprint: fingerprint.to_string(),
                    reason: "ready record has no location".to_string(),
                })?;
                obs::emit_cache_hit(bundle_name, &fingerprint, &location.location);

                enter(attempt, bundle_name, BuildStage::Finalizing)?;
                if !self.config.skip_upload {
                    self.registry
                        .assign_artifact(bundle_name, platform, &location)
                        .await?;
                }
                enter(attempt, bundle_name, BuildStage::Ready)?;
                return Ok(BuildOutcome {
                    artifact: hit,
                    cache_hit: true,
                    fingerprint,
                    transitions: attempt.transitions().to_vec(),
                });
            }
        }

        cancel.check()?;
        enter(attempt, bundle_name, BuildStage::Resolving)?;
        let mut artifact = BuildArtifact::building(fingerprint.clone(), bundle_name, platform);
        *artifact_slot = Some(artifact.clone());
        let environment = self
            .packager
            .resolve_and_package(&manifest_text, platform)
            .await?;

        cancel.check()?;
        enter(attempt, bundle_name, BuildStage::Packaging)?;
        let metadata = PackageMetadata::new(bundle_name, platform, fingerprint.clone(), &set, &third_party);
        let packaged = archive::package(&manifest_text, metadata, &environment)?;
        let local_path = match &self.config.output_dir {
            Some(dir) => Some(archive::store_to_dir(dir, &packaged)?),
            None => None,
        };

        cancel.check()?;
        enter(attempt, bundle_name, BuildStage::Uploading)?;
        let location = if self.config.skip_upload {
            let path = local_path.ok_or_else(|| {
                BuildError::InvalidConfig("skip_upload requires an output directory".to_string())
            })?;
            ArtifactRef {
                filename: packaged.filename.clone(),
                location: path.display().to_string(),
            }
        } else {
            let registry = &self.registry;
            let packaged = &packaged;
            let uploaded = retry_with_backoff(&self.config.upload, "upload", |_| {
                registry.upload_artifact(bundle_name, platform, packaged)
            })
            .await
            .map_err(|(err, attempts)| BuildError::Upload {
                attempts,
                reason: err.to_string(),
            })?;
            info!(
                event = "build.uploaded",
                location = %uploaded.value.location,
                attempts = uploaded.attempts,
                size = packaged.size(),
            );
            uploaded.value
        };

        enter(attempt, bundle_name, BuildStage::Finalizing)?;
        artifact.mark_ready(location.clone(), packaged.checksum.clone(), packaged.size());
        *artifact_slot = Some(artifact.clone());
        if self.config.skip_upload {
            info!(event = "build.kept_local", location = %location.location);
        } else {
            self.index.record(&fingerprint, artifact.clone()).await?;
            self.registry
                .assign_artifact(bundle_name, platform, &location)
                .await?;
        }
        enter(attempt, bundle_name, BuildStage::Ready)?;

        Ok(BuildOutcome {
            artifact,
            cache_hit: false,
            fingerprint,
            transitions: attempt.transitions().to_vec(),
        })
    }

    /// Fetch the bundle's addons and base manifest, then parse every
    /// addon manifest on the blocking pool.
    async fn fetch_manifests(
        &self,
        bundle_name: &str,
    ) -> Result<(Option<AddonManifest>, Vec<AddonManifest>)> {
        let (addons, base_text) = futures::try_join!(
            self.registry.fetch_bundle_addons(bundle_name),
            self.registry.fetch_base_manifest(bundle_name),
        )?;

        let base = base_text
            .map(|text| {
                AddonManifest::parse_base(&text).map_err(|source| BuildError::MalformedManifest {
                    addon: BASE_SOURCE.to_string(),
                    source,
                })
            })
            .transpose()?;

        let mut join_set = JoinSet::new();
        let count = addons.len();
        for (idx, addon) in addons.into_iter().enumerate() {
            join_set.spawn_blocking(move || {
                let parsed = addon
                    .manifest
                    .as_deref()
                    .map(|text| AddonManifest::parse(text, &addon.name));
                (idx, addon, parsed)
            });
        }

        let mut ordered: Vec<Option<(BundleAddon, _)>> = (0..count).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            let (idx, addon, parsed) =
                joined.map_err(|e| BuildError::Worker(format!("manifest parse task: {e}")))?;
            ordered[idx] = Some((addon, parsed));
        }

        let mut manifests = Vec::with_capacity(count);
        for (addon, parsed) in ordered.into_iter().flatten() {
            match parsed {
                None => {}
                Some(Ok(manifest)) => manifests.push(manifest),
                Some(Err(source)) if addon.required => {
                    return Err(BuildError::MalformedManifest {
                        addon: addon.name,
                        source,
                    });
                }
                Some(Err(err)) => {
                    warn!(
                        event = "manifest.skipped",
                        addon = %addon.name,
                        version = %addon.version,
                        error = %err,
                        "skipping addon with malformed manifest"
                    );
                }
            }
        }
        Ok((base, manifests))
    }

    fn fail(
        &self,
        bundle_name: &str,
        platform: Platform,
        mut attempt: BuildAttempt,
        artifact: Option<BuildArtifact>,
        error: BuildError,
    ) -> BuildFailure {
        let stage = attempt.stage();
        if let Err(err) = attempt.advance(BuildStage::Failed) {
            warn!(error = %err, "could not record failure transition");
        }
        obs::emit_build_failed(bundle_name, platform, stage, &error);
        BuildFailure {
            bundle_name: bundle_name.to_string(),
            platform,
            stage,
            error,
            artifact: artifact.map(|mut a| {
                a.mark_failed();
                a
            }),
            transitions: attempt.transitions().to_vec(),
        }
    }
}
