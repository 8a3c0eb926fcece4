//! Structured events for the build lifecycle.
//!
//! Every event carries an `event` field (`build.started`, `build.stage`,
//! `build.cache_hit`, `build.finished`, `build.failed`) plus the bundle and
//! platform, so log pipelines can follow one attempt end to end.

use depbundle_state::{BuildFingerprint, Platform};
use tracing::{info, warn, Span};

use crate::orchestrator::BuildStage;

/// Span covering one build attempt.
pub fn build_span(bundle_name: &str, platform: Platform, force_rebuild: bool) -> Span {
    tracing::info_span!(
        "depbundle.build",
        bundle = %bundle_name,
        platform = %platform,
        force_rebuild = force_rebuild,
    )
}

pub fn emit_build_started(bundle_name: &str, platform: Platform) {
    info!(event = "build.started", bundle = %bundle_name, platform = %platform);
}

pub fn emit_stage_entered(bundle_name: &str, stage: BuildStage) {
    info!(event = "build.stage", bundle = %bundle_name, stage = %stage);
}

/// An existing artifact satisfied the build.
pub fn emit_cache_hit(bundle_name: &str, fingerprint: &BuildFingerprint, location: &str) {
    info!(
        event = "build.cache_hit",
        bundle = %bundle_name,
        fingerprint = %fingerprint.short(),
        location = %location,
    );
}

pub fn emit_build_finished(
    bundle_name: &str,
    platform: Platform,
    fingerprint: &BuildFingerprint,
    cache_hit: bool,
    duration_ms: u64,
) {
    info!(
        event = "build.finished",
        bundle = %bundle_name,
        platform = %platform,
        fingerprint = %fingerprint.short(),
        cache_hit = cache_hit,
        duration_ms = duration_ms,
    );
}

pub fn emit_build_failed(
    bundle_name: &str,
    platform: Platform,
    stage: BuildStage,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "build.failed",
        bundle = %bundle_name,
        platform = %platform,
        stage = %stage,
        error = %error,
    );
}
