//! Desired-state push.
//!
//! Every replica may run it; the backend converges idempotently and the
//! owning Coalescer keeps at most one call in flight.

use std::collections::HashMap;

use crate::app::context::CoreContext;
use crate::domain::{BuildStatus, DeployType, DesiredState, Result, RuntimeTarget, StaticSite};
use crate::ports::{ApplicationCondition, BuildCondition};

/// Compute the desired state from storage.
///
/// Identical storage contents yield an identical (sorted) value.
pub async fn desired_state(ctx: &CoreContext) -> Result<DesiredState> {
    let runtime_apps = ctx
        .apps
        .get_applications(
            &ApplicationCondition::all()
                .running(true)
                .deploy_type(DeployType::Runtime)
                .has_current_build(true),
        )
        .await?;
    let app_ids: Vec<_> = runtime_apps.iter().map(|a| a.id).collect();
    let mut envs = if app_ids.is_empty() {
        HashMap::new()
    } else {
        ctx.envs.get_environments(&app_ids).await?
    };

    let current: Vec<_> = runtime_apps.iter().filter_map(|a| a.current_build).collect();
    // イメージタグはビルド元の commit。build id も目標に含める（config hash だけの再ビルド）
    let commits: HashMap<_, _> = if current.is_empty() {
        HashMap::new()
    } else {
        ctx.builds
            .get_builds(&BuildCondition::ids(current))
            .await?
            .into_iter()
            .map(|build| (build.id, build.commit))
            .collect()
    };

    let runtime: Vec<RuntimeTarget> = runtime_apps
        .into_iter()
        .filter_map(|app| {
            let build_id = app.current_build?;
            let Some(commit) = commits.get(&build_id) else {
                tracing::warn!(app_id = %app.id, build_id = %build_id, "current build not found");
                return None;
            };
            Some(RuntimeTarget {
                app_id: app.id,
                build_id,
                image_name: ctx.config.image_name(app.id),
                image_tag: commit.as_str().to_string(),
                envs: envs.remove(&app.id).unwrap_or_default(),
            })
        })
        .collect();

    let static_apps = ctx
        .apps
        .get_applications(
            &ApplicationCondition::all()
                .running(true)
                .deploy_type(DeployType::Static)
                .has_current_build(true),
        )
        .await?;
    let current: Vec<_> = static_apps.iter().filter_map(|a| a.current_build).collect();
    let static_sites: Vec<StaticSite> = if current.is_empty() {
        Vec::new()
    } else {
        ctx.builds
            .get_builds(&BuildCondition::ids(current).status(BuildStatus::Succeeded))
            .await?
            .into_iter()
            .filter_map(|build| match build.artifact {
                Some(artifact) => Some(StaticSite {
                    app_id: build.app_id,
                    build_id: build.id,
                    artifact,
                }),
                None => {
                    tracing::warn!(app_id = %build.app_id, build_id = %build.id, "succeeded static build has no artifact");
                    None
                }
            })
            .collect()
    };

    Ok(DesiredState::new(runtime, static_sites))
}

/// Push the desired state to the backend, then ask static hosting to reload.
pub async fn synchronize(ctx: &CoreContext) -> Result<()> {
    let desired = desired_state(ctx).await?;
    ctx.backend.synchronize(&desired).await?;
    ctx.broadcaster.notify_reload();
    tracing::debug!(
        runtime = desired.runtime.len(),
        static_sites = desired.static_sites.len(),
        "desired state synchronized"
    );
    Ok(())
}
