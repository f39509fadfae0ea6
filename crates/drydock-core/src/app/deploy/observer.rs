//! Observed-state pull - 実コンテナの状態をストレージへ書き戻す
//!
//! # 2 つの経路
//! - 単一アプリの再取得（コンテナイベント駆動）
//! - 定期フルスキャン（このレプリカの担当アプリだけ）
//!
//! 両者は同じ行を read-modify-write するため、1 つの Mutex で直列化する。
//! フルスキャンが古いデータで新しい単一更新を上書きしないため。
//!
//! 問い合わせに失敗したアプリは書き込まない（Missing と決めつけない）。

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::app::context::CoreContext;
use crate::domain::{AppId, DeployType, ErrorKind, Observation, ObservedState, Result};
use crate::ports::{ApplicationCondition, ApplicationUpdate};

/// Re-fetch one application's container and store what was observed.
pub async fn refresh_app(ctx: &CoreContext, scan_lock: &Mutex<()>, app_id: AppId) -> Result<()> {
    let _guard = scan_lock.lock().await;

    let observation = Observation::from_lookup(ctx.backend.get_container(app_id).await);
    let Some(state) = observation.to_state() else {
        if let Observation::Unavailable(e) = observation {
            tracing::warn!(app_id = %app_id, error = %e, "container lookup failed, keeping stored state");
            return Err(e);
        }
        return Ok(());
    };

    let update = ApplicationUpdate {
        container: Some(state.clone()),
        ..ApplicationUpdate::default()
    };
    match ctx.apps.update_application(app_id, update).await {
        Ok(_) => {
            tracing::debug!(app_id = %app_id, state = %state.state, "container state refreshed");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::DataInconsistency => {
            tracing::warn!(app_id = %app_id, error = %e, "container event for unknown application");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(app_id = %app_id, error = %e, "failed to store container state");
            Err(e)
        }
    }
}

/// Full reconciliation of the applications assigned to this replica.
///
/// Returns the number of applications written.
pub async fn full_scan(ctx: &CoreContext, scan_lock: &Mutex<()>) -> Result<usize> {
    let _guard = scan_lock.lock().await;

    let apps = ctx
        .apps
        .get_applications(
            &ApplicationCondition::all()
                .running(true)
                .deploy_type(DeployType::Runtime),
        )
        .await?;
    let assigned: Vec<AppId> = apps
        .iter()
        .map(|a| a.id)
        .filter(|id| ctx.cluster.assigned(&id.to_string()))
        .collect();
    if assigned.is_empty() {
        tracing::debug!(running = apps.len(), "no applications assigned to this replica");
        return Ok(0);
    }

    let containers: HashMap<AppId, ObservedState> = ctx
        .backend
        .list_containers()
        .await?
        .iter()
        .map(|c| (c.app_id, ObservedState::from(c)))
        .collect();

    let mut states = HashMap::with_capacity(assigned.len());
    let mut skipped = 0usize;
    for app_id in assigned {
        if let Some(state) = containers.get(&app_id) {
            states.insert(app_id, state.clone());
            continue;
        }
        // 一覧に無いものは個別に確かめる。失敗したアプリだけを飛ばす
        let observation = Observation::from_lookup(ctx.backend.get_container(app_id).await);
        match observation.to_state() {
            Some(state) => {
                states.insert(app_id, state);
            }
            None => {
                if let Observation::Unavailable(e) = &observation {
                    tracing::warn!(app_id = %app_id, error = %e, "container lookup failed, skipping");
                }
                skipped += 1;
            }
        }
    }

    let written = states.len();
    if written > 0 {
        ctx.apps.bulk_update_state(states).await?;
    }
    tracing::debug!(written, skipped, "container full scan finished");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::Harness;
    use crate::domain::{ClusterTarget, ContainerState};
    use crate::ports::ApplicationRepository;

    #[tokio::test]
    async fn refresh_writes_the_observed_state() {
        let h = Harness::new();
        let lock = Mutex::new(());
        let app = h.runtime_app("web", Some("c1")).await;
        h.backend.set_container_state(app, ContainerState::Exited, "exit 1");

        refresh_app(&h.ctx, &lock, app).await.unwrap();
        let stored = h.store.application(app).await.unwrap();
        assert_eq!(stored.container, ContainerState::Exited);
        assert_eq!(stored.container_message, "exit 1");
    }

    #[tokio::test]
    async fn refresh_records_absence_as_missing() {
        let h = Harness::new();
        let lock = Mutex::new(());
        let app = h.runtime_app("web", Some("c1")).await;
        h.backend.set_container_state(app, ContainerState::Running, "");
        refresh_app(&h.ctx, &lock, app).await.unwrap();
        assert_eq!(h.store.application(app).await.unwrap().container, ContainerState::Running);

        h.backend.remove_container(app);
        refresh_app(&h.ctx, &lock, app).await.unwrap();
        assert_eq!(h.store.application(app).await.unwrap().container, ContainerState::Missing);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_the_stored_state() {
        let h = Harness::new();
        let lock = Mutex::new(());
        let app = h.runtime_app("web", Some("c1")).await;
        h.backend.set_container_state(app, ContainerState::Running, "");
        refresh_app(&h.ctx, &lock, app).await.unwrap();

        h.backend.fail_lookup(app, true);
        assert!(refresh_app(&h.ctx, &lock, app).await.is_err());
        assert_eq!(h.store.application(app).await.unwrap().container, ContainerState::Running);
    }

    #[tokio::test]
    async fn refresh_for_unknown_application_is_ignored() {
        let h = Harness::new();
        let lock = Mutex::new(());
        let ghost = h.ids().generate_app_id();
        h.backend.set_container_state(ghost, ContainerState::Running, "");
        refresh_app(&h.ctx, &lock, ghost).await.unwrap();
    }

    #[tokio::test]
    async fn full_scan_synthesizes_missing_and_writes_once() {
        let h = Harness::new();
        let lock = Mutex::new(());
        let up = h.runtime_app("up", Some("c1")).await;
        let gone = h.runtime_app("gone", Some("c1")).await;
        h.backend.set_container_state(up, ContainerState::Running, "ok");
        h.store
            .update_application(
                gone,
                ApplicationUpdate {
                    container: Some(ObservedState {
                        state: ContainerState::Running,
                        message: String::new(),
                    }),
                    ..ApplicationUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(full_scan(&h.ctx, &lock).await.unwrap(), 2);
        assert_eq!(h.store.bulk_writes(), 1);
        assert_eq!(h.store.application(up).await.unwrap().container, ContainerState::Running);
        assert_eq!(h.store.application(gone).await.unwrap().container, ContainerState::Missing);
    }

    #[tokio::test]
    async fn one_failed_lookup_does_not_abort_the_batch() {
        let h = Harness::new();
        let lock = Mutex::new(());
        let flaky = h.runtime_app("flaky", Some("c1")).await;
        let absent = h.runtime_app("absent", Some("c1")).await;
        h.store
            .bulk_update_state(HashMap::from([
                (flaky, ObservedState { state: ContainerState::Running, message: String::new() }),
                (absent, ObservedState { state: ContainerState::Running, message: String::new() }),
            ]))
            .await
            .unwrap();
        h.backend.fail_lookup(flaky, true);

        assert_eq!(full_scan(&h.ctx, &lock).await.unwrap(), 1);
        assert_eq!(h.store.application(flaky).await.unwrap().container, ContainerState::Running);
        assert_eq!(h.store.application(absent).await.unwrap().container, ContainerState::Missing);
    }

    #[tokio::test]
    async fn listing_failure_aborts_without_writing() {
        let h = Harness::new();
        let lock = Mutex::new(());
        h.runtime_app("web", Some("c1")).await;
        h.backend.set_unavailable(true);

        assert!(full_scan(&h.ctx, &lock).await.unwrap_err().is_transient());
        assert_eq!(h.store.bulk_writes(), 0);
    }

    #[tokio::test]
    async fn full_scan_only_covers_assigned_apps() {
        let h = Harness::unjoined();
        let lock = Mutex::new(());
        let mut apps = Vec::new();
        for i in 0..20 {
            apps.push(h.runtime_app(&format!("app-{i}"), Some("c1")).await);
        }

        // メンバーシップ未確定の間は何も担当しない
        assert_eq!(full_scan(&h.ctx, &lock).await.unwrap(), 0);

        let peers = vec![
            ClusterTarget::this("10.0.0.1"),
            ClusterTarget::new("10.0.0.2"),
            ClusterTarget::new("10.0.0.3"),
        ];
        h.cluster.apply(peers).unwrap();
        let mine = apps
            .iter()
            .filter(|id| h.cluster.assigned(&id.to_string()))
            .count();

        assert_eq!(full_scan(&h.ctx, &lock).await.unwrap(), mine);
    }
}
