// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the session lifecycle.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::context::Options;
    use crate::dns::{DnsEngine, DnsMode};
    use crate::shadow::connect_labels;
    use crate::testing::test_context;
    use std::collections::BTreeMap;

    async fn shadow(ctx: &Context, name: &str, shared: bool) -> ShadowIdentity {
        ShadowManager::new(ctx)
            .with_ready_timeout(Duration::from_millis(300), Duration::from_millis(20))
            .get_or_create_shadow(name, &connect_labels(), &BTreeMap::new(), &BTreeMap::new(), shared)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_wait_until_without_tunnels_returns_on_interrupt() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _fakes) = test_context(Options::default(), dir.path());
        let mut session = Session::new(&ctx);

        session.wait_until(async {}).await.unwrap();
        session.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_tunnel_ends_wait_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _fakes) = test_context(Options::default(), dir.path());
        let mut session = Session::new(&ctx);

        session.spawn_tunnel(async { Err(anyhow!("connection reset")) });
        let err = session
            .wait_until(std::future::pending::<()>())
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("connection reset"));
        session.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_tunnel_ends_wait_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _fakes) = test_context(Options::default(), dir.path());
        let mut session = Session::new(&ctx);

        session.spawn_tunnel(async { Ok(()) });
        session.wait_until(std::future::pending::<()>()).await.unwrap();
        session.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_stops_tunnels_listening_for_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _fakes) = test_context(Options::default(), dir.path());
        let mut session = Session::new(&ctx);

        let (stopped_tx, stopped_rx) = tokio::sync::oneshot::channel();
        let mut shutdown = session.shutdown_signal();
        session.spawn_tunnel(async move {
            crate::tunnel::shutdown_requested(&mut shutdown).await;
            let _ = stopped_tx.send(());
            Ok(())
        });

        session.cleanup().await.unwrap();
        assert!(stopped_rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_removes_exclusive_shadows_and_keeps_shared() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, fakes) = test_context(Options::default(), dir.path());
        let mut session = Session::new(&ctx);

        let exclusive = shadow(&ctx, "kt-tunnel-shadow-abcde", false).await;
        let shared = shadow(&ctx, "kt-tunnel-shadow-daemon", true).await;
        let exclusive_key = exclusive.private_key_path.clone();
        session.track_shadow(exclusive);
        session.track_shadow(shared);
        assert_eq!(session.shadows().len(), 2);

        session.cleanup().await.unwrap();

        assert_eq!(fakes.cluster.deleted_pods(), vec!["kt-tunnel-shadow-abcde".to_string()]);
        assert_eq!(
            fakes.cluster.deleted_config_maps(),
            vec!["kt-tunnel-shadow-abcde-ssh".to_string()]
        );
        assert!(!exclusive_key.exists());
        assert!(fakes
            .cluster
            .pod_names()
            .contains(&"kt-tunnel-shadow-daemon".to_string()));
    }

    #[tokio::test]
    async fn test_cleanup_restores_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, fakes) = test_context(Options::default(), dir.path());
        let mut session = Session::new(&ctx);

        let dns = DnsEngine::new(&ctx)
            .setup(&DnsMode::PodDns, "10.244.0.9", None)
            .await
            .unwrap();
        session.set_dns(dns);
        assert_eq!(*fakes.resolver.name_servers.lock().unwrap(), vec!["10.244.0.9".to_string()]);

        session.cleanup().await.unwrap();
        assert_eq!(*fakes.resolver.restored.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_abort_start_cleans_up_and_returns_original_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, fakes) = test_context(Options::default(), dir.path());
        let mut session = Session::new(&ctx);
        session.track_shadow(shadow(&ctx, "kt-tunnel-shadow-fghij", false).await);

        let result: Result<()> = abort_start(session, anyhow!("dns setup failed")).await;

        assert_eq!(result.unwrap_err().to_string(), "dns setup failed");
        assert_eq!(fakes.cluster.deleted_pods(), vec!["kt-tunnel-shadow-fghij".to_string()]);
    }
}
