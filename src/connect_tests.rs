// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for connect.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::cluster::mock::service;
    use crate::cluster::ClusterApi;
    use crate::context::{ConnectOptions, Options};
    use crate::dns::DnsMode;
    use crate::testing::{test_context, test_context_with_resolver, FakeResolver};
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use std::time::Duration;

    fn connect_options(dns_mode: DnsMode, shared_shadow: bool) -> Options {
        Options {
            connect: ConnectOptions {
                dns_mode,
                shared_shadow,
                socks_port: 2223,
                ..ConnectOptions::default()
            },
            ..Options::default()
        }
    }

    #[tokio::test]
    async fn test_connect_starts_proxy_and_dumps_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, fakes) = test_context(connect_options(DnsMode::default(), false), dir.path());
        fakes.cluster.add_service(service(
            "orders",
            "default",
            Some("10.96.0.20"),
            &[],
            &[(80, IntOrString::Int(8080))],
        ));

        let session = connect(&ctx).await.unwrap();

        let [identity] = session.shadows() else {
            panic!("expected one shadow");
        };
        assert!(identity.name.starts_with("kt-tunnel-shadow-"));
        assert!(!identity.shared);

        let dumps = fakes.resolver.dumps.lock().unwrap().clone();
        assert_eq!(dumps.len(), 1);
        assert_eq!(dumps[0].get("orders").map(String::as_str), Some("10.96.0.20"));

        for _ in 0..50 {
            if !fakes.channel.socks.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            *fakes.channel.socks.lock().unwrap(),
            vec![(identity.ssh_address(), "127.0.0.1:2223".to_string())]
        );

        session.cleanup().await.unwrap();
        assert_eq!(fakes.cluster.deleted_pods().len(), 1);
        assert_eq!(*fakes.resolver.restored.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_connect_passes_local_domains_to_shadow() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = connect_options(DnsMode::PodDns, false);
        let resolver = FakeResolver {
            domains: Some("corp.example.com".to_string()),
            ..FakeResolver::default()
        };
        let (ctx, fakes) = test_context_with_resolver(&mut options, dir.path(), resolver);

        let session = connect(&ctx).await.unwrap();

        let name = session.shadows()[0].name.clone();
        let pod = fakes
            .cluster
            .get_pod(&name, "default")
            .await
            .unwrap()
            .unwrap();
        let env = pod.spec.unwrap().containers[0].env.clone().unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == "KT_LOCAL_DOMAINS" && e.value.as_deref() == Some("corp.example.com")));
        assert_eq!(
            *fakes.resolver.name_servers.lock().unwrap(),
            vec![session.shadows()[0].pod_ip.clone()]
        );

        session.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_shared_shadow_survives_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, fakes) = test_context(connect_options(DnsMode::PodDns, true), dir.path());

        let session = connect(&ctx).await.unwrap();
        assert_eq!(session.shadows()[0].name, "kt-tunnel-shadow-daemon");

        session.cleanup().await.unwrap();
        assert!(fakes.cluster.deleted_pods().is_empty());
        assert_eq!(fakes.cluster.pod_names(), vec!["kt-tunnel-shadow-daemon".to_string()]);
    }

    #[tokio::test]
    async fn test_dns_failure_removes_shadow() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, fakes) = test_context(connect_options(DnsMode::default(), false), dir.path());
        fakes.cluster.set_fail_list_services(true);

        let err = connect(&ctx).await.unwrap_err();

        assert!(format!("{err:#}").contains("Failed to apply DNS mode hosts"));
        assert_eq!(fakes.cluster.deleted_pods().len(), 1);
        assert!(fakes.cluster.pod_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_shadow_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, fakes) = test_context(connect_options(DnsMode::default(), false), dir.path());
        fakes.cluster.set_never_ready();

        let Err(err) = connect(&ctx).await else {
            panic!("connect should fail while the shadow is pending");
        };

        assert!(format!("{err:#}").contains("not ready"));
        assert!(fakes.cluster.pod_names().is_empty());
        assert_eq!(fakes.cluster.deleted_pods().len(), 1);
        assert_eq!(fakes.cluster.deleted_config_maps().len(), 1);
        assert!(fakes.resolver.dumps.lock().unwrap().is_empty());
    }
}
