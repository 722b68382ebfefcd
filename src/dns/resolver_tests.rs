// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `resolver.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    const RESOLV: &str = "# generated\nsearch corp.example.com lab.example.com\nnameserver 192.168.1.1\nnameserver 8.8.8.8\noptions ndots:2\n";

    fn table(pairs: &[(&str, &str)]) -> HostTable {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    struct Files {
        dir: tempfile::TempDir,
    }

    impl Files {
        fn new(hosts: &str, resolv: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("hosts"), hosts).unwrap();
            std::fs::write(dir.path().join("resolv.conf"), resolv).unwrap();
            Self { dir }
        }

        fn resolver(&self, per_domain: bool) -> SystemResolver {
            SystemResolver::with_paths(
                "cluster.local",
                self.dir.path().join("hosts"),
                self.dir.path().join("resolv.conf"),
                self.dir.path().join("resolver"),
                per_domain,
            )
        }

        fn read(&self, name: &str) -> String {
            std::fs::read_to_string(self.dir.path().join(name)).unwrap()
        }
    }

    #[test]
    fn test_render_hosts_block() {
        let block = render_hosts_block(&table(&[("web", "10.0.0.1"), ("db", "10.0.0.2")]));
        assert_eq!(
            block,
            "# kt-tunnel hosts begin\n10.0.0.2 db\n10.0.0.1 web\n# kt-tunnel hosts end\n"
        );
    }

    #[test]
    fn test_merge_replaces_previous_block() {
        let original = "127.0.0.1 localhost\n";
        let first = merge_hosts(original, &table(&[("web", "10.0.0.1")]));
        let second = merge_hosts(&first, &table(&[("api", "10.0.0.3")]));

        assert!(second.starts_with("127.0.0.1 localhost\n"));
        assert!(second.contains("10.0.0.3 api"));
        assert!(!second.contains("10.0.0.1 web"));
        assert_eq!(strip_hosts_block(&second), original);
    }

    #[test]
    fn test_merge_with_empty_table_removes_block() {
        let with_block = merge_hosts("127.0.0.1 localhost\n", &table(&[("web", "10.0.0.1")]));
        assert_eq!(merge_hosts(&with_block, &HostTable::new()), "127.0.0.1 localhost\n");
    }

    #[test]
    fn test_parse_resolv_conf() {
        assert_eq!(parse_name_servers(RESOLV), vec!["192.168.1.1", "8.8.8.8"]);
        assert_eq!(
            parse_search_domains(RESOLV),
            vec!["corp.example.com", "lab.example.com"]
        );
    }

    #[test]
    fn test_override_and_restore_resolv_conf() {
        let overridden = override_resolv_conf(RESOLV, "10.244.0.5");

        assert!(overridden.starts_with("nameserver 10.244.0.5 # kt-tunnel\n"));
        assert!(overridden.contains("#kt-tunnel# nameserver 192.168.1.1"));
        assert!(parse_name_servers(&overridden).is_empty());
        assert_eq!(restore_resolv_conf(&overridden), RESOLV);

        let twice = override_resolv_conf(&overridden, "10.244.0.6");
        assert_eq!(twice.matches("# kt-tunnel").count(), 1);
        assert_eq!(restore_resolv_conf(&twice), RESOLV);
    }

    #[test]
    fn test_system_resolver_hosts_round_trip() {
        let files = Files::new("127.0.0.1 localhost\n", RESOLV);
        let resolver = files.resolver(false);

        resolver.dump_hosts(&table(&[("web", "10.0.0.1")])).unwrap();
        assert!(files.read("hosts").contains("10.0.0.1 web"));

        resolver.restore().unwrap();
        assert_eq!(files.read("hosts"), "127.0.0.1 localhost\n");
        assert_eq!(files.read("resolv.conf"), RESOLV);
    }

    #[test]
    fn test_system_resolver_name_server_round_trip() {
        let files = Files::new("", RESOLV);
        let resolver = files.resolver(false);

        assert_eq!(resolver.upstream_name_server().as_deref(), Some("192.168.1.1:53"));
        assert_eq!(
            resolver.local_domains().as_deref(),
            Some("corp.example.com,lab.example.com")
        );

        resolver.set_name_server("10.244.0.5").unwrap();
        assert!(files.read("resolv.conf").starts_with("nameserver 10.244.0.5"));

        resolver.restore().unwrap();
        assert_eq!(files.read("resolv.conf"), RESOLV);
    }

    #[test]
    fn test_resolv_conf_rejects_non_standard_port() {
        let files = Files::new("", RESOLV);
        let resolver = files.resolver(false);

        let err = resolver.set_name_server("127.0.0.1:10053").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Unsupported);
        assert_eq!(files.read("resolv.conf"), RESOLV);

        resolver.set_name_server("127.0.0.1:53").unwrap();
        assert!(files.read("resolv.conf").starts_with("nameserver 127.0.0.1 "));
    }

    #[test]
    fn test_per_domain_resolver_file() {
        let files = Files::new("", RESOLV);
        let resolver = files.resolver(true);

        resolver.set_name_server("127.0.0.1:10053").unwrap();
        let written = files.read("resolver/cluster.local");
        assert!(written.contains("nameserver 127.0.0.1"));
        assert!(written.contains("port 10053"));
        assert_eq!(files.read("resolv.conf"), RESOLV);

        resolver.restore().unwrap();
        assert!(!files.dir.path().join("resolver/cluster.local").exists());
    }

    #[test]
    fn test_missing_hosts_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = SystemResolver::with_paths(
            "cluster.local",
            dir.path().join("hosts"),
            dir.path().join("resolv.conf"),
            dir.path().join("resolver"),
            false,
        );

        resolver.dump_hosts(&table(&[("web", "10.0.0.1")])).unwrap();
        assert!(std::fs::read_to_string(dir.path().join("hosts"))
            .unwrap()
            .contains("10.0.0.1 web"));
        assert_eq!(resolver.upstream_name_server(), None);
        assert_eq!(resolver.local_domains(), None);
    }
}
