// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Local resolver overrides.
//!
//! [`SystemResolver`] edits the platform's resolver files:
//!
//! - the hosts file gets a marked block, replaced as a whole on every dump
//! - on macOS a per-domain file under `/etc/resolver` routes the cluster domain
//! - elsewhere `resolv.conf` gets a leading `nameserver` line and the previous ones
//!   are commented out
//!
//! Every file is rewritten through a temporary file and a rename so readers never
//! see a partial write. [`ResolverOverride::restore`] undoes both changes.

use super::hosts::HostTable;
use crate::constants::DNS_PORT;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const HOSTS_BEGIN: &str = "# kt-tunnel hosts begin";
const HOSTS_END: &str = "# kt-tunnel hosts end";
const RESOLV_MARKER: &str = "# kt-tunnel";
const RESOLV_DISABLED_PREFIX: &str = "#kt-tunnel# ";

#[cfg(windows)]
const HOSTS_PATH: &str = r"C:\Windows\System32\drivers\etc\hosts";
#[cfg(not(windows))]
const HOSTS_PATH: &str = "/etc/hosts";
const RESOLV_CONF_PATH: &str = "/etc/resolv.conf";
const MACOS_RESOLVER_DIR: &str = "/etc/resolver";

/// Changes to the local machine's name resolution.
pub trait ResolverOverride: Send + Sync {
    /// Replace the managed hosts-file block with `hosts`.
    fn dump_hosts(&self, hosts: &HostTable) -> io::Result<()>;

    /// Route lookups to the resolver at `address` (`ip` or `ip:port`).
    ///
    /// Fails with [`io::ErrorKind::Unsupported`] when the platform cannot address a
    /// resolver on a non-standard port.
    fn set_name_server(&self, address: &str) -> io::Result<()>;

    /// Local search domains, comma separated.
    fn local_domains(&self) -> Option<String>;

    /// The resolver in use before any override, as `ip:port`.
    fn upstream_name_server(&self) -> Option<String>;

    /// Remove every change made by this override.
    fn restore(&self) -> io::Result<()>;
}

/// [`ResolverOverride`] over the platform resolver files.
pub struct SystemResolver {
    hosts_path: PathBuf,
    resolv_conf_path: PathBuf,
    resolver_dir: PathBuf,
    cluster_domain: String,
    per_domain: bool,
}

impl SystemResolver {
    /// Resolver for the running platform.
    #[must_use]
    pub fn new(cluster_domain: &str) -> Self {
        Self::with_paths(
            cluster_domain,
            HOSTS_PATH,
            RESOLV_CONF_PATH,
            MACOS_RESOLVER_DIR,
            cfg!(target_os = "macos"),
        )
    }

    /// Resolver over explicit file locations.
    ///
    /// With `per_domain` set, name servers are installed as a file named after the
    /// cluster domain inside `resolver_dir` instead of editing `resolv_conf_path`.
    #[must_use]
    pub fn with_paths(
        cluster_domain: &str,
        hosts_path: impl Into<PathBuf>,
        resolv_conf_path: impl Into<PathBuf>,
        resolver_dir: impl Into<PathBuf>,
        per_domain: bool,
    ) -> Self {
        Self {
            hosts_path: hosts_path.into(),
            resolv_conf_path: resolv_conf_path.into(),
            resolver_dir: resolver_dir.into(),
            cluster_domain: cluster_domain.to_string(),
            per_domain,
        }
    }

    fn domain_resolver_path(&self) -> PathBuf {
        self.resolver_dir.join(&self.cluster_domain)
    }

    fn read_resolv_conf(&self) -> String {
        fs::read_to_string(&self.resolv_conf_path).unwrap_or_default()
    }
}

impl ResolverOverride for SystemResolver {
    fn dump_hosts(&self, hosts: &HostTable) -> io::Result<()> {
        let current = read_or_empty(&self.hosts_path)?;
        write_atomically(&self.hosts_path, &merge_hosts(&current, hosts))?;
        debug!(path = %self.hosts_path.display(), entries = hosts.len(), "Updated hosts file");
        Ok(())
    }

    fn set_name_server(&self, address: &str) -> io::Result<()> {
        let (ip, port) = match address.parse::<SocketAddr>() {
            Ok(addr) => (addr.ip().to_string(), addr.port()),
            Err(_) => (address.to_string(), DNS_PORT),
        };

        if self.per_domain {
            fs::create_dir_all(&self.resolver_dir)?;
            let path = self.domain_resolver_path();
            write_atomically(&path, &format!("{RESOLV_MARKER}\nnameserver {ip}\nport {port}\n"))?;
            info!(path = %path.display(), name_server = %address, "Installed per-domain resolver");
            return Ok(());
        }

        if port != DNS_PORT {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!(
                    "{} cannot route lookups to port {port}, only to {DNS_PORT}",
                    self.resolv_conf_path.display()
                ),
            ));
        }
        let current = self.read_resolv_conf();
        write_atomically(&self.resolv_conf_path, &override_resolv_conf(&current, &ip))?;
        info!(path = %self.resolv_conf_path.display(), name_server = %ip, "Installed name server");
        Ok(())
    }

    fn local_domains(&self) -> Option<String> {
        let domains = parse_search_domains(&self.read_resolv_conf());
        if domains.is_empty() {
            None
        } else {
            Some(domains.join(","))
        }
    }

    fn upstream_name_server(&self) -> Option<String> {
        parse_name_servers(&self.read_resolv_conf())
            .into_iter()
            .next()
            .map(|ip| {
                if ip.contains(':') {
                    format!("[{ip}]:{DNS_PORT}")
                } else {
                    format!("{ip}:{DNS_PORT}")
                }
            })
    }

    fn restore(&self) -> io::Result<()> {
        if self.hosts_path.exists() {
            let current = read_or_empty(&self.hosts_path)?;
            let stripped = strip_hosts_block(&current);
            if stripped != current {
                write_atomically(&self.hosts_path, &stripped)?;
            }
        }

        if self.per_domain {
            match fs::remove_file(self.domain_resolver_path()) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        } else if self.resolv_conf_path.exists() {
            let current = self.read_resolv_conf();
            let restored = restore_resolv_conf(&current);
            if restored != current {
                write_atomically(&self.resolv_conf_path, &restored)?;
            }
        }

        info!("Restored local resolver configuration");
        Ok(())
    }
}

fn read_or_empty(path: &Path) -> io::Result<String> {
    match fs::read_to_string(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        other => other,
    }
}

/// Write `content` to a sibling temporary file, then rename it over `path`.
fn write_atomically(path: &Path, content: &str) -> io::Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".kt-tunnel.tmp");
    let temp = PathBuf::from(temp);
    fs::write(&temp, content)?;
    fs::rename(&temp, path)
}

/// Render the managed hosts block, one `ip name` line per entry.
#[must_use]
pub fn render_hosts_block(hosts: &HostTable) -> String {
    let mut block = format!("{HOSTS_BEGIN}\n");
    for (name, ip) in hosts {
        block.push_str(&format!("{ip} {name}\n"));
    }
    block.push_str(HOSTS_END);
    block.push('\n');
    block
}

/// Remove the managed block from hosts-file content.
#[must_use]
pub fn strip_hosts_block(content: &str) -> String {
    let mut kept = String::with_capacity(content.len());
    let mut inside = false;
    for line in content.lines() {
        match line.trim() {
            HOSTS_BEGIN => inside = true,
            HOSTS_END => inside = false,
            _ if !inside => {
                kept.push_str(line);
                kept.push('\n');
            }
            _ => {}
        }
    }
    kept
}

/// Replace the managed block in `content` with one for `hosts`.
#[must_use]
pub fn merge_hosts(content: &str, hosts: &HostTable) -> String {
    let mut merged = strip_hosts_block(content);
    if !hosts.is_empty() {
        merged.push_str(&render_hosts_block(hosts));
    }
    merged
}

/// Name servers configured in `resolv.conf` content, skipping managed lines.
#[must_use]
pub fn parse_name_servers(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| !line.contains(RESOLV_MARKER))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some("nameserver"), Some(ip)) => Some(ip.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Search domains configured in `resolv.conf` content.
#[must_use]
pub fn parse_search_domains(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("search" | "domain") => Some(fields.map(str::to_string).collect::<Vec<_>>()),
                _ => None,
            }
        })
        .flatten()
        .collect()
}

/// Point `resolv.conf` content at `ip`, disabling the existing name servers.
#[must_use]
pub fn override_resolv_conf(content: &str, ip: &str) -> String {
    let mut rewritten = format!("nameserver {ip} {RESOLV_MARKER}\n");
    for line in restore_resolv_conf(content).lines() {
        if line.trim_start().starts_with("nameserver") {
            rewritten.push_str(RESOLV_DISABLED_PREFIX);
        }
        rewritten.push_str(line);
        rewritten.push('\n');
    }
    rewritten
}

/// Undo [`override_resolv_conf`].
#[must_use]
pub fn restore_resolv_conf(content: &str) -> String {
    let mut restored = String::with_capacity(content.len());
    for line in content.lines() {
        if let Some(original) = line.strip_prefix(RESOLV_DISABLED_PREFIX) {
            restored.push_str(original);
        } else if line.ends_with(RESOLV_MARKER) {
            continue;
        } else {
            restored.push_str(line);
        }
        restored.push('\n');
    }
    restored
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod resolver_tests;
