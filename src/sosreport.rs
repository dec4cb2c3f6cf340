//! Host identity from sosreports.
//!
//! Runs may carry sosreports collected on each host
//! (`sysinfo/.../sosreport-<host>-<date>.tar.xz` plus its `.md5`). The
//! sosreport must already be expanded next to its archive, in a directory
//! named like the archive without its compression suffix. From it we take
//! the short and fully qualified hostnames and the address of every
//! network interface. The results back the [`HostLookup`] used to fill in
//! `host_tools_info` of the run document.

use std::collections::BTreeMap;
use std::net::IpAddr;

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::archive::{MemberKind, RunArchive};
use crate::counters::{Counter, Counters};
use crate::error::IndexError;

const ARCHIVE_SUFFIXES: &[&str] = &[".tar.xz", ".tar.gz", ".tar.bz2", ".tgz", ".tar"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub ifname: String,
    pub ipaddr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SosReport {
    pub name: String,
    pub md5: String,
    #[serde(rename = "hostname-f")]
    pub hostname_f: String,
    #[serde(rename = "hostname-s")]
    pub hostname_s: String,
    /// Interfaces per protocol (`inet`, `inet6`).
    #[serde(flatten)]
    pub interfaces: BTreeMap<String, Vec<Interface>>,
}

/// Resolve a tool host (name or address) to a fully qualified hostname.
pub trait HostLookup {
    fn by_host(&self, host: &str) -> Option<String>;
    fn by_ip(&self, ip: &str) -> Option<String>;

    fn lookup(&self, host: &str) -> Option<String> {
        if host.parse::<IpAddr>().is_ok() {
            self.by_ip(host)
        } else {
            self.by_host(host)
        }
    }
}

impl HostLookup for Vec<SosReport> {
    fn by_host(&self, host: &str) -> Option<String> {
        self.iter()
            .find(|s| [&s.name, &s.md5, &s.hostname_f, &s.hostname_s].iter().any(|v| *v == host))
            .map(|s| s.hostname_f.clone())
    }

    fn by_ip(&self, ip: &str) -> Option<String> {
        self.iter()
            .find(|s| {
                s.interfaces
                    .values()
                    .flatten()
                    .any(|i| i.ipaddr == ip || i.ifname == ip)
            })
            .map(|s| s.hostname_f.clone())
    }
}

fn hostname_error(name: &str, reason: &str) -> anyhow::Error {
    IndexError::SosreportHostname {
        name: name.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn short(name: &str) -> String {
    name.split('.').next().unwrap_or(name).to_string()
}

/// Reconcile the `hostname` and `hostname -f` outputs of a sosreport into
/// `(fqdn, short)`. Either may be empty, but not both, and at least one
/// must be something other than `localhost`.
pub fn reconcile_hostnames(name: &str, hostname_f: &str, hostname_s: &str) -> Result<(String, String)> {
    let mut f = hostname_f.to_string();
    let mut s = hostname_s.to_string();
    if f == "hostname: Name or service not known" {
        f.clear();
    }
    match (f.is_empty(), s.is_empty()) {
        (true, true) => return Err(hostname_error(name, "no hostname recorded in the sosreport")),
        (false, false) => {
            if f == s {
                s = short(&f);
            } else if f.starts_with(&s) {
                // already short
            } else if s.starts_with(&f) {
                std::mem::swap(&mut f, &mut s);
            } else if f != "localhost" {
                s = short(&f);
            } else {
                // f is localhost, s is not
                f = s.clone();
                s = short(&f);
            }
        }
        (true, false) => {
            f = s.clone();
            s = short(&f);
        }
        (false, true) => s = short(&f),
    }

    match (f == "localhost", s == "localhost") {
        (true, true) => Err(hostname_error(name, "no hostname other than 'localhost' collected")),
        (true, false) => {
            f = s;
            s = short(&f);
            Ok((f, s))
        }
        (false, true) => {
            s = short(&f);
            Ok((f, s))
        }
        (false, false) => Ok((f, s)),
    }
}

/// Normalize `ip address` output to `ip -o addr` form
/// (`<n>: <ifname> <proto> <addr>` per line). Input already in that form
/// is returned untouched.
pub fn ip_address_to_ip_o_addr(text: &str) -> String {
    let Ok(numbered) = Regex::new(r"^[0-9]+:") else {
        return String::new();
    };
    let lines: Vec<&str> = text.lines().collect();
    if lines.iter().all(|l| numbered.is_match(l)) {
        return text.to_string();
    }

    let mut out = String::new();
    let mut iface: Option<(String, String)> = None;
    for line in lines {
        if numbered.is_match(line) {
            let mut parts = line.splitn(3, ':');
            let serial = parts.next().unwrap_or("").to_string();
            let ifname = parts.next().unwrap_or("").trim().to_string();
            iface = Some((serial, ifname));
        } else if line.trim_start().starts_with("inet") {
            let Some((serial, ifname)) = &iface else {
                continue;
            };
            let mut fields = line.split_whitespace();
            if let (Some(proto), Some(addr)) = (fields.next(), fields.next()) {
                out.push_str(&format!("{}: {} {} {}\n", serial, ifname, proto, addr));
            }
        }
    }
    out
}

/// Interfaces per protocol from `ip -o addr` style text.
pub fn parse_interfaces(text: &str) -> BTreeMap<String, Vec<Interface>> {
    let mut out: BTreeMap<String, Vec<Interface>> = BTreeMap::new();
    for line in ip_address_to_ip_o_addr(text).lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let ipaddr = fields[3].split('/').next().unwrap_or(fields[3]);
        out.entry(fields[2].to_string()).or_default().push(Interface {
            ifname: fields[1].trim_end_matches(':').to_string(),
            ipaddr: ipaddr.to_string(),
        });
    }
    out
}

fn expanded_dir(archive_name: &str) -> &str {
    ARCHIVE_SUFFIXES
        .iter()
        .find_map(|sfx| archive_name.strip_suffix(sfx))
        .unwrap_or(archive_name)
}

/// Every expanded sosreport of the run, sorted by name.
///
/// Fails when a sosreport yields no usable hostname.
pub fn collect(archive: &RunArchive, counters: &mut Counters) -> Result<Vec<SosReport>> {
    let mut md5_members: Vec<&str> = archive
        .members()
        .iter()
        .filter(|m| m.is_file() && m.basename().contains("sosreport") && m.name.ends_with(".md5"))
        .map(|m| m.name.as_str())
        .collect();
    md5_members.sort();

    let mut reports = Vec::new();
    for md5_name in md5_members {
        let sos_name = md5_name.trim_end_matches(".md5");
        let dir = expanded_dir(sos_name);
        let is_dir = archive
            .members()
            .iter()
            .any(|m| m.kind == MemberKind::Dir && m.name == dir);
        if !is_dir {
            warn!(sosreport = sos_name, "Sosreport is not expanded, skipping");
            counters.incr(Counter::SosreportNotExpanded);
            continue;
        }
        let md5 = std::fs::read_to_string(archive.path_of(md5_name))
            .map(|t| t.trim_end().to_string())
            .unwrap_or_default();

        let prefix = format!("{}/", dir);
        let inside: Vec<&str> = archive
            .members()
            .iter()
            .filter(|m| m.is_file() && m.name.starts_with(&prefix))
            .map(|m| m.name.as_str())
            .collect();
        let read = |suffix: &str| -> Result<String> {
            match inside.iter().find(|n| n.ends_with(suffix)) {
                Some(n) => std::fs::read_to_string(archive.path_of(n))
                    .map(|t| t.trim_end_matches('\n').to_string())
                    .map_err(|e| hostname_error(sos_name, &format!("cannot read {}: {}", suffix, e))),
                None => Ok(String::new()),
            }
        };
        let hostname_f = read("sos_commands/general/hostname_-f")?;
        let hostname_s = read("sos_commands/general/hostname")?;
        let (hostname_f, hostname_s) = reconcile_hostnames(sos_name, &hostname_f, &hostname_s)?;

        let ip_file = inside
            .iter()
            .find(|n| n.contains("sos_commands/networking/ip_-o_addr"))
            .or_else(|| inside.iter().find(|n| n.contains("sos_commands/networking/ip_address")));
        let interfaces = match ip_file {
            Some(n) => std::fs::read(archive.path_of(n))
                .map(|bytes| parse_interfaces(&String::from_utf8_lossy(&bytes)))
                .unwrap_or_default(),
            None => BTreeMap::new(),
        };
        debug!(sosreport = sos_name, host = %hostname_f, "Read sosreport");

        reports.push(SosReport {
            name: sos_name.to_string(),
            md5,
            hostname_f,
            hostname_s,
            interfaces,
        });
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(f: &str, s: &str) -> (String, String) {
        reconcile_hostnames("sos", f, s).unwrap()
    }

    #[test]
    fn hostname_reconciliation() {
        assert_eq!(ok("a.example.com", "a.example.com"), ("a.example.com".into(), "a".into()));
        assert_eq!(ok("a.example.com", "a"), ("a.example.com".into(), "a".into()));
        assert_eq!(ok("a", "a.example.com"), ("a.example.com".into(), "a".into()));
        assert_eq!(ok("b.example.com", "x"), ("b.example.com".into(), "b".into()));
        assert_eq!(ok("localhost", "x.lab"), ("x.lab".into(), "x".into()));
        assert_eq!(ok("", "c.lab"), ("c.lab".into(), "c".into()));
        assert_eq!(ok("d.lab", ""), ("d.lab".into(), "d".into()));
        assert_eq!(
            ok("hostname: Name or service not known", "e"),
            ("e".into(), "e".into())
        );
    }

    #[test]
    fn unusable_hostnames_are_fatal() {
        for (f, s) in [("", ""), ("localhost", "localhost"), ("localhost", "")] {
            let err = reconcile_hostnames("sos", f, s).unwrap_err();
            assert_eq!(err.downcast_ref::<IndexError>().unwrap().exit_code(), 10);
        }
    }

    #[test]
    fn ip_address_output_is_converted() {
        let ip_address = "\
1: lo: <LOOPBACK,UP> mtu 65536
    link/loopback 00:00:00:00:00:00
    inet 127.0.0.1/8 scope host lo
    inet6 ::1/128 scope host
2: eth0: <BROADCAST,UP> mtu 1500
    inet 10.0.0.5/24 brd 10.0.0.255 scope global eth0
";
        let converted = ip_address_to_ip_o_addr(ip_address);
        assert_eq!(
            converted,
            "1: lo inet 127.0.0.1/8\n1: lo inet6 ::1/128\n2: eth0 inet 10.0.0.5/24\n"
        );
        let ifs = parse_interfaces(ip_address);
        assert_eq!(ifs["inet"].len(), 2);
        assert_eq!(ifs["inet"][1], Interface { ifname: "eth0".into(), ipaddr: "10.0.0.5".into() });
        assert_eq!(ifs["inet6"][0].ipaddr, "::1");
    }

    #[test]
    fn ip_o_addr_passes_through() {
        let text = "1: lo    inet 127.0.0.1/8 scope host lo\n2: eth0    inet 10.1.1.1/16 scope global eth0\n";
        assert_eq!(ip_address_to_ip_o_addr(text), text);
        assert_eq!(parse_interfaces(text)["inet"][1].ipaddr, "10.1.1.1");
    }

    #[test]
    fn lookup_by_name_and_address() {
        let mut interfaces = BTreeMap::new();
        interfaces.insert(
            "inet".to_string(),
            vec![Interface { ifname: "eth0".into(), ipaddr: "10.0.0.5".into() }],
        );
        let reports = vec![SosReport {
            name: "run/sysinfo/sosreport-a".into(),
            md5: "x".into(),
            hostname_f: "a.lab".into(),
            hostname_s: "a".into(),
            interfaces,
        }];
        let lookup: &dyn HostLookup = &reports;
        assert_eq!(lookup.lookup("a").as_deref(), Some("a.lab"));
        assert_eq!(lookup.lookup("10.0.0.5").as_deref(), Some("a.lab"));
        assert_eq!(lookup.lookup("10.0.0.6"), None);
        assert_eq!(lookup.lookup("b"), None);
    }

    #[test]
    fn archive_suffix_stripped() {
        assert_eq!(expanded_dir("x/sosreport-a.tar.xz"), "x/sosreport-a");
        assert_eq!(expanded_dir("x/sosreport-a"), "x/sosreport-a");
    }
}
