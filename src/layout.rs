//! Run-tree naming conventions.
//!
//! Tool data lives at
//! `<run>/<iteration>/<sample>/tools-<group>/<hostpath>/<tool>/...`.
//! `metadata.log` is the preferred source for the coordinates; the member
//! list is used where the log is silent.

use std::collections::BTreeSet;

use regex::Regex;
use tracing::warn;

use crate::archive::Member;
use crate::mdconf::ConfigReader;

/// Fully resolved location of one tool's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCoordinates {
    pub iteration: String,
    pub sample: String,
    /// Host name as registered in `[tools] hosts`.
    pub host: String,
    /// Directory name the host's data was collected under.
    pub hostpath: String,
    pub tool: String,
    pub toolgroup: String,
}

impl ToolCoordinates {
    /// Member name of `<run>/<iteration>/<sample>/tools-<group>/<hostpath>/<tool>`.
    pub fn tool_dir(&self, dirname: &str) -> String {
        format!(
            "{}/{}/{}/tools-{}/{}/{}",
            dirname, self.iteration, self.sample, self.toolgroup, self.hostpath, self.tool
        )
    }
}

fn sorted_unique<I: IntoIterator<Item = String>>(items: I) -> Vec<String> {
    items.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

/// Iteration directory names, sorted.
pub fn iterations(mdconf: &dyn ConfigReader, dirname: &str, members: &[Member]) -> Vec<String> {
    if let Ok(list) = mdconf.get("pbench", "iterations") {
        return sorted_unique(
            list.split(", ")
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
    }
    let Ok(numbered) = Regex::new(r"^[1-9][0-9]*-") else {
        return Vec::new();
    };
    let prefix = format!("{}/", dirname);
    sorted_unique(members.iter().filter_map(|m| {
        let rest = m.name.strip_prefix(&prefix)?;
        (!rest.contains('/') && numbered.is_match(rest)).then(|| rest.to_string())
    }))
}

/// Sample directories of an iteration; `reference-result` when there are none.
pub fn samples(dirname: &str, iteration: &str, members: &[Member]) -> Vec<String> {
    let prefix = format!("{}/{}/", dirname, iteration);
    let found = sorted_unique(members.iter().filter_map(|m| {
        let rest = m.name.strip_prefix(&prefix)?;
        (!rest.contains('/') && rest.starts_with("sample")).then(|| rest.to_string())
    }));
    if found.is_empty() {
        vec!["reference-result".to_string()]
    } else {
        found
    }
}

/// Hosts with registered tools, from `[tools] hosts`.
pub fn hosts(mdconf: &dyn ConfigReader) -> Vec<String> {
    match mdconf.get("tools", "hosts") {
        Ok(list) => sorted_unique(list.split_whitespace().map(str::to_string)),
        Err(e) => {
            warn!("{}: tool data will not be indexed", e);
            Vec::new()
        }
    }
}

/// Option names of `[tools/<host>]`, sorted.
pub fn tools(mdconf: &dyn ConfigReader, host: &str) -> Vec<String> {
    match mdconf.options(&format!("tools/{}", host)) {
        Ok(opts) => sorted_unique(opts),
        Err(e) => {
            warn!(host = %host, "{}: tool data will not be indexed", e);
            Vec::new()
        }
    }
}

pub fn tool_label(mdconf: &dyn ConfigReader, host: &str) -> String {
    mdconf
        .get(&format!("tools/{}", host), "label")
        .unwrap_or_default()
}

pub fn tool_hostname_s(mdconf: &dyn ConfigReader, host: &str) -> String {
    mdconf
        .get(&format!("tools/{}", host), "hostname-s")
        .unwrap_or_default()
}

/// Directory a host's tool data was collected under: `<label>:<hostname-s>`
/// when both are registered, else `<hostname-s>`, else the host itself.
pub fn hostpath(mdconf: &dyn ConfigReader, host: &str) -> String {
    let label = tool_label(mdconf, host);
    let short = tool_hostname_s(mdconf, host);
    match (label.is_empty(), short.is_empty()) {
        (false, false) => format!("{}:{}", label, short),
        (true, false) => short,
        _ => host.to_string(),
    }
}

/// `[tools] group`, `default` when absent.
pub fn toolgroup(mdconf: &dyn ConfigReader) -> String {
    mdconf
        .get("tools", "group")
        .unwrap_or_else(|_| "default".to_string())
}

/// Every (iteration, sample, host, tool) combination of the run.
pub fn resolve(mdconf: &dyn ConfigReader, dirname: &str, members: &[Member]) -> Vec<ToolCoordinates> {
    let group = toolgroup(mdconf);
    let hosts = hosts(mdconf);
    let mut out = Vec::new();
    for iteration in iterations(mdconf, dirname, members) {
        for sample in samples(dirname, &iteration, members) {
            for host in &hosts {
                let hostpath = hostpath(mdconf, host);
                for tool in tools(mdconf, host) {
                    out.push(ToolCoordinates {
                        iteration: iteration.clone(),
                        sample: sample.clone(),
                        host: host.clone(),
                        hostpath: hostpath.clone(),
                        tool,
                        toolgroup: group.clone(),
                    });
                }
            }
        }
    }
    out
}
