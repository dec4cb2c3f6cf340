//! The run document: one per run, id = run id.
//!
//! ```text
//! {"@timestamp": <start_run>,
//!  "@metadata": {generated-by, generated-by-version, pbench-agent-version, file-date, file-name, md5},
//!  "user_specified_metadata": {...},      // only with --metadata
//!  "run": {[run] + [pbench] items, fixed dates, id, tarball-dirname, tarball-toc-prefix},
//!  "sosreports": [...],
//!  "host_tools_info": [{hostname, hostname-f, label?, tools: {...}}]}
//! ```

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::warn;

use crate::archive::RunArchive;
use crate::mdconf::ConfigReader;
use crate::sosreport::{HostLookup, SosReport};
use crate::timestamp::{fix_date_format, local_to_utc};

pub const GENERATED_BY: &str = "pbench-index";

/// `@metadata` of the run document: facts about the archive itself.
pub fn archive_metadata(archive: &RunArchive) -> Value {
    let agent_version = archive
        .mdconf()
        .get("pbench", "rpm-version")
        .unwrap_or_else(|_| "Unknown".to_string());
    let mut md = Map::new();
    md.insert("generated-by".into(), GENERATED_BY.into());
    md.insert("generated-by-version".into(), env!("CARGO_PKG_VERSION").into());
    md.insert("pbench-agent-version".into(), agent_version.into());
    md.insert("file-date".into(), archive.file_date().into());
    md.insert("file-name".into(), archive.run_dir().display().to_string().into());
    md.insert("md5".into(), archive.run_id().into());
    Value::Object(md)
}

/// The `run` section: `[run]` and `[pbench]` merged, dates normalized.
///
/// Returns an empty object, with a warning, when a required key is
/// missing or a date cannot be normalized.
pub fn run_section(mdconf: &dyn ConfigReader, run_id: &str, dirname: &str) -> Value {
    match try_run_section(mdconf, run_id, dirname) {
        Ok(section) => Value::Object(section),
        Err(reason) => {
            warn!(run = dirname, "{}: run metadata left empty", reason);
            Value::Object(Map::new())
        }
    }
}

fn try_run_section(mdconf: &dyn ConfigReader, run_id: &str, dirname: &str) -> Result<Map<String, Value>, String> {
    let mut items: Vec<(String, String)> = Vec::new();
    items.extend(mdconf.items("run").map_err(|e| e.to_string())?);
    items.extend(mdconf.items("pbench").map_err(|e| e.to_string())?);
    let mut d: HashMap<String, String> = items.into_iter().collect();

    let mut take = |key: &str| d.remove(key).ok_or_else(|| format!("{} is missing in metadata.log", key));
    let start_run = fix_date_format(&take("start_run")?).map_err(|e| e.to_string())?;
    let end_run = fix_date_format(&take("end_run")?).map_err(|e| e.to_string())?;
    let local = fix_date_format(&take("date")?).map_err(|e| e.to_string())?;
    take("rpm-version")?;
    let date = local_to_utc(&local, &start_run).map_err(|e| e.to_string())?;

    let mut out: Map<String, Value> = d.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
    out.insert("start_run".into(), start_run.into());
    out.insert("end_run".into(), end_run.into());
    out.insert("date".into(), date.into());
    out.insert("id".into(), run_id.into());
    out.insert("tarball-dirname".into(), dirname.into());
    out.insert("tarball-toc-prefix".into(), dirname.into());
    Ok(out)
}

/// `--metadata` JSON. Unparsable input is reported and replaced by `{}`.
pub fn user_metadata(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!("Cannot parse user metadata JSON '{}': {}", raw, e);
        Value::Object(Map::new())
    })
}

/// Tools registered per host, with hostnames resolved through `lookup`.
///
/// A host's label is either its own `label` option or the value of a
/// `remote@<host>` option of another host.
pub fn host_tools_info(mdconf: &dyn ConfigReader, lookup: &dyn HostLookup) -> Vec<Value> {
    let hosts = match mdconf.get("tools", "hosts") {
        Ok(h) => h,
        Err(e) => {
            warn!("host tools info: {}", e);
            return Vec::new();
        }
    };

    let mut entries: Vec<Map<String, Value>> = Vec::new();
    let mut remote_labels: HashMap<String, String> = HashMap::new();
    for host in hosts.split_whitespace() {
        let section = format!("tools/{}", host);
        let items = match mdconf.items(&section) {
            Ok(items) => items,
            Err(e) => {
                warn!("host tools info: {}", e);
                return Vec::new();
            }
        };

        let mut info = Map::new();
        info.insert("hostname".into(), host.into());
        info.insert(
            "hostname-f".into(),
            lookup.lookup(host).map(Value::String).unwrap_or(Value::Null),
        );
        let mut tools = Map::new();
        for (key, value) in items {
            if key == "label" {
                info.insert("label".into(), value.into());
            } else if let Some(remote) = key.strip_prefix("remote@") {
                if !value.is_empty() {
                    remote_labels.insert(remote.to_string(), value);
                }
            } else if !key.starts_with("remote") {
                tools.insert(key, value.into());
            }
        }
        info.insert("tools".into(), Value::Object(tools));
        entries.push(info);
    }

    for info in &mut entries {
        let host = info.get("hostname").and_then(Value::as_str).map(str::to_string);
        if let Some(label) = host.and_then(|h| remote_labels.get(&h).cloned()) {
            info.insert("label".into(), label.into());
        }
    }
    entries.into_iter().map(Value::Object).collect()
}

/// Assemble the run document.
pub fn build(archive: &RunArchive, sosreports: &Vec<SosReport>, metadata_json: Option<&str>) -> Value {
    let mut doc = Map::new();
    doc.insert("@timestamp".into(), archive.start_run().into());
    doc.insert("@metadata".into(), archive_metadata(archive));
    if let Some(raw) = metadata_json {
        doc.insert("user_specified_metadata".into(), user_metadata(raw));
    }
    doc.insert(
        "run".into(),
        run_section(archive.mdconf(), archive.run_id(), archive.dirname()),
    );
    doc.insert(
        "sosreports".into(),
        serde_json::to_value(sosreports).unwrap_or(Value::Array(Vec::new())),
    );
    doc.insert(
        "host_tools_info".into(),
        Value::Array(host_tools_info(archive.mdconf(), sosreports)),
    );
    Value::Object(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mdconf::MetadataLog;

    const MDLOG: &str = "\
[pbench]
name = fio
rpm-version = 0.50-1
script = fio

[run]
controller = ctl.lab
start_run = 2016-10-18_14:26:00.123
end_run = 2016-10-18_15:00:00.000
date = 2016-10-18_10:26:03

[tools]
hosts = node1 10.0.0.5

[tools/node1]
label = client
remote@10.0.0.5 = server
iostat = --interval=3

[tools/10.0.0.5]
mpstat =
";

    struct NoHosts;

    impl HostLookup for NoHosts {
        fn by_host(&self, host: &str) -> Option<String> {
            (host == "node1").then(|| "node1.lab".to_string())
        }
        fn by_ip(&self, _ip: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn run_section_merges_and_fixes_dates() {
        let log = MetadataLog::parse(MDLOG).unwrap();
        let run = run_section(&log, "abc", "fio_run");
        assert_eq!(run["start_run"], "2016-10-18T14:26:00.123");
        assert_eq!(run["end_run"], "2016-10-18T15:00:00.000");
        assert_eq!(run["date"], "2016-10-18T14:26:03");
        assert_eq!(run["controller"], "ctl.lab");
        assert_eq!(run["name"], "fio");
        assert_eq!(run["id"], "abc");
        assert_eq!(run["tarball-toc-prefix"], "fio_run");
        assert!(run.get("rpm-version").is_none());
    }

    #[test]
    fn run_section_empty_on_missing_key() {
        let log = MetadataLog::parse("[pbench]\nname = x\n[run]\nstart_run = 2016-10-18T14:26:00\nend_run = 2016-10-18T14:26:00\n").unwrap();
        assert_eq!(run_section(&log, "abc", "r"), Value::Object(Map::new()));
    }

    #[test]
    fn host_tools_info_resolves_labels() {
        let log = MetadataLog::parse(MDLOG).unwrap();
        let info = host_tools_info(&log, &NoHosts);
        assert_eq!(info.len(), 2);
        assert_eq!(info[0]["hostname"], "node1");
        assert_eq!(info[0]["hostname-f"], "node1.lab");
        assert_eq!(info[0]["label"], "client");
        assert_eq!(info[0]["tools"]["iostat"], "--interval=3");
        assert!(info[0]["tools"].get("remote@10.0.0.5").is_none());
        assert!(info[0]["tools"].get("label").is_none());
        assert_eq!(info[1]["label"], "server");
        assert_eq!(info[1]["hostname-f"], Value::Null);
    }

    #[test]
    fn bad_user_metadata_becomes_empty_object() {
        assert_eq!(user_metadata(r#"{"a": 1}"#)["a"], 1);
        assert_eq!(user_metadata("{nope"), Value::Object(Map::new()));
    }
}
