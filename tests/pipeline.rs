//! End-to-end indexing of a small run tree into the in-memory and JSON
//! lines sinks.

use std::fs;
use std::path::{Path, PathBuf};

use pbench_index::config::Config;
use pbench_index::counters::Counter;
use pbench_index::identity::document_id;
use pbench_index::ingest::{index_run, IndexOptions};
use pbench_index::models::Action;
use pbench_index::progress::NoProgress;
use pbench_index::sink::{DocumentSink, JsonLinesSink, MemorySink};
use serde_json::Value;
use tempfile::TempDir;

const MDLOG: &str = "\
[pbench]
name = fio
rpm-version = 0.71-1
iterations = 1-rw

[run]
controller = ctl.example.com
start_run = 2024-03-01T00:00:00
end_run = 2024-03-01T01:00:00
date = 2024-03-01T00:00:00

[tools]
hosts = h1
group = default

[tools/h1]
iostat = --interval=1
proc-vmstat = --interval=3
prometheus-metrics = --port=9100
sar = --interval=1
";

/// Build `<tmp>/fio_run` with tool data for every transformer.
fn build_run(tmp: &Path) -> PathBuf {
    let run = tmp.join("fio_run");
    let sample = run.join("1-rw/sample1");
    let host = sample.join("tools-default/h1");
    fs::create_dir_all(host.join("iostat/csv")).unwrap();
    fs::create_dir_all(host.join("proc-vmstat")).unwrap();
    fs::create_dir_all(host.join("prometheus-metrics/json")).unwrap();

    fs::write(run.join("metadata.log"), MDLOG).unwrap();
    fs::write(tmp.join("fio_run.tar.xz.md5"), "0123abcd  fio_run.tar.xz\n").unwrap();
    fs::write(
        sample.join("result.json"),
        r#"{"throughput": [{"date": 1709251200000, "value": "125.5"}]}"#,
    )
    .unwrap();

    fs::write(
        host.join("iostat/csv/disk_IOPS.csv"),
        "timestamp_ms,sda-read,sda-write\n1709251200000,10,20\n1709251201000,11,21\n",
    )
    .unwrap();
    fs::write(
        host.join("iostat/csv/disk_Queue_Size.csv"),
        "timestamp_ms,sda\n1709251200000,0.5\n1709251201000,0.6\n",
    )
    .unwrap();
    fs::write(host.join("iostat/csv/disk_unknown.csv"), "timestamp_ms,sda\n1,2\n").unwrap();

    fs::write(
        host.join("proc-vmstat/proc-vmstat-stdout.txt"),
        "timestamp: 1709251200\nnr_free_pages 100\nnr_dirty 3\ntimestamp: 1709251203\nnr_free_pages 99\n",
    )
    .unwrap();

    fs::write(
        host.join("prometheus-metrics/json/metrics.json"),
        r#"[{"@timestamp": 1709251200, "node_load1": 0.5}, {"node_load1": 0.7}]"#,
    )
    .unwrap();
    run
}

fn options(run: PathBuf) -> IndexOptions {
    IndexOptions {
        run_dir: run,
        metadata_json: Some(r#"{"owner": "perf-team"}"#.to_string()),
        ..IndexOptions::default()
    }
}

fn of_type<'a>(sink: &'a MemorySink, doc_type: &'a str) -> Vec<&'a Action> {
    sink.actions().filter(|a| a.doc_type == doc_type).collect()
}

#[tokio::test]
async fn indexes_every_producer() {
    let tmp = TempDir::new().unwrap();
    let run = build_run(tmp.path());
    let mut sink = MemorySink::new();

    let summary = index_run(&Config::default(), &options(run), &mut sink, &NoProgress)
        .await
        .unwrap();
    assert_eq!(summary.run_id, "0123abcd");
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.created, summary.produced);

    // run document
    let run_doc = sink.get("pbench.run.2024-03", "0123abcd").unwrap();
    assert_eq!(run_doc.doc_type, "pbench-run");
    assert_eq!(run_doc.source["@timestamp"], "2024-03-01T00:00:00");
    assert_eq!(run_doc.source["@metadata"]["pbench-agent-version"], "0.71-1");
    assert_eq!(run_doc.source["@metadata"]["md5"], "0123abcd");
    assert_eq!(run_doc.source["run"]["controller"], "ctl.example.com");
    assert_eq!(run_doc.source["user_specified_metadata"]["owner"], "perf-team");
    assert_eq!(run_doc.source["host_tools_info"][0]["hostname"], "h1");

    // table of contents, children of the run document
    let toc = of_type(&sink, "pbench-run-toc-entry");
    assert_eq!(toc.len(), 10);
    assert!(toc.iter().all(|a| a.parent.as_deref() == Some("0123abcd")));
    assert!(toc.iter().any(|a| a.source["directory"] == "/1-rw/sample1/tools-default/h1/iostat/csv/"));

    // result data
    let results = of_type(&sink, "pbench-result-data");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].index, "pbench.result-data.2024-03-01");
    assert_eq!(results[0].source["results"]["throughput"][0]["value"], 125.5);

    // unified iostat: one identifier, two rows
    let iostat = of_type(&sink, "pbench-tool-data-iostat");
    assert_eq!(iostat.len(), 2);
    for action in &iostat {
        assert_eq!(action.index, "pbench.tool-data-iostat.2024-03-01");
        let disk = &action.source["iostat"]["disk"];
        assert_eq!(disk["id"], "sda");
        assert!(disk["iops"].get("read").is_some());
        assert!(disk.get("qsize").is_some());
        assert_eq!(action.source["@metadata"]["iteration"], "rw");
        assert_eq!(action.source["@metadata"]["iterseqno"], "1");
        assert_eq!(action.id, document_id(&action.source));
    }

    assert_eq!(of_type(&sink, "pbench-tool-data-proc-vmstat").len(), 2);

    let prom = of_type(&sink, "pbench-tool-data-prometheus-metrics");
    assert_eq!(prom.len(), 1);
    assert_eq!(prom[0].source["@timestamp"], "2024-03-01T00:00:00.000000");

    assert!(of_type(&sink, "pbench-tool-data-sar").is_empty());

    // recoverable conditions reach the report
    let totals = summary.report.totals();
    assert_eq!(totals.get(Counter::CsvFileWithoutHandler), 1);
    assert_eq!(totals.get(Counter::JsonDocMissingTimestamp), 1);
    let contexts: Vec<&str> = summary
        .report
        .contexts()
        .iter()
        .filter(|c| !c.counters.is_empty())
        .map(|c| c.object.as_str())
        .collect();
    assert_eq!(contexts, vec!["ToolData-iostat", "ToolData-prometheus-metrics"]);
}

#[tokio::test]
async fn reindexing_creates_nothing_new() {
    let tmp = TempDir::new().unwrap();
    let run = build_run(tmp.path());
    let mut sink = MemorySink::new();

    let first = index_run(&Config::default(), &options(run.clone()), &mut sink, &NoProgress)
        .await
        .unwrap();
    let stored = sink.len();
    let second = index_run(&Config::default(), &options(run), &mut sink, &NoProgress)
        .await
        .unwrap();

    assert_eq!(second.produced, first.produced);
    assert_eq!(second.created, 0);
    assert_eq!(second.duplicates, first.produced);
    assert_eq!(sink.len(), stored);
}

#[tokio::test]
async fn identical_runs_produce_identical_ids() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    let mut sink_a = MemorySink::new();
    let mut sink_b = MemorySink::new();
    index_run(&Config::default(), &options(build_run(a.path())), &mut sink_a, &NoProgress)
        .await
        .unwrap();
    index_run(&Config::default(), &options(build_run(b.path())), &mut sink_b, &NoProgress)
        .await
        .unwrap();

    let ids = |sink: &MemorySink| -> Vec<(String, String)> {
        sink.actions()
            .filter(|a| a.doc_type.starts_with("pbench-tool-data-"))
            .map(|a| (a.index.clone(), a.id.clone()))
            .collect()
    };
    assert!(!ids(&sink_a).is_empty());
    assert_eq!(ids(&sink_a), ids(&sink_b));
}

#[tokio::test]
async fn bulk_file_holds_header_and_source_pairs() {
    let tmp = TempDir::new().unwrap();
    let run = build_run(tmp.path());
    let bulk = tmp.path().join("out/bulk.ndjson");
    let mut config = Config::default();
    config.index.prefix = "dev".into();
    config.ingest.batch_size = 3;

    let mut sink = JsonLinesSink::open(&bulk).unwrap();
    assert_eq!(sink.name(), "jsonl");
    let summary = index_run(&config, &options(run), &mut sink, &NoProgress)
        .await
        .unwrap();

    let lines: Vec<Value> = fs::read_to_string(&bulk)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len() as u64, summary.created * 2);
    for pair in lines.chunks(2) {
        let meta = &pair[0]["create"];
        assert!(meta["_index"].as_str().unwrap().starts_with("dev."));
        assert!(pair[1].get("@timestamp").is_some());
    }
}

#[tokio::test]
async fn missing_tools_section_still_indexes_the_run() {
    let tmp = TempDir::new().unwrap();
    let run = tmp.path().join("bare_run");
    fs::create_dir_all(&run).unwrap();
    fs::write(
        run.join("metadata.log"),
        "[pbench]\nname = bare\nrpm-version = 1\n\n[run]\nstart_run = 2024-03-01T00:00:00\nend_run = 2024-03-01T00:10:00\ndate = 2024-03-01T00:00:00\n",
    )
    .unwrap();
    let opts = IndexOptions {
        run_dir: run,
        run_id: Some("bare1".into()),
        ..IndexOptions::default()
    };
    let mut sink = MemorySink::new();
    let summary = index_run(&Config::default(), &opts, &mut sink, &NoProgress)
        .await
        .unwrap();
    assert_eq!(summary.produced, 2);
    assert!(!summary.report.has_errors());
    assert_eq!(
        sink.get("pbench.run.2024-03", "bare1").unwrap().source["host_tools_info"],
        Value::Array(Vec::new())
    );
}

#[tokio::test]
async fn fatal_errors_carry_exit_codes() {
    use pbench_index::error::IndexError;

    let tmp = TempDir::new().unwrap();
    let run = build_run(tmp.path());
    fs::remove_file(tmp.path().join("fio_run.tar.xz.md5")).unwrap();
    let mut sink = MemorySink::new();
    let err = index_run(&Config::default(), &options(run), &mut sink, &NoProgress)
        .await
        .unwrap_err();
    assert_eq!(err.downcast_ref::<IndexError>().unwrap().exit_code(), 6);
    assert!(sink.is_empty());
}
