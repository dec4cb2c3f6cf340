//! Contents of the SQLite sink.
//!
//! Used by `pbench-index stats` to show what has been stored: document
//! counts per index and type, and when each index last received a
//! document.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Per-index breakdown.
pub struct IndexStats {
    pub index_name: String,
    pub doc_type: String,
    pub doc_count: i64,
    pub last_created: i64,
}

pub async fn collect_stats(config: &Config) -> Result<Vec<IndexStats>> {
    let pool = db::connect(config).await?;
    let rows = sqlx::query(
        r#"
        SELECT
            index_name,
            doc_type,
            COUNT(*) AS doc_count,
            MAX(created_at) AS last_created
        FROM documents
        GROUP BY index_name, doc_type
        ORDER BY index_name, doc_type
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let stats = rows
        .iter()
        .map(|row| IndexStats {
            index_name: row.get("index_name"),
            doc_type: row.get("doc_type"),
            doc_count: row.get("doc_count"),
            last_created: row.get("last_created"),
        })
        .collect();
    pool.close().await;
    Ok(stats)
}

/// Run the stats command: query the sink and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let stats = collect_stats(config).await?;
    let total: i64 = stats.iter().map(|s| s.doc_count).sum();
    let db_size = std::fs::metadata(&config.sink.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("pbench-index sink stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.sink.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Documents:   {}", total);

    if !stats.is_empty() {
        println!();
        println!(
            "  {:<44} {:<28} {:>8}   {}",
            "INDEX", "TYPE", "DOCS", "LAST WRITE"
        );
        println!("  {}", "-".repeat(96));
        for s in &stats {
            println!(
                "  {:<44} {:<28} {:>8}   {}",
                s.index_name,
                s.doc_type,
                s.doc_count,
                format_ts_iso(s.last_created)
            );
        }
    }
    println!();
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
