// Copyright 2025 RecallDB (https://github.com/recalldb)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! RecallDB CLI
//!
//! Command-line interface over the embeddable engine: bulk import and
//! export, ad-hoc similarity queries, and statistics.
//!
//! Exit codes: 0 success, 1 usage error, 2 I/O error, 3 data error
//! (malformed input or corruption).

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use recalldb::{DbConfig, InsertRequest, Metric, SearchOptions, VectorDb};
use recalldb_core::{EnvConfig, RecallError, VectorRecord};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "recalldb")]
#[command(about = "RecallDB - embeddable vector database", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FileFormat {
    Json,
    Csv,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Bulk-load vectors from a JSON or CSV file
    Import {
        /// Database container path
        db: PathBuf,

        /// Input file
        file: PathBuf,

        /// Input format
        #[arg(long, value_enum, default_value = "json")]
        format: FileFormat,

        /// Records per insert batch
        #[arg(long, default_value = "500")]
        batch_size: usize,

        /// Print progress per batch
        #[arg(short, long)]
        verbose: bool,
    },

    /// Dump vectors to a JSON or CSV file
    Export {
        /// Database container path
        db: PathBuf,

        /// Output file
        file: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        format: FileFormat,

        /// Cap the number of exported records
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Run a similarity query
    Query {
        /// Database container path
        db: PathBuf,

        /// Embedding literal: JSON array, or comma/space separated
        embedding: String,

        /// Number of results
        #[arg(short, default_value = "10")]
        k: usize,

        /// Similarity metric
        #[arg(short, long, default_value = "cosine")]
        metric: String,

        /// Minimum score
        #[arg(short, long, default_value = "0")]
        threshold: f32,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Show database statistics
    Stats {
        /// Database container path
        db: PathBuf,

        /// Include index, cache, and quantizer detail
        #[arg(long)]
        detailed: bool,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

fn main() -> ExitCode {
    let env = EnvConfig::from_env();
    let filter = EnvFilter::try_new(&env.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version land here too; only real usage
            // errors exit non-zero.
            let code = u8::from(e.use_stderr());
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    match run(cli, &env) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code_for(&err)
        }
    }
}

/// Map an error chain onto the documented exit codes.
fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    for cause in err.chain() {
        if let Some(recall) = cause.downcast_ref::<RecallError>() {
            return match recall {
                RecallError::Io(_) => ExitCode::from(2),
                e if e.is_data_error() => ExitCode::from(3),
                RecallError::DimensionMismatch { .. } => ExitCode::from(3),
                _ => ExitCode::from(1),
            };
        }
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return ExitCode::from(2);
        }
        if cause.downcast_ref::<serde_json::Error>().is_some() {
            return ExitCode::from(3);
        }
    }
    ExitCode::from(1)
}

fn run(cli: Cli, env: &EnvConfig) -> Result<()> {
    match cli.command {
        Commands::Import {
            db,
            file,
            format,
            batch_size,
            verbose,
        } => import(&db, &file, format, batch_size, verbose, env),
        Commands::Export {
            db,
            file,
            format,
            limit,
        } => export(&db, &file, format, limit),
        Commands::Query {
            db,
            embedding,
            k,
            metric,
            threshold,
            format,
        } => query(&db, &embedding, k, &metric, threshold, format),
        Commands::Stats {
            db,
            detailed,
            format,
        } => stats(&db, detailed, format),
    }
}

fn open_db(path: &Path, env: &EnvConfig, dimension_hint: Option<usize>) -> Result<VectorDb> {
    let dimension = if path.exists() {
        container_dimension(path)?
    } else {
        dimension_hint.ok_or_else(|| {
            anyhow!("database {} does not exist and no vectors were provided to size it", path.display())
        })?
    };
    let config = env.apply(DbConfig::on_disk(dimension, path));
    Ok(VectorDb::open(config)?)
}

fn container_dimension(path: &Path) -> Result<usize> {
    Ok(VectorDb::peek_dimension(path)?)
}

fn import(
    db_path: &Path,
    file: &Path,
    format: FileFormat,
    batch_size: usize,
    verbose: bool,
    env: &EnvConfig,
) -> Result<()> {
    if batch_size == 0 {
        return Err(anyhow!("--batch-size must be positive"));
    }
    let text = fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let rows = match format {
        FileFormat::Json => parse_json_rows(&text)?,
        FileFormat::Csv => parse_csv_rows(&text)?,
    };
    if rows.is_empty() {
        println!("nothing to import");
        return Ok(());
    }

    let dimension = rows[0].embedding.len();
    let db = open_db(db_path, env, Some(dimension))?;

    let total = rows.len();
    let mut imported = 0usize;
    for chunk in rows.chunks(batch_size) {
        let requests: Vec<InsertRequest> = chunk
            .iter()
            .map(|row| {
                let mut request = InsertRequest::new(row.embedding.clone())
                    .with_metadata(row.metadata.clone());
                if let Some(id) = &row.id {
                    request = request.with_id(id.clone());
                }
                if let Some(ts) = row.timestamp {
                    request = request.with_created_at(ts);
                }
                request
            })
            .collect();
        db.insert_batch(requests)?;
        imported += chunk.len();
        if verbose {
            println!("imported {imported}/{total}");
        }
    }
    db.close()?;
    println!("imported {imported} vectors into {}", db_path.display());
    Ok(())
}

struct ImportRow {
    id: Option<String>,
    embedding: Vec<f32>,
    metadata: Value,
    timestamp: Option<i64>,
}

/// Accepts an array of records, an array of arrays, or `{vectors: [...]}`.
fn parse_json_rows(text: &str) -> Result<Vec<ImportRow>> {
    let value: Value = serde_json::from_str(text).context("parsing JSON input")?;
    let items = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("vectors")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .ok_or_else(|| anyhow!("expected a JSON array or an object with a `vectors` array"))?,
        _ => return Err(anyhow!("expected a JSON array or an object with a `vectors` array")),
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_json_row(item).with_context(|| format!("record {i}")))
        .collect()
}

fn parse_json_row(item: &Value) -> Result<ImportRow> {
    match item {
        Value::Array(_) => Ok(ImportRow {
            id: None,
            embedding: parse_number_array(item)?,
            metadata: json!({}),
            timestamp: None,
        }),
        Value::Object(map) => {
            let embedding = map
                .get("embedding")
                .ok_or_else(|| anyhow!("missing `embedding`"))?;
            Ok(ImportRow {
                id: map.get("id").and_then(Value::as_str).map(str::to_string),
                embedding: parse_number_array(embedding)?,
                metadata: map.get("metadata").cloned().unwrap_or_else(|| json!({})),
                timestamp: map.get("timestamp").and_then(Value::as_i64),
            })
        }
        _ => Err(anyhow!("expected an object or an array of numbers")),
    }
}

fn parse_number_array(value: &Value) -> Result<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("embedding must be an array of numbers"))?;
    items
        .iter()
        .map(|x| {
            x.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("embedding entries must be numbers"))
        })
        .collect()
}

/// CSV with a header row; an `embedding` column is required and an `id`
/// column is honored. Cells are split naively on commas (no quoting).
fn parse_csv_rows(text: &str) -> Result<Vec<ImportRow>> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or_else(|| anyhow!("empty CSV input"))?;
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    let embedding_col = columns
        .iter()
        .position(|c| *c == "embedding")
        .ok_or_else(|| anyhow!("CSV input must have an `embedding` header"))?;
    let id_col = columns.iter().position(|c| *c == "id");

    lines
        .enumerate()
        .map(|(i, line)| {
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            let cell = cells
                .get(embedding_col)
                .ok_or_else(|| anyhow!("row {i}: missing embedding cell"))?;
            let embedding = parse_embedding_literal(cell)
                .with_context(|| format!("row {i}: embedding"))?;
            Ok(ImportRow {
                id: id_col
                    .and_then(|c| cells.get(c))
                    .map(|s| s.to_string())
                    .filter(|s| !s.is_empty()),
                embedding,
                metadata: json!({}),
                timestamp: None,
            })
        })
        .collect()
}

/// Accepts `[0.1, 0.2]`, `0.1 0.2`, `0.1,0.2`, or `0.1;0.2`. Brackets
/// around a separator-delimited list (as in CSV cells, where commas are
/// unavailable) also parse.
fn parse_embedding_literal(text: &str) -> Result<Vec<f32>> {
    let mut text = text.trim();
    if text.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            return parse_number_array(&value);
        }
        text = text
            .trim_start_matches('[')
            .trim_end_matches(']')
            .trim();
    }
    let parts: Vec<&str> = text
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return Err(anyhow!("empty embedding literal"));
    }
    parts
        .iter()
        .map(|p| {
            p.parse::<f32>()
                .map_err(|_| anyhow!("`{p}` is not a number"))
        })
        .collect()
}

fn export(db_path: &Path, file: &Path, format: FileFormat, limit: Option<usize>) -> Result<()> {
    let db = VectorDb::open_existing(db_path)?;
    let records = db.records(limit);

    let out = match format {
        FileFormat::Json => {
            let rows: Vec<Value> = records.iter().map(record_to_json).collect();
            serde_json::to_string_pretty(&rows)?
        }
        FileFormat::Csv => {
            let mut out = String::from("id,embedding,metadata,timestamp\n");
            for record in &records {
                let embedding = record
                    .embedding
                    .iter()
                    .map(f32::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                let metadata = record.metadata.to_string().replace(',', ";");
                out.push_str(&format!(
                    "{},{embedding},{metadata},{}\n",
                    record.id, record.created_at
                ));
            }
            out
        }
    };
    fs::write(file, out).with_context(|| format!("writing {}", file.display()))?;
    println!("exported {} vectors to {}", records.len(), file.display());
    Ok(())
}

fn record_to_json(record: &VectorRecord) -> Value {
    json!({
        "id": record.id,
        "embedding": record.embedding,
        "metadata": record.metadata,
        "timestamp": record.created_at,
    })
}

fn query(
    db_path: &Path,
    embedding: &str,
    k: usize,
    metric: &str,
    threshold: f32,
    format: OutputFormat,
) -> Result<()> {
    let metric: Metric = metric.parse()?;
    let query = parse_embedding_literal(embedding)?;
    let db = VectorDb::open_existing(db_path)?;
    let response = db.search_with(
        &query,
        &SearchOptions::new(k, metric).with_threshold(threshold),
    )?;

    match format {
        OutputFormat::Json => {
            let rows: Vec<Value> = response
                .results
                .iter()
                .map(|r| json!({"id": r.id, "score": r.score, "metadata": r.metadata}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Table => {
            if response.results.is_empty() {
                println!("no results");
                return Ok(());
            }
            println!("{:<38} {:>10}  metadata", "id", "score");
            for result in &response.results {
                println!(
                    "{:<38} {:>10.6}  {}",
                    result.id, result.score, result.metadata
                );
            }
        }
    }
    Ok(())
}

fn stats(db_path: &Path, detailed: bool, format: OutputFormat) -> Result<()> {
    let db = VectorDb::open_existing(db_path)?;
    let stats = db.stats();

    match format {
        OutputFormat::Json => {
            let mut out = json!({
                "dimension": stats.dimension,
                "count": stats.backend.count,
                "bytes_on_disk": stats.backend.bytes_on_disk,
            });
            if detailed {
                out["hnsw"] = json!({
                    "enabled": stats.hnsw.enabled,
                    "ready": stats.hnsw.ready,
                    "node_count": stats.hnsw.node_count,
                    "edge_count": stats.hnsw.edge_count,
                    "max_level": stats.hnsw.max_level,
                    "avg_degree": stats.hnsw.avg_degree,
                });
                out["cache"] = json!({
                    "hits": stats.cache.hits,
                    "misses": stats.cache.misses,
                    "hit_rate": stats.cache.hit_rate,
                    "size": stats.cache.size,
                    "evictions": stats.cache.evictions,
                });
                if let Some(q) = &stats.quantizer {
                    out["quantizer"] = json!({
                        "dimensions": q.dimensions,
                        "compressed_bytes": q.compressed_bytes,
                        "compression_ratio": q.compression_ratio,
                    });
                }
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Table => {
            println!("dimension:      {}", stats.dimension);
            println!("count:          {}", stats.backend.count);
            println!("bytes on disk:  {}", stats.backend.bytes_on_disk);
            if detailed {
                println!(
                    "hnsw:           ready={} nodes={} edges={} max_level={} avg_degree={:.2}",
                    stats.hnsw.ready,
                    stats.hnsw.node_count,
                    stats.hnsw.edge_count,
                    stats.hnsw.max_level,
                    stats.hnsw.avg_degree
                );
                println!(
                    "cache:          hits={} misses={} hit_rate={:.2} size={}",
                    stats.cache.hits, stats.cache.misses, stats.cache.hit_rate, stats.cache.size
                );
                if let Some(q) = &stats.quantizer {
                    println!(
                        "quantizer:      dims={} bytes={} ratio={:.1}x",
                        q.dimensions, q.compressed_bytes, q.compression_ratio
                    );
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embedding_literal_forms() {
        let expected = vec![0.1f32, 0.2, 0.3];
        assert_eq!(parse_embedding_literal("[0.1, 0.2, 0.3]").unwrap(), expected);
        assert_eq!(parse_embedding_literal("0.1 0.2 0.3").unwrap(), expected);
        assert_eq!(parse_embedding_literal("0.1,0.2,0.3").unwrap(), expected);
        assert_eq!(parse_embedding_literal("0.1;0.2;0.3").unwrap(), expected);
        assert!(parse_embedding_literal("a b c").is_err());
        assert!(parse_embedding_literal("").is_err());
    }

    #[test]
    fn test_parse_json_rows_record_forms() {
        let text = r#"[
            {"id": "a", "embedding": [1, 2], "metadata": {"doc": "x"}},
            [3, 4]
        ]"#;
        let rows = parse_json_rows(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id.as_deref(), Some("a"));
        assert_eq!(rows[0].embedding, vec![1.0, 2.0]);
        assert_eq!(rows[1].id, None);
        assert_eq!(rows[1].embedding, vec![3.0, 4.0]);
    }

    #[test]
    fn test_parse_json_rows_vectors_wrapper() {
        let text = r#"{"vectors": [{"embedding": [1, 2]}]}"#;
        let rows = parse_json_rows(text).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_parse_json_rows_rejects_missing_embedding() {
        assert!(parse_json_rows(r#"[{"id": "a"}]"#).is_err());
        assert!(parse_json_rows(r#""scalar""#).is_err());
    }

    #[test]
    fn test_parse_csv_rows() {
        let text = "id,embedding\na,[1;2]\nb,0.5 0.5\n";
        let rows = parse_csv_rows(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id.as_deref(), Some("a"));
        assert_eq!(rows[1].embedding, vec![0.5, 0.5]);
    }

    #[test]
    fn test_parse_csv_requires_embedding_header() {
        assert!(parse_csv_rows("id,vector\na,[1]\n").is_err());
    }

    #[test]
    fn test_import_query_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("db.rcdb");
        let input = dir.path().join("in.json");
        fs::write(
            &input,
            r#"[{"id": "x", "embedding": [1, 0, 0], "metadata": {"doc": "a"}}]"#,
        )
        .unwrap();

        let env = EnvConfig::default();
        import(&db_path, &input, FileFormat::Json, 100, false, &env).unwrap();

        let db = VectorDb::open_existing(&db_path).unwrap();
        let record = db.get("x").unwrap();
        assert_eq!(record.embedding, vec![1.0, 0.0, 0.0]);
        assert_eq!(record.metadata["doc"], "a");
    }
}
