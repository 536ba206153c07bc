//! Ensembl gene IDs from engine output to HGNC symbols.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use csv::ReaderBuilder;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{LookupError, RunError};
use crate::model::{GeneScoreRow, ResolvedGeneRow};

pub const TOP_GENES: usize = 100;
pub const DEFAULT_LOOKUP_URL: &str = "https://mygene.info/v3";

const IDENTIFIER_COLUMN: &str = "GeneNames";
const SCORE_COLUMN: &str = "Score";

/// Batched identifier-to-symbol lookup. One call per run.
pub trait GeneLookup: Send + Sync {
    /// Returns symbols for the identifiers the service knows. Unknown
    /// identifiers are simply absent from the map.
    fn lookup_symbols(&self, identifiers: &[String]) -> Result<HashMap<String, String>, LookupError>;
}

/// MyGene.info `query` endpoint, `ensembl.gene` scope, human only.
#[derive(Debug, Clone)]
pub struct MyGeneClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct MyGeneHit {
    query: String,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    notfound: bool,
}

impl MyGeneClient {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, LookupError> {
        let mut builder = reqwest::blocking::Client::builder();
        // reqwest's blocking client defaults to a 30s timeout; unset means unbounded here.
        builder = builder.timeout(timeout);
        let client = builder
            .build()
            .map_err(|err| LookupError::Transport(err.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

impl GeneLookup for MyGeneClient {
    fn lookup_symbols(&self, identifiers: &[String]) -> Result<HashMap<String, String>, LookupError> {
        if identifiers.is_empty() {
            return Ok(HashMap::new());
        }

        let query = identifiers.join(",");
        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .form(&[
                ("q", query.as_str()),
                ("scopes", "ensembl.gene"),
                ("fields", "symbol"),
                ("species", "human"),
            ])
            .send()
            .map_err(|err| LookupError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LookupError::Status {
                status: status.as_u16(),
                body: body.trim().chars().take(200).collect(),
            });
        }

        let body = response
            .text()
            .map_err(|err| LookupError::Transport(err.to_string()))?;
        parse_mygene_response(&body)
    }
}

/// First non-blank symbol per query wins; repeated hits for one ID are common.
fn parse_mygene_response(body: &str) -> Result<HashMap<String, String>, LookupError> {
    let hits: Vec<MyGeneHit> =
        serde_json::from_str(body).map_err(|err| LookupError::Malformed(err.to_string()))?;

    let mut symbols = HashMap::with_capacity(hits.len());
    for hit in hits {
        if hit.notfound {
            continue;
        }
        let Some(symbol) = hit.symbol.filter(|value| !value.trim().is_empty()) else {
            continue;
        };
        symbols.entry(hit.query).or_insert(symbol);
    }
    Ok(symbols)
}

/// Reads the engine's ranked output: the first `limit` data rows, in file
/// order, with 1-based ranks.
pub fn read_gene_scores(path: &Path, limit: usize) -> Result<Vec<GeneScoreRow>, RunError> {
    let invalid = |reason: String| RunError::InvalidEngineOutput {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)
        .map_err(|err| invalid(err.to_string()))?;

    let headers = reader.headers().map_err(|err| invalid(err.to_string()))?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|header| header.trim() == name)
            .ok_or_else(|| invalid(format!("missing `{name}` column")))
    };
    let identifier_index = column(IDENTIFIER_COLUMN)?;
    let score_index = column(SCORE_COLUMN)?;

    let mut rows = Vec::with_capacity(limit.min(TOP_GENES));
    for (index, record) in reader.records().take(limit).enumerate() {
        let record = record.map_err(|err| invalid(err.to_string()))?;
        let rank = index + 1;

        let identifier = record
            .get(identifier_index)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let score = record
            .get(score_index)
            .map(str::trim)
            .unwrap_or_default()
            .parse::<f64>()
            .map_err(|_| invalid(format!("row {rank}: score is not a number")))?;

        rows.push(GeneScoreRow {
            identifier,
            score,
            rank,
        });
    }

    Ok(rows)
}

pub struct IdentityResolver<'a> {
    lookup: &'a dyn GeneLookup,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(lookup: &'a dyn GeneLookup) -> Self {
        Self { lookup }
    }

    /// One lookup for the whole run. Output has exactly one row per input
    /// row; unmapped identifiers keep `symbol = None`.
    pub fn resolve(&self, rows: Vec<GeneScoreRow>) -> Result<Vec<ResolvedGeneRow>, RunError> {
        let mut identifiers: Vec<String> = Vec::with_capacity(rows.len());
        for row in &rows {
            if !row.identifier.is_empty() && !identifiers.contains(&row.identifier) {
                identifiers.push(row.identifier.clone());
            }
        }

        let symbols = self.lookup.lookup_symbols(&identifiers)?;

        let resolved: Vec<ResolvedGeneRow> = rows
            .into_iter()
            .map(|row| {
                let symbol = symbols
                    .get(&row.identifier)
                    .filter(|value| !value.trim().is_empty())
                    .cloned();
                ResolvedGeneRow::new(row, symbol)
            })
            .collect();

        let unresolved = resolved.iter().filter(|row| row.symbol.is_none()).count();
        if unresolved > 0 {
            debug!(unresolved, "identifiers without a symbol");
        }
        info!(
            genes = resolved.len(),
            resolved = resolved.len() - unresolved,
            "resolved gene symbols"
        );

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct StubLookup {
        symbols: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl StubLookup {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self {
                symbols: pairs
                    .iter()
                    .map(|(id, symbol)| (id.to_string(), symbol.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl GeneLookup for StubLookup {
        fn lookup_symbols(
            &self,
            identifiers: &[String],
        ) -> Result<HashMap<String, String>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(identifiers
                .iter()
                .filter_map(|id| self.symbols.get(id).map(|symbol| (id.clone(), symbol.clone())))
                .collect())
        }
    }

    struct FailingLookup;

    impl GeneLookup for FailingLookup {
        fn lookup_symbols(&self, _: &[String]) -> Result<HashMap<String, String>, LookupError> {
            Err(LookupError::Transport("operation timed out".to_string()))
        }
    }

    fn score_rows(ids: &[&str]) -> Vec<GeneScoreRow> {
        ids.iter()
            .enumerate()
            .map(|(index, id)| GeneScoreRow {
                identifier: id.to_string(),
                score: 1.0 / (index + 1) as f64,
                rank: index + 1,
            })
            .collect()
    }

    #[test]
    fn unresolved_rows_are_kept_and_lookup_is_batched() {
        let lookup = StubLookup::new(&[("ENSG1", "TP53"), ("ENSG3", "  ")]);
        let resolver = IdentityResolver::new(&lookup);

        let resolved = resolver
            .resolve(score_rows(&["ENSG1", "ENSG2", "ENSG3"]))
            .expect("resolve");

        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[0].symbol.as_deref(), Some("TP53"));
        assert_eq!(resolved[1].symbol, None);
        assert_eq!(resolved[2].symbol, None);
        assert_eq!(resolved[2].rank, 3);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lookup_failure_fails_the_run() {
        let resolver = IdentityResolver::new(&FailingLookup);
        let err = resolver
            .resolve(score_rows(&["ENSG1"]))
            .expect_err("lookup failure should propagate");
        assert_eq!(err.kind(), "resolution");
    }

    #[test]
    fn mygene_response_keeps_first_symbol_and_skips_notfound() {
        let body = r#"[
            {"query": "ENSG00000141510", "_id": "7157", "symbol": "TP53"},
            {"query": "ENSG00000141510", "_id": "999", "symbol": "TP53-DUP"},
            {"query": "ENSG00000000000", "notfound": true},
            {"query": "ENSG00000012048", "_id": "672", "symbol": "BRCA1"}
        ]"#;

        let symbols = parse_mygene_response(body).expect("parse");
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols["ENSG00000141510"], "TP53");
        assert_eq!(symbols["ENSG00000012048"], "BRCA1");
    }

    #[test]
    fn mygene_error_object_is_malformed() {
        let err = parse_mygene_response(r#"{"success": false, "error": "bad request"}"#)
            .expect_err("object body is not a hit list");
        assert!(matches!(err, LookupError::Malformed(_)));
    }

    #[test]
    fn short_engine_output_is_read_without_padding() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("results_FULL.txt");
        fs::write(&path, "GeneNames\tScore\nENSG1\t0.9\nENSG2\t0.4\nENSG3\t0.1\n")
            .expect("write fixture");

        let rows = read_gene_scores(&path, TOP_GENES).expect("read");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].identifier, "ENSG3");
        assert_eq!(rows[2].rank, 3);
    }

    #[test]
    fn long_engine_output_is_truncated_to_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("results_FULL.txt");
        let mut contents = String::from("Rank\tGeneNames\tScore\n");
        for index in 0..150 {
            contents.push_str(&format!("{index}\tENSG{index:05}\t{}\n", 1.0 - index as f64 / 1000.0));
        }
        fs::write(&path, contents).expect("write fixture");

        let rows = read_gene_scores(&path, TOP_GENES).expect("read");
        assert_eq!(rows.len(), 100);
        assert_eq!(rows[0].identifier, "ENSG00000");
        assert_eq!(rows[99].rank, 100);
    }

    #[test]
    fn engine_output_without_score_column_is_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("results_FULL.txt");
        fs::write(&path, "GeneNames\tWeight\nENSG1\t0.9\n").expect("write fixture");

        let err = read_gene_scores(&path, TOP_GENES).expect_err("missing Score");
        assert_eq!(err.kind(), "invalid_engine_output");
    }

    /// Answers a single request with `response` and returns the base URL.
    fn serve_once(response: &'static str) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream);
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read request line");
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().expect("content length");
                    }
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).expect("read request body");

            let mut stream = reader.into_inner();
            stream.write_all(response.as_bytes()).expect("write response");
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn mygene_error_status_is_reported_with_body() {
        let (url, server) = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy",
        );
        let client = MyGeneClient::new(&url, Some(Duration::from_secs(5))).expect("client");

        let err = client
            .lookup_symbols(&["ENSG00000141736".to_string()])
            .expect_err("503 should fail the lookup");
        server.join().expect("server thread");
        match err {
            LookupError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn mygene_error_status_fails_resolution() {
        let (url, server) = serve_once(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        let client = MyGeneClient::new(&url, Some(Duration::from_secs(5))).expect("client");

        let err = IdentityResolver::new(&client)
            .resolve(score_rows(&["ENSG1"]))
            .expect_err("server error should fail the run");
        server.join().expect("server thread");
        assert_eq!(err.kind(), "resolution");
    }
}
