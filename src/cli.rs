//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use fulltext_core::identifier::{
    normalize_arxiv_id, normalize_doi, normalize_pmcid, normalize_pmid,
};
use fulltext_core::index::IndexOrder;
use fulltext_core::{IdentifierSet, IndexQuery, SourceFormat};

/// Acquire, normalize and cache full-text scientific documents.
///
/// Every subcommand prints JSON on stdout; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "fulltext")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a TOML config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the cache root from the config file
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Retrieve one publication's normalized document
    Get(IdArgs),
    /// Retrieve many publications listed one per line (or `-` for stdin)
    Batch(BatchArgs),
    /// List local files and remote candidates without downloading
    Sources(IdArgs),
    /// Filter cached documents in the metadata index
    Query(QueryArgs),
    /// Per-provider aggregates and duplicate documents
    Stats,
}

/// Identifiers for a single publication; at least one is required.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct IdArgs {
    #[arg(long)]
    pub pmcid: Option<String>,

    #[arg(long)]
    pub doi: Option<String>,

    #[arg(long)]
    pub pmid: Option<String>,

    #[arg(long = "arxiv")]
    pub arxiv_id: Option<String>,

    /// Title, used for a content-derived key when nothing else is known
    #[arg(long)]
    pub title: Option<String>,
}

impl IdArgs {
    #[must_use]
    pub fn to_identifier_set(&self) -> IdentifierSet {
        IdentifierSet {
            pmcid: self.pmcid.clone(),
            doi: self.doi.clone(),
            pmid: self.pmid.clone(),
            arxiv_id: self.arxiv_id.clone(),
            title: self.title.clone(),
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct BatchArgs {
    /// File with one identifier (or JSON identifier object) per line
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Maximum retrievals in flight (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Give up on unfinished members after this many seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub deadline: Option<u64>,

    /// Print only a summary line per member instead of full documents
    #[arg(long)]
    pub summary: bool,
}

#[derive(ClapArgs, Debug, Default)]
pub struct QueryArgs {
    #[arg(long)]
    pub min_quality: Option<f64>,

    #[arg(long)]
    pub min_tables: Option<i64>,

    #[arg(long)]
    pub min_figures: Option<i64>,

    #[arg(long)]
    pub provider: Option<String>,

    /// Source format: xml, latex, html or pdf
    #[arg(long)]
    pub format: Option<SourceFormat>,

    /// Only documents that have been normalized at least once
    #[arg(long)]
    pub parsed: bool,

    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub limit: Option<u32>,

    /// Order by: quality, parsed, accessed or identifier
    #[arg(long, default_value = "quality", value_parser = parse_order)]
    pub order: IndexOrder,
}

impl QueryArgs {
    #[must_use]
    pub fn to_query(&self) -> IndexQuery {
        let mut query = IndexQuery::new().order(self.order);
        if let Some(v) = self.min_quality {
            query = query.min_quality(v);
        }
        if let Some(v) = self.min_tables {
            query = query.min_tables(v);
        }
        if let Some(v) = self.min_figures {
            query = query.min_figures(v);
        }
        if let Some(v) = &self.provider {
            query = query.provider(v.clone());
        }
        if let Some(v) = self.format {
            query = query.format(v);
        }
        if self.parsed {
            query = query.only_parsed();
        }
        if let Some(v) = self.limit {
            query = query.limit(v);
        }
        query
    }
}

fn parse_order(value: &str) -> Result<IndexOrder, String> {
    match value {
        "quality" => Ok(IndexOrder::QualityDesc),
        "parsed" => Ok(IndexOrder::RecentlyParsed),
        "accessed" => Ok(IndexOrder::RecentlyAccessed),
        "identifier" => Ok(IndexOrder::Identifier),
        other => Err(format!(
            "unknown order '{other}' (expected quality, parsed, accessed or identifier)"
        )),
    }
}

/// Interprets one batch input line.
///
/// Lines starting with `{` are JSON identifier objects. Anything else is
/// matched as PMC ID, arXiv ID, DOI or PMID, in that order, and falls back
/// to a title.
pub fn parse_batch_line(line: &str) -> Result<Option<IdentifierSet>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    if line.starts_with('{') {
        return serde_json::from_str(line).map(Some);
    }

    let lower = line.to_ascii_lowercase();
    let ids = IdentifierSet::default();
    let ids = if lower.starts_with("pmc") && normalize_pmcid(line).is_some() {
        ids.with_pmcid(line)
    } else if lower.starts_with("arxiv") && normalize_arxiv_id(line).is_some() {
        ids.with_arxiv_id(line)
    } else if normalize_doi(line).is_some() {
        ids.with_doi(line)
    } else if normalize_pmid(line).is_some() {
        ids.with_pmid(line)
    } else if normalize_arxiv_id(line).is_some() {
        ids.with_arxiv_id(line)
    } else {
        ids.with_title(line)
    };
    Ok(Some(ids))
}
