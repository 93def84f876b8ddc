//! Artifact emission. The emitter hands the ranked node list to a writer;
//! downstream publication must never fail for lack of input, so an empty
//! run still produces every artifact in a valid-empty form.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::codec;
use crate::models::{PoolNode, ProxyNode, ValidationReport, ValidationStats};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("write artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize document: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("serialize stats: {0}")]
    Json(#[from] serde_json::Error),
}

/// Destination for a run's results. The bundled implementation writes
/// files; the trait seam exists so other consumers can take the hand-off.
pub trait ArtifactWriter {
    fn write_artifacts(
        &self,
        ranked: &[PoolNode],
        report: &ValidationReport,
        generated_at: DateTime<Utc>,
    ) -> Result<(), OutputError>;
}

/// Hand the ranked list over. An empty list is passed through explicitly
/// so the writer can produce placeholder artifacts.
pub fn emit(
    ranked: &[PoolNode],
    report: &ValidationReport,
    writer: &dyn ArtifactWriter,
    generated_at: DateTime<Utc>,
) -> Result<(), OutputError> {
    if ranked.is_empty() {
        log::warn!("no valid nodes this run; emitting placeholder artifacts");
    }
    writer.write_artifacts(ranked, report, generated_at)
}

pub struct FileArtifacts {
    output_dir: PathBuf,
    compact_cap: usize,
}

impl FileArtifacts {
    pub fn new(output_dir: impl Into<PathBuf>, compact_cap: usize) -> Self {
        Self {
            output_dir: output_dir.into(),
            compact_cap,
        }
    }

    pub fn document_path(&self) -> PathBuf {
        self.output_dir.join("nodes.yaml")
    }

    pub fn compact_document_path(&self) -> PathBuf {
        self.output_dir.join("nodes-lite.yaml")
    }

    pub fn uri_list_path(&self) -> PathBuf {
        self.output_dir.join("nodes.txt")
    }

    pub fn compact_uri_list_path(&self) -> PathBuf {
        self.output_dir.join("nodes-lite.txt")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.output_dir.join("validation_stats.json")
    }

    fn write_pair(&self, nodes: &[&ProxyNode], doc: &Path, list: &Path) -> Result<(), OutputError> {
        let document = serde_yaml::to_string(&codec::clash::document_for(nodes))?;
        atomic_write(doc, document.as_bytes())?;

        let mut uris = String::new();
        for node in nodes {
            uris.push_str(&codec::format_uri(node));
            uris.push('\n');
        }
        atomic_write(list, uris.as_bytes())?;
        Ok(())
    }
}

impl ArtifactWriter for FileArtifacts {
    fn write_artifacts(
        &self,
        ranked: &[PoolNode],
        report: &ValidationReport,
        generated_at: DateTime<Utc>,
    ) -> Result<(), OutputError> {
        std::fs::create_dir_all(&self.output_dir)?;

        let nodes: Vec<&ProxyNode> = ranked.iter().map(|pn| &pn.node).collect();
        self.write_pair(&nodes, &self.document_path(), &self.uri_list_path())?;

        let compact: Vec<&ProxyNode> = nodes.iter().take(self.compact_cap).copied().collect();
        self.write_pair(
            &compact,
            &self.compact_document_path(),
            &self.compact_uri_list_path(),
        )?;

        let stats = ValidationStats::from_report(report, generated_at);
        let json = serde_json::to_string_pretty(&stats)?;
        atomic_write(&self.stats_path(), json.as_bytes())?;

        log::info!(
            "wrote {} nodes ({} compact) to {}",
            nodes.len(),
            compact.len(),
            self.output_dir.display()
        );
        Ok(())
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), OutputError> {
    let dir = path.parent().ok_or_else(|| {
        OutputError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no parent directory",
        ))
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| OutputError::Io(e.error))?;
    Ok(())
}
