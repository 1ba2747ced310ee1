use serde::{
    Deserialize,
    Serialize,
};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::errors::{
    CcsPredError,
    Result,
};

/// Length of the molecular descriptor vector (MQNs).
pub const N_DESCRIPTORS: usize = 42;

/// One measured compound/adduct pair, read-only input to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundRecord {
    pub name: String,
    pub mz: f64,
    pub adduct: String,
    /// Measured CCS in square angstrom, NaN when unknown.
    pub ccs: f64,
    pub src_tag: String,
    /// `None` when the descriptors could not be computed for the structure.
    pub descriptors: Option<Vec<f64>>,
}

/// All records sharing one source-dataset tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDataset {
    pub tag: String,
    pub records: Vec<CompoundRecord>,
}

impl SourceDataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Ordered collection of per-source leaves.
///
/// The aggregated view ([`CombinedDataset::records`]) walks the leaves in
/// order; anything that should happen per source is an explicit loop over
/// [`CombinedDataset::sources`] at the call site.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CombinedDataset {
    pub sources: Vec<SourceDataset>,
}

impl CombinedDataset {
    /// Groups records by source tag, keeping first-seen tag order.
    pub fn from_records(records: impl IntoIterator<Item = CompoundRecord>) -> Self {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut sources: Vec<SourceDataset> = Vec::new();
        for rec in records {
            let idx = *positions.entry(rec.src_tag.clone()).or_insert_with(|| {
                sources.push(SourceDataset {
                    tag: rec.src_tag.clone(),
                    records: Vec::new(),
                });
                sources.len() - 1
            });
            sources[idx].records.push(rec);
        }
        Self { sources }
    }

    /// Keeps only the leaves whose tag is listed. An empty list keeps all.
    pub fn select_sources(self, tags: &[String]) -> Self {
        if tags.is_empty() {
            return self;
        }
        Self {
            sources: self
                .sources
                .into_iter()
                .filter(|s| tags.contains(&s.tag))
                .collect(),
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &CompoundRecord> + '_ {
        self.sources.iter().flat_map(|s| s.records.iter())
    }

    pub fn tags(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.tag.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct ColumnIndex {
    name: usize,
    mz: usize,
    adduct: usize,
    ccs: Option<usize>,
    src_tag: Option<usize>,
    descriptors: Option<Vec<usize>>,
}

impl ColumnIndex {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |col: &str| headers.iter().position(|h| h.trim() == col);
        let require = |col: &'static str| {
            find(col).ok_or_else(|| CcsPredError::ParseError {
                msg: format!("missing required column '{}'", col),
            })
        };
        let descriptors: Option<Vec<usize>> = (0..N_DESCRIPTORS)
            .map(|i| find(&format!("mqn_{}", i)))
            .collect();
        Ok(Self {
            name: require("name")?,
            mz: require("mz")?,
            adduct: require("adduct")?,
            ccs: find("ccs"),
            src_tag: find("src_tag"),
            descriptors,
        })
    }
}

fn parse_field(record: &csv::StringRecord, idx: usize, line: usize) -> Result<f64> {
    let raw = record.get(idx).unwrap_or("").trim();
    raw.parse::<f64>().map_err(|e| CcsPredError::ParseError {
        msg: format!("line {}: could not parse '{}' as a number: {}", line, raw, e),
    })
}

/// Reads compound records from a CSV file.
///
/// Expected header: `name,mz,adduct,ccs,src_tag,mqn_0,...,mqn_41`. Rows with
/// any empty descriptor cell (or files without descriptor columns at all)
/// produce `descriptors: None`. `ccs` and `src_tag` may be absent for
/// inference inputs; a missing `ccs` reads as NaN.
pub fn read_records_csv(path: impl AsRef<Path>) -> Result<Vec<CompoundRecord>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).map_err(|e| match e.into_kind() {
        csv::ErrorKind::Io(source) => CcsPredError::Io {
            source,
            path: Some(path.to_path_buf()),
        },
        other => CcsPredError::ParseError {
            msg: format!("{:?}", other),
        },
    })?;
    let cols = ColumnIndex::from_headers(reader.headers()?)?;

    let mut out = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let row = row?;
        // header is line 1
        let line = i + 2;
        let descriptors = match &cols.descriptors {
            Some(idxs) => {
                let any_empty = idxs
                    .iter()
                    .any(|&j| row.get(j).map(|s| s.trim().is_empty()).unwrap_or(true));
                if any_empty {
                    None
                } else {
                    Some(
                        idxs.iter()
                            .map(|&j| parse_field(&row, j, line))
                            .collect::<Result<Vec<f64>>>()?,
                    )
                }
            }
            None => None,
        };
        out.push(CompoundRecord {
            name: row.get(cols.name).unwrap_or("").to_string(),
            mz: parse_field(&row, cols.mz, line)?,
            adduct: row.get(cols.adduct).unwrap_or("").trim().to_string(),
            ccs: match cols.ccs {
                Some(j) if !row.get(j).unwrap_or("").trim().is_empty() => {
                    parse_field(&row, j, line)?
                }
                _ => f64::NAN,
            },
            src_tag: cols
                .src_tag
                .and_then(|j| row.get(j))
                .unwrap_or("")
                .trim()
                .to_string(),
            descriptors,
        });
    }
    info!("Read {} records from {}", out.len(), path.display());
    Ok(out)
}
