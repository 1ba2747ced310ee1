use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    warn,
};

use super::encoder::OneHotEncoder;
use super::matrix::FeatureMatrix;
use crate::data::{
    CategoryCollapser,
    CompoundRecord,
    DEFAULT_COMMON_ADDUCTS,
    N_DESCRIPTORS,
};
use crate::errors::{
    CcsPredError,
    DataProcessingError,
    Result,
};

#[doc(hidden)]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DescriptorSelectionRepr {
    Named(String),
    Indices(Vec<usize>),
}

/// Which descriptor (MQN) columns go into the feature matrix.
///
/// Serialized as `"all"`, `"none"` or a list of indices.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "DescriptorSelectionRepr", into = "DescriptorSelectionRepr")]
pub enum DescriptorSelection {
    #[default]
    All,
    Omit,
    Indices(Vec<usize>),
}

impl TryFrom<DescriptorSelectionRepr> for DescriptorSelection {
    type Error = String;

    fn try_from(value: DescriptorSelectionRepr) -> std::result::Result<Self, Self::Error> {
        match value {
            DescriptorSelectionRepr::Named(x) if x == "all" => Ok(Self::All),
            DescriptorSelectionRepr::Named(x) if x == "none" => Ok(Self::Omit),
            DescriptorSelectionRepr::Named(x) => Err(format!(
                "descriptor_selection '{}' must be \"all\", \"none\" or a list of indices",
                x
            )),
            DescriptorSelectionRepr::Indices(v) => Ok(Self::Indices(v)),
        }
    }
}

impl From<DescriptorSelection> for DescriptorSelectionRepr {
    fn from(value: DescriptorSelection) -> Self {
        match value {
            DescriptorSelection::All => Self::Named("all".to_string()),
            DescriptorSelection::Omit => Self::Named("none".to_string()),
            DescriptorSelection::Indices(v) => Self::Indices(v),
        }
    }
}

impl DescriptorSelection {
    /// Resolves the selection to explicit, validated indices.
    pub fn resolve(&self) -> Result<Vec<usize>> {
        match self {
            Self::All => Ok((0..N_DESCRIPTORS).collect()),
            Self::Omit => Ok(Vec::new()),
            Self::Indices(idxs) => {
                if let Some(bad) = idxs.iter().find(|&&i| i >= N_DESCRIPTORS) {
                    return Err(CcsPredError::config(
                        "descriptor_selection",
                        format!("index {} out of range [0, {})", bad, N_DESCRIPTORS),
                    ));
                }
                let mut seen = idxs.clone();
                seen.sort_unstable();
                seen.dedup();
                if seen.len() != idxs.len() {
                    return Err(CcsPredError::config(
                        "descriptor_selection",
                        "duplicate descriptor indices",
                    ));
                }
                Ok(idxs.clone())
            }
        }
    }
}

fn default_include_encoded_adduct() -> bool {
    true
}

fn default_common_adducts() -> Vec<String> {
    DEFAULT_COMMON_ADDUCTS.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default = "default_include_encoded_adduct")]
    pub include_encoded_adduct: bool,
    #[serde(default)]
    pub descriptor_selection: DescriptorSelection,
    /// Allow-list for the adduct collapser.
    #[serde(default = "default_common_adducts")]
    pub common_adducts: Vec<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            include_encoded_adduct: default_include_encoded_adduct(),
            descriptor_selection: DescriptorSelection::default(),
            common_adducts: default_common_adducts(),
        }
    }
}

/// Column names of the feature matrix, in order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub columns: Vec<String>,
}

impl FeatureLayout {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Output of the assembly stage.
#[derive(Debug, Clone)]
pub struct AssembledData {
    pub x: FeatureMatrix,
    pub y: Vec<f64>,
    pub names: Vec<String>,
    pub adducts: Vec<String>,
    pub src_tags: Vec<String>,
    pub layout: FeatureLayout,
    /// Position of each kept row in the input record slice.
    pub record_indices: Vec<usize>,
    /// Input records left out, `n_missing_descriptors + n_non_finite`.
    pub n_excluded: usize,
    /// Descriptor vector absent or of the wrong length.
    pub n_missing_descriptors: usize,
    /// NaN or infinite mz, ccs or selected descriptor.
    pub n_non_finite: usize,
}

impl AssembledData {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exclusion {
    MissingDescriptors,
    NonFinite,
}

/// Builds `[mz] ++ [one-hot adduct] ++ [selected descriptors]` rows.
///
/// The adduct encoder is fit exactly once, at construction, over the
/// collapser vocabulary. The same assembler (usually restored from disk)
/// must be used for inference so the column layout never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAssembler {
    collapser: CategoryCollapser,
    encoder: Option<OneHotEncoder>,
    descriptor_indices: Vec<usize>,
    layout: FeatureLayout,
}

impl FeatureAssembler {
    pub fn try_new(config: &FeatureConfig) -> Result<Self> {
        let descriptor_indices = config.descriptor_selection.resolve()?;
        let collapser = CategoryCollapser::new(config.common_adducts.iter().cloned());

        let encoder = if config.include_encoded_adduct {
            Some(OneHotEncoder::new().fit(&collapser.vocabulary())?)
        } else {
            None
        };

        let mut columns = vec!["mz".to_string()];
        if let Some(enc) = &encoder {
            columns.extend(enc.categories()?.iter().map(|c| format!("adduct={}", c)));
        }
        columns.extend(descriptor_indices.iter().map(|i| format!("mqn_{}", i)));
        debug!("Feature layout: {:?}", columns);

        Ok(Self {
            collapser,
            encoder,
            descriptor_indices,
            layout: FeatureLayout { columns },
        })
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn n_features(&self) -> usize {
        self.layout.len()
    }

    pub fn collapser(&self) -> &CategoryCollapser {
        &self.collapser
    }

    pub fn encoder(&self) -> Option<&OneHotEncoder> {
        self.encoder.as_ref()
    }

    /// Checks a deserialized assembler against its own layout.
    pub fn validate(&self) -> Result<()> {
        let encoded = match &self.encoder {
            Some(enc) => {
                enc.validate()?;
                enc.n_columns()?
            }
            None => 0,
        };
        if let Some(bad) = self.descriptor_indices.iter().find(|&&i| i >= N_DESCRIPTORS) {
            return Err(CcsPredError::invalid_model(format!(
                "descriptor index {} out of range [0, {})",
                bad, N_DESCRIPTORS
            )));
        }
        let expected = 1 + encoded + self.descriptor_indices.len();
        if self.layout.len() != expected {
            return Err(CcsPredError::invalid_model(format!(
                "feature layout has {} columns, encoder and descriptors need {}",
                self.layout.len(),
                expected
            )));
        }
        Ok(())
    }

    /// Feature row for one record, `None` if the record has to be excluded.
    ///
    /// The target is not looked at, so this also serves inference inputs.
    pub fn feature_row(&self, record: &CompoundRecord) -> Result<Option<Vec<f64>>> {
        Ok(self.row_or_exclusion(record)?.ok())
    }

    fn row_or_exclusion(
        &self,
        record: &CompoundRecord,
    ) -> Result<std::result::Result<Vec<f64>, Exclusion>> {
        let descriptors = match &record.descriptors {
            Some(d) if d.len() == N_DESCRIPTORS => d,
            _ => return Ok(Err(Exclusion::MissingDescriptors)),
        };
        if !record.mz.is_finite() {
            return Ok(Err(Exclusion::NonFinite));
        }

        let mut row = vec![0.0; self.n_features()];
        row[0] = record.mz;
        let mut offset = 1;
        if let Some(enc) = &self.encoder {
            let width = enc.n_columns()?;
            enc.encode_into(
                self.collapser.collapse_one(&record.adduct),
                &mut row[offset..offset + width],
            )?;
            offset += width;
        }
        for (slot, &idx) in row[offset..].iter_mut().zip(self.descriptor_indices.iter()) {
            let v = descriptors[idx];
            if !v.is_finite() {
                return Ok(Err(Exclusion::NonFinite));
            }
            *slot = v;
        }
        Ok(Ok(row))
    }

    #[cfg_attr(
        feature = "instrumentation",
        tracing::instrument(skip_all, level = "debug")
    )]
    pub fn assemble(&self, records: &[CompoundRecord]) -> Result<AssembledData> {
        let ncols = self.n_features();
        let mut values = Vec::with_capacity(records.len() * ncols);
        let mut y = Vec::with_capacity(records.len());
        let mut names = Vec::with_capacity(records.len());
        let mut adducts = Vec::with_capacity(records.len());
        let mut src_tags = Vec::with_capacity(records.len());
        let mut record_indices = Vec::with_capacity(records.len());
        let mut n_missing_descriptors = 0;
        let mut n_non_finite = 0;

        for (i, rec) in records.iter().enumerate() {
            match self.row_or_exclusion(rec)? {
                Ok(row) if rec.ccs.is_finite() => {
                    values.extend(row);
                    y.push(rec.ccs);
                    names.push(rec.name.clone());
                    adducts.push(rec.adduct.clone());
                    src_tags.push(rec.src_tag.clone());
                    record_indices.push(i);
                }
                Ok(_) | Err(Exclusion::NonFinite) => n_non_finite += 1,
                Err(Exclusion::MissingDescriptors) => n_missing_descriptors += 1,
            }
        }

        let n_excluded = n_missing_descriptors + n_non_finite;
        if n_excluded > 0 {
            warn!(
                "Excluded {}/{} records: {} with missing descriptors, {} with non-finite mz, ccs or descriptor values",
                n_excluded,
                records.len(),
                n_missing_descriptors,
                n_non_finite,
            );
        }
        if y.is_empty() {
            return Err(DataProcessingError::ExpectedNonEmptyData {
                context: Some("FeatureAssembler::assemble: no usable records".to_string()),
            }
            .into());
        }

        let nrows = y.len();
        Ok(AssembledData {
            x: FeatureMatrix::from_vec(values, nrows, ncols)?,
            y,
            names,
            adducts,
            src_tags,
            layout: self.layout.clone(),
            record_indices,
            n_excluded,
            n_missing_descriptors,
            n_non_finite,
        })
    }
}
