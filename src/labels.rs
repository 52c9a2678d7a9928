use crate::error::{ClassifierError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::{fs, path::Path};

/// Selects the index of the largest value in a probability vector.
///
/// Ties break toward the lowest index (first occurrence wins), matching
/// standard argmax semantics. Non-finite entries are skipped so a NaN in a
/// degenerate distribution can never be selected as the confidence.
/// Returns `None` for an empty vector or one with no finite entry.
pub fn argmax(probs: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &prob) in probs.iter().enumerate() {
        if !prob.is_finite() {
            continue;
        }
        match best {
            Some((_, max)) if prob <= max => {}
            _ => best = Some((idx, prob)),
        }
    }
    best
}

/// Formats a raw, underscore-delimited taxon label for display:
/// underscores become spaces and each word's first letter is capitalized.
pub fn format_species_name(raw: &str) -> String {
    raw.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The on-disk label map. Either a flat `{ "<id>": "<taxon>" }` object with
/// numeric identifiers (their ascending order defines the output-index
/// order), or the explicit form for deployments where a model version
/// serves only a subset of the known classes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LabelMapFile {
    Full {
        classes: Vec<String>,
        taxa: HashMap<String, String>,
    },
    Flat(HashMap<String, String>),
}

/// Immutable mapping from model output index to class identifier to taxon
/// name. Loaded once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct ClassLabelMap {
    /// Ordered class identifiers: output index `i` predicts `classes[i]`.
    classes: Vec<String>,
    /// Class identifier to raw taxon label (underscore-delimited).
    taxa: HashMap<String, String>,
}

impl ClassLabelMap {
    /// Builds a label map from an ordered class list and a taxon mapping.
    pub fn new(classes: Vec<String>, taxa: HashMap<String, String>) -> Self {
        Self { classes, taxa }
    }

    /// Loads a label map from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            ClassifierError::Config(format!("cannot read label map {}: {}", path.display(), e))
        })?;
        Self::from_json(&json).map_err(|e| {
            ClassifierError::Config(format!("invalid label map {}: {}", path.display(), e))
        })
    }

    /// Parses a label map from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: LabelMapFile = serde_json::from_str(json)
            .map_err(|e| ClassifierError::Config(e.to_string()))?;
        match file {
            LabelMapFile::Full { classes, taxa } => Ok(Self::new(classes, taxa)),
            LabelMapFile::Flat(taxa) => {
                let mut ids = Vec::with_capacity(taxa.len());
                for key in taxa.keys() {
                    let numeric: usize = key.parse().map_err(|_| {
                        ClassifierError::Config(format!(
                            "flat label maps need numeric class ids, got {:?}",
                            key
                        ))
                    })?;
                    ids.push((numeric, key.clone()));
                }
                ids.sort_by_key(|(numeric, _)| *numeric);
                let classes = ids.into_iter().map(|(_, key)| key).collect();
                Ok(Self::new(classes, taxa))
            }
        }
    }

    /// Number of classes the map covers.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Class identifier for a model output index, if one is declared.
    pub fn class_id(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    /// Resolves a class identifier to its display-formatted species name.
    ///
    /// Fails with [`ClassifierError::UnknownClass`] when the identifier has
    /// no entry; the caller decides whether that is a hard stop or a
    /// degraded result.
    pub fn resolve(&self, class_id: &str) -> Result<String> {
        self.taxa
            .get(class_id)
            .map(|raw| format_species_name(raw))
            .ok_or_else(|| ClassifierError::UnknownClass(class_id.to_string()))
    }

    /// Resolves a model output index directly to `(class_id, species_name)`.
    pub fn resolve_index(&self, index: usize) -> Result<(String, String)> {
        let class_id = self
            .class_id(index)
            .ok_or_else(|| ClassifierError::UnknownClass(index.to_string()))?;
        let name = self.resolve(class_id)?;
        Ok((class_id.to_string(), name))
    }
}
