//! Artifact bundles: everything needed to run one compiled model variant.
//!
//! A bundle is a directory holding a graph description, a parameter blob,
//! the compiled module binary and a `manifest.json` describing the entry
//! point. Manifest fields that are absent take the bundle format's default
//! file names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tensorwasm_core::error::{BridgeError, Result};
use tensorwasm_core::types::DataType;

/// Name of the manifest file inside a bundle directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Top-level graph key written by the model exporter and not understood by
/// the graph runtime.
const STRAY_GRAPH_KEY: &str = "leip";

/// Class indices in an indexed label file must stay below this.
const MAX_LABEL_INDEX: usize = 1 << 20;

/// Entry-point metadata for a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelManifest {
    /// Graph description file.
    pub graph: String,
    /// Parameter blob file.
    pub params: String,
    /// Compiled module binary.
    #[serde(alias = "wasm")]
    pub library: String,
    /// Optional label file: a JSON array, or an object keyed by class index.
    pub labels: Option<String>,
    /// Graph input bound by the classifier.
    pub input_name: String,
    /// Input tensor shape.
    pub input_shape: Vec<i64>,
    /// Output tensor shape.
    pub output_shape: Vec<i64>,
    /// Input element type.
    pub input_type: DataType,
    /// Output element type, the input type when absent.
    pub output_type: Option<DataType>,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            graph: "modelDescription.json".to_string(),
            params: "modelParams.params".to_string(),
            library: "modelLibrary.wasm".to_string(),
            labels: None,
            input_name: "input_1".to_string(),
            input_shape: vec![1, 3, 224, 224],
            output_shape: vec![1, 10],
            input_type: DataType::FLOAT32,
            output_type: None,
        }
    }
}

impl ModelManifest {
    /// Effective output element type.
    pub fn output_type(&self) -> DataType {
        self.output_type.unwrap_or(self.input_type)
    }

    /// Whether the input is quantized to 8 bits.
    pub fn is_quantized(&self) -> bool {
        self.input_type == DataType::INT8 || self.input_type == DataType::UINT8
    }
}

/// A loaded bundle.
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    dir: PathBuf,
    manifest: ModelManifest,
    graph_json: String,
    params: Vec<u8>,
    library: Vec<u8>,
    labels: Option<Vec<String>>,
    read_time: Duration,
}

impl ArtifactBundle {
    /// Load a bundle, reading its `manifest.json`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let path = dir.join(MANIFEST_FILE);
        let text = read_to_string(&path)?;
        let manifest = serde_json::from_str(&text).map_err(|e| BridgeError::Artifact {
            path,
            cause: e.to_string(),
        })?;
        Self::load_with_manifest(dir, manifest)
    }

    /// Load a bundle described by `manifest` instead of `manifest.json`.
    pub fn load_with_manifest(dir: impl AsRef<Path>, manifest: ModelManifest) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let start = Instant::now();

        let graph_path = dir.join(&manifest.graph);
        let graph_json = strip_graph_json(&read_to_string(&graph_path)?, &graph_path)?;
        let params = read(&dir.join(&manifest.params))?;
        let library = read(&dir.join(&manifest.library))?;
        let labels = manifest
            .labels
            .as_ref()
            .map(|file| {
                let path = dir.join(file);
                parse_labels(&read_to_string(&path)?, &path)
            })
            .transpose()?;

        let read_time = start.elapsed();
        tracing::info!(
            dir = %dir.display(),
            params_bytes = params.len(),
            library_bytes = library.len(),
            labels = labels.as_ref().map_or(0, Vec::len),
            elapsed_ms = read_time.as_secs_f64() * 1000.0,
            "Loaded artifact bundle"
        );

        Ok(Self {
            dir,
            manifest,
            graph_json,
            params,
            library,
            labels,
            read_time,
        })
    }

    /// Bundle directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Manifest in effect.
    pub fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }

    /// Graph description with the stray exporter key removed.
    pub fn graph_json(&self) -> &str {
        &self.graph_json
    }

    /// Parameter blob.
    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// Compiled module binary.
    pub fn library(&self) -> &[u8] {
        &self.library
    }

    /// Class labels, if the manifest names a label file.
    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    /// Time spent reading every file.
    pub fn read_time(&self) -> Duration {
        self.read_time
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| BridgeError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| BridgeError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Drop the exporter's top-level key. Other unknown keys pass through.
fn strip_graph_json(text: &str, path: &Path) -> Result<String> {
    let invalid = |cause: String| BridgeError::Artifact {
        path: path.to_path_buf(),
        cause,
    };
    let mut graph: serde_json::Value =
        serde_json::from_str(text).map_err(|e| invalid(e.to_string()))?;
    let object = graph
        .as_object_mut()
        .ok_or_else(|| invalid("graph description is not a JSON object".to_string()))?;
    if object.remove(STRAY_GRAPH_KEY).is_some() {
        tracing::debug!(key = STRAY_GRAPH_KEY, "Stripped graph key");
    }
    serde_json::to_string(&graph).map_err(|e| invalid(e.to_string()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LabelFile {
    List(Vec<String>),
    Indexed(BTreeMap<String, String>),
}

fn parse_labels(text: &str, path: &Path) -> Result<Vec<String>> {
    let invalid = |cause: String| BridgeError::Artifact {
        path: path.to_path_buf(),
        cause,
    };
    match serde_json::from_str::<LabelFile>(text).map_err(|e| invalid(e.to_string()))? {
        LabelFile::List(labels) => Ok(labels),
        LabelFile::Indexed(map) => {
            let mut indexed = BTreeMap::new();
            for (key, label) in map {
                let index: usize = key
                    .parse()
                    .map_err(|_| invalid(format!("label key '{key}' is not a class index")))?;
                if index >= MAX_LABEL_INDEX {
                    return Err(invalid(format!(
                        "class index {index} exceeds the limit of {MAX_LABEL_INDEX}"
                    )));
                }
                indexed.insert(index, label);
            }
            let len = indexed.keys().next_back().map_or(0, |last| last + 1);
            let mut labels = vec![String::new(); len];
            for (index, label) in indexed {
                labels[index] = label;
            }
            Ok(labels)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_defaults_match_bundle_file_names() {
        let manifest: ModelManifest = serde_json::from_str("{}").unwrap();
        assert_eq!(manifest.graph, "modelDescription.json");
        assert_eq!(manifest.params, "modelParams.params");
        assert_eq!(manifest.library, "modelLibrary.wasm");
        assert_eq!(manifest.output_type(), DataType::FLOAT32);
        assert!(!manifest.is_quantized());
    }

    #[test]
    fn manifest_accepts_wasm_alias_and_dtype_strings() {
        let manifest: ModelManifest = serde_json::from_str(
            r#"{"wasm": "lib.wasm", "input_type": "uint8", "output_type": "float64",
                "input_shape": [1, 3, 96, 96], "output_shape": [1, 2]}"#,
        )
        .unwrap();
        assert_eq!(manifest.library, "lib.wasm");
        assert!(manifest.is_quantized());
        assert_eq!(manifest.output_type(), DataType::FLOAT64);
        assert_eq!(manifest.input_shape, vec![1, 3, 96, 96]);
    }

    #[test]
    fn output_type_defaults_to_input_type() {
        let manifest: ModelManifest =
            serde_json::from_str(r#"{"input_type": "uint8", "output_shape": [1, 4]}"#).unwrap();
        assert_eq!(manifest.output_type, None);
        assert_eq!(manifest.output_type(), DataType::UINT8);
    }

    #[test]
    fn manifest_rejects_unknown_dtype() {
        let parsed: std::result::Result<ModelManifest, _> =
            serde_json::from_str(r#"{"input_type": "complex64"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn stray_key_is_stripped_and_others_kept() {
        let path = Path::new("graph.json");
        let out = strip_graph_json(r#"{"nodes": [], "leip": {"v": 1}, "extra": 2}"#, path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(value.get("leip").is_none());
        assert_eq!(value["extra"], 2);
        assert!(value["nodes"].is_array());
    }

    #[test]
    fn graph_must_be_an_object() {
        assert!(matches!(
            strip_graph_json("[1, 2]", Path::new("g.json")),
            Err(BridgeError::Artifact { .. })
        ));
    }

    #[test]
    fn labels_from_list_or_index_map() {
        let path = Path::new("labels.json");
        assert_eq!(parse_labels(r#"["cat", "dog"]"#, path).unwrap(), vec!["cat", "dog"]);
        assert_eq!(
            parse_labels(r#"{"1": "dog", "0": "cat", "3": "owl"}"#, path).unwrap(),
            vec!["cat", "dog", "", "owl"]
        );
        assert!(parse_labels(r#"{"x": "cat"}"#, path).is_err());
    }

    #[test]
    fn huge_label_index_is_rejected() {
        let path = Path::new("labels.json");
        assert!(matches!(
            parse_labels(r#"{"4000000000": "x"}"#, path),
            Err(BridgeError::Artifact { ref cause, .. }) if cause.contains("4000000000")
        ));
        let edge = format!(r#"{{"{}": "last"}}"#, MAX_LABEL_INDEX - 1);
        assert_eq!(parse_labels(&edge, path).unwrap().len(), MAX_LABEL_INDEX);
    }
}
