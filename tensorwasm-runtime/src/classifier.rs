//! Image classifier over an artifact bundle.
//!
//! Setup runs the whole load sequence once: instantiate the module, take
//! its system library, create the graph executor, load the parameters and
//! preallocate the input and output tensors. Each
//! [`classify`](Classifier::classify) then reuses those tensors.

use crate::bundle::ArtifactBundle;
use crate::engine::WasmRuntime;
use crate::env::Imports;
use crate::graph::GraphExecutor;
use crate::instance::Instance;
use crate::module::RuntimeModule;
use crate::tensor::Tensor;
use std::path::Path;
use std::time::{Duration, Instant};
use tensorwasm_core::error::Result;
use tensorwasm_core::types::HostArray;

/// How long each setup phase took.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadTimings {
    /// Reading the bundle files.
    pub read_artifacts: Duration,
    /// Instantiating the module and creating the executor.
    pub instantiate: Duration,
    /// Loading parameters and allocating tensors.
    pub populate_weights: Duration,
}

impl LoadTimings {
    /// Sum of every phase.
    pub fn total(&self) -> Duration {
        self.read_artifacts + self.instantiate + self.populate_weights
    }
}

/// Result of one classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Class indices, highest score first.
    pub ranking: Vec<usize>,
    /// Raw output scores by class index.
    pub scores: Vec<f64>,
}

impl Classification {
    fn from_scores(scores: Vec<f64>) -> Self {
        let mut ranking: Vec<usize> = (0..scores.len()).collect();
        ranking.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        Self { ranking, scores }
    }

    /// Index of the best class.
    pub fn top1(&self) -> Option<usize> {
        self.ranking.first().copied()
    }

    /// The best `k` classes with their scores.
    pub fn top_k(&self, k: usize) -> Vec<(usize, f64)> {
        self.ranking
            .iter()
            .take(k)
            .map(|&i| (i, self.scores[i]))
            .collect()
    }
}

/// A model ready to classify inputs.
pub struct Classifier {
    instance: Instance,
    system_lib: RuntimeModule,
    executor: GraphExecutor,
    input: Tensor,
    output: Tensor,
    input_name: String,
    labels: Option<Vec<String>>,
    timings: LoadTimings,
}

impl Classifier {
    /// Load the bundle in `dir` and set it up with WASI linked.
    pub fn load(runtime: &WasmRuntime, dir: impl AsRef<Path>) -> Result<Self> {
        let bundle = ArtifactBundle::load(dir)?;
        Self::setup(runtime, &bundle, Imports::new().with_wasi())
    }

    /// Set up a loaded bundle.
    ///
    /// Quantized inputs get the `env.roundf` shim their kernels import.
    pub fn setup(runtime: &WasmRuntime, bundle: &ArtifactBundle, imports: Imports) -> Result<Self> {
        let manifest = bundle.manifest();
        let _span = crate::instrument_model!(manifest.library, "setup").entered();
        let imports = if manifest.is_quantized() {
            imports.with_math_shims()
        } else {
            imports
        };

        let start = Instant::now();
        let mut instance = Instance::from_bytes(runtime, &manifest.library, bundle.library(), imports)?;
        let device = instance.cpu(0);
        let system_lib = instance.system_lib()?;
        let mut executor =
            instance.create_graph_executor(bundle.graph_json(), &system_lib, device)?;
        let instantiate = start.elapsed();

        let start = Instant::now();
        executor.load_params(&mut instance, bundle.params())?;
        let input = instance.create_tensor_typed(&manifest.input_shape, manifest.input_type, device)?;
        let output =
            instance.create_tensor_typed(&manifest.output_shape, manifest.output_type(), device)?;
        let populate_weights = start.elapsed();

        let timings = LoadTimings {
            read_artifacts: bundle.read_time(),
            instantiate,
            populate_weights,
        };
        tracing::info!(
            module = %manifest.library,
            read_ms = timings.read_artifacts.as_secs_f64() * 1000.0,
            instantiate_ms = timings.instantiate.as_secs_f64() * 1000.0,
            populate_ms = timings.populate_weights.as_secs_f64() * 1000.0,
            "Classifier ready"
        );

        Ok(Self {
            instance,
            system_lib,
            executor,
            input,
            output,
            input_name: manifest.input_name.clone(),
            labels: bundle.labels().map(<[String]>::to_vec),
            timings,
        })
    }

    /// Classify a host array matching the input shape.
    pub fn classify(&mut self, input: &HostArray) -> Result<Classification> {
        self.input.copy_from_host(&mut self.instance, input)?;
        self.infer()
    }

    /// Classify raw little-endian input bytes in the input dtype.
    pub fn classify_raw(&mut self, bytes: &[u8]) -> Result<Classification> {
        self.input.copy_from_raw_bytes(&mut self.instance, bytes)?;
        self.infer()
    }

    fn infer(&mut self) -> Result<Classification> {
        self.executor
            .set_input(&mut self.instance, self.input_name.as_str(), &self.input)?;
        self.executor.run(&mut self.instance)?;
        self.executor
            .get_output_into(&mut self.instance, 0, &self.output)?;
        let scores = self.output.to_host_array(&mut self.instance)?.to_f64_vec();
        Ok(Classification::from_scores(scores))
    }

    /// Milliseconds per run for each of `repeat` batches of `number` runs.
    pub async fn benchmark(&mut self, number: usize, repeat: usize) -> Result<Vec<f64>> {
        self.executor
            .set_input(&mut self.instance, self.input_name.as_str(), &self.input)?;
        self.executor
            .benchmark(&mut self.instance, number, repeat)
            .await
    }

    /// Label of class `index`, if labels were loaded.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.as_ref()?.get(index).map(String::as_str)
    }

    /// All labels, if loaded.
    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    /// Setup timings.
    pub fn timings(&self) -> LoadTimings {
        self.timings
    }

    /// The underlying instance.
    pub fn instance_mut(&mut self) -> &mut Instance {
        &mut self.instance
    }

    /// Release every tensor, function and module, then the instance.
    pub fn dispose(mut self) -> Result<()> {
        self.input.dispose(&mut self.instance)?;
        self.output.dispose(&mut self.instance)?;
        self.executor.dispose(&mut self.instance)?;
        self.system_lib.dispose(&mut self.instance)?;
        self.instance.dispose()
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("instance", &self.instance)
            .field("input_name", &self.input_name)
            .field("input_shape", &self.input.shape())
            .field("output_shape", &self.output.shape())
            .field("timings", &self.timings)
            .finish()
    }
}
