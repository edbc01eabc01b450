//! Trained Classifier
//!
//! Compact convolutional network executed as a pure ndarray forward pass:
//! conv3x3 (same padding) -> batch-norm -> ReLU -> 2x2 max-pool blocks,
//! global average pooling, then a two-layer classifier head with softmax.
//!
//! Weights are loaded once from a serde JSON record and treated as
//! immutable shared state. Batch-norm uses the stored population
//! statistics, so repeated forward passes on the same input are
//! deterministic; there is no dropout at inference time.

use std::path::Path;

use ndarray::{Array1, Array2, Array3, Array4};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::classifier::{softmax, ClassProbabilityVector, Classifier};
use crate::error::{CoreError, Result};
use crate::preprocess::ImageTensor;

/// Epsilon for batch-norm variance
const BN_EPS: f32 = 1e-5;

/// One serialized tensor: shape plus row-major data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorRecord {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorRecord {
    fn expect_len(&self, name: &str) -> Result<()> {
        let expected: usize = self.shape.iter().product();
        if self.data.len() != expected {
            return Err(CoreError::Initialization(format!(
                "tensor '{}' has {} values but shape {:?} implies {}",
                name,
                self.data.len(),
                self.shape,
                expected
            )));
        }
        Ok(())
    }

    fn into_array1(self, name: &str) -> Result<Array1<f32>> {
        self.expect_len(name)?;
        if self.shape.len() != 1 {
            return Err(CoreError::Initialization(format!(
                "tensor '{}' must be rank 1, got shape {:?}",
                name, self.shape
            )));
        }
        Ok(Array1::from_vec(self.data))
    }

    fn into_array2(self, name: &str) -> Result<Array2<f32>> {
        self.expect_len(name)?;
        if self.shape.len() != 2 {
            return Err(CoreError::Initialization(format!(
                "tensor '{}' must be rank 2, got shape {:?}",
                name, self.shape
            )));
        }
        Array2::from_shape_vec((self.shape[0], self.shape[1]), self.data)
            .map_err(|e| CoreError::Initialization(format!("tensor '{}': {}", name, e)))
    }

    fn into_array4(self, name: &str) -> Result<Array4<f32>> {
        self.expect_len(name)?;
        if self.shape.len() != 4 {
            return Err(CoreError::Initialization(format!(
                "tensor '{}' must be rank 4, got shape {:?}",
                name, self.shape
            )));
        }
        Array4::from_shape_vec(
            (self.shape[0], self.shape[1], self.shape[2], self.shape[3]),
            self.data,
        )
        .map_err(|e| CoreError::Initialization(format!("tensor '{}': {}", name, e)))
    }
}

/// Serialized convolutional block: conv weights plus frozen batch-norm
/// population statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvBlockRecord {
    pub conv_weight: TensorRecord,
    pub conv_bias: TensorRecord,
    pub bn_gamma: TensorRecord,
    pub bn_beta: TensorRecord,
    pub bn_mean: TensorRecord,
    pub bn_var: TensorRecord,
}

/// Serialized linear layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRecord {
    pub weight: TensorRecord,
    pub bias: TensorRecord,
}

/// Full serialized model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Square input resolution the model was trained at
    pub input_size: u32,
    /// Number of output classes
    pub num_classes: usize,
    /// Convolutional blocks, in order
    pub blocks: Vec<ConvBlockRecord>,
    /// Hidden linear layer
    pub fc1: LinearRecord,
    /// Output linear layer
    pub fc2: LinearRecord,
}

impl ModelRecord {
    /// Load a record from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::Initialization(format!(
                "model weights not found at {:?}",
                path
            )));
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save a record to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Conv -> batch-norm (population stats) -> ReLU -> 2x2 max-pool
struct ConvBlock {
    weight: Array4<f32>, // [out_c, in_c, k, k]
    bias: Array1<f32>,
    bn_gamma: Array1<f32>,
    bn_beta: Array1<f32>,
    bn_mean: Array1<f32>,
    bn_var: Array1<f32>,
}

impl ConvBlock {
    fn from_record(record: ConvBlockRecord, expected_in: usize, index: usize) -> Result<Self> {
        let weight = record.conv_weight.into_array4("conv_weight")?;
        let (out_c, in_c, kh, kw) = weight.dim();

        if in_c != expected_in {
            return Err(CoreError::Initialization(format!(
                "block {}: expected {} input channels, record has {}",
                index, expected_in, in_c
            )));
        }
        if kh != kw || kh % 2 == 0 {
            return Err(CoreError::Initialization(format!(
                "block {}: kernel must be square with odd size, got {}x{}",
                index, kh, kw
            )));
        }

        let bias = record.conv_bias.into_array1("conv_bias")?;
        let bn_gamma = record.bn_gamma.into_array1("bn_gamma")?;
        let bn_beta = record.bn_beta.into_array1("bn_beta")?;
        let bn_mean = record.bn_mean.into_array1("bn_mean")?;
        let bn_var = record.bn_var.into_array1("bn_var")?;

        for (name, arr) in [
            ("conv_bias", &bias),
            ("bn_gamma", &bn_gamma),
            ("bn_beta", &bn_beta),
            ("bn_mean", &bn_mean),
            ("bn_var", &bn_var),
        ] {
            if arr.len() != out_c {
                return Err(CoreError::Initialization(format!(
                    "block {}: '{}' length {} does not match {} output channels",
                    index,
                    name,
                    arr.len(),
                    out_c
                )));
            }
        }

        Ok(Self {
            weight,
            bias,
            bn_gamma,
            bn_beta,
            bn_mean,
            bn_var,
        })
    }

    fn out_channels(&self) -> usize {
        self.weight.dim().0
    }

    fn forward(&self, input: &Array3<f32>) -> Array3<f32> {
        let x = conv2d_same(input, &self.weight, &self.bias);
        let x = self.batch_norm(x);
        let x = x.mapv(|v| v.max(0.0));
        max_pool2(&x)
    }

    fn batch_norm(&self, mut x: Array3<f32>) -> Array3<f32> {
        let (channels, _, _) = x.dim();
        for c in 0..channels {
            let scale = self.bn_gamma[c] / (self.bn_var[c] + BN_EPS).sqrt();
            let shift = self.bn_beta[c] - self.bn_mean[c] * scale;
            x.index_axis_mut(ndarray::Axis(0), c)
                .mapv_inplace(|v| v * scale + shift);
        }
        x
    }
}

/// Same-padding 2D convolution with stride 1.
fn conv2d_same(input: &Array3<f32>, weight: &Array4<f32>, bias: &Array1<f32>) -> Array3<f32> {
    let (in_c, height, width) = input.dim();
    let (out_c, _, k, _) = weight.dim();
    let pad = k / 2;

    let mut out = Array3::<f32>::zeros((out_c, height, width));

    for oc in 0..out_c {
        for y in 0..height {
            for x in 0..width {
                let mut acc = bias[oc];
                for ic in 0..in_c {
                    for ky in 0..k {
                        let iy = y as isize + ky as isize - pad as isize;
                        if iy < 0 || iy >= height as isize {
                            continue;
                        }
                        for kx in 0..k {
                            let ix = x as isize + kx as isize - pad as isize;
                            if ix < 0 || ix >= width as isize {
                                continue;
                            }
                            acc += input[[ic, iy as usize, ix as usize]]
                                * weight[[oc, ic, ky, kx]];
                        }
                    }
                }
                out[[oc, y, x]] = acc;
            }
        }
    }

    out
}

/// 2x2 max-pool with stride 2 (floor semantics on odd sizes).
fn max_pool2(input: &Array3<f32>) -> Array3<f32> {
    let (channels, height, width) = input.dim();
    let (oh, ow) = ((height / 2).max(1), (width / 2).max(1));
    let mut out = Array3::<f32>::from_elem((channels, oh, ow), f32::NEG_INFINITY);

    for c in 0..channels {
        for y in 0..oh {
            for x in 0..ow {
                let mut best = f32::NEG_INFINITY;
                for dy in 0..2 {
                    let iy = y * 2 + dy;
                    if iy >= height {
                        continue;
                    }
                    for dx in 0..2 {
                        let ix = x * 2 + dx;
                        if ix >= width {
                            continue;
                        }
                        best = best.max(input[[c, iy, ix]]);
                    }
                }
                out[[c, y, x]] = best;
            }
        }
    }

    out
}

/// Global average pool: [C, H, W] -> [C]
fn global_avg_pool(input: &Array3<f32>) -> Array1<f32> {
    let (channels, height, width) = input.dim();
    let n = (height * width) as f32;
    let mut out = Array1::<f32>::zeros(channels);
    for c in 0..channels {
        out[c] = input.index_axis(ndarray::Axis(0), c).sum() / n;
    }
    out
}

struct Linear {
    weight: Array2<f32>, // [out, in]
    bias: Array1<f32>,
}

impl Linear {
    fn from_record(record: LinearRecord, name: &str) -> Result<Self> {
        let weight = record.weight.into_array2("weight")?;
        let bias = record.bias.into_array1("bias")?;
        if bias.len() != weight.dim().0 {
            return Err(CoreError::Initialization(format!(
                "linear layer '{}': bias length {} does not match {} outputs",
                name,
                bias.len(),
                weight.dim().0
            )));
        }
        Ok(Self { weight, bias })
    }

    fn forward(&self, x: &Array1<f32>) -> Array1<f32> {
        self.weight.dot(x) + &self.bias
    }
}

struct CnnModel {
    blocks: Vec<ConvBlock>,
    fc1: Linear,
    fc2: Linear,
}

impl CnnModel {
    fn forward(&self, input: &Array3<f32>) -> Result<Array1<f32>> {
        let mut x = input.clone();
        for block in &self.blocks {
            x = block.forward(&x);
        }
        let pooled = global_avg_pool(&x);
        let hidden = self.fc1.forward(&pooled).mapv(|v| v.max(0.0));
        let logits = self.fc2.forward(&hidden);
        if logits.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::Inference(
                "non-finite value produced by forward pass".to_string(),
            ));
        }
        Ok(logits)
    }
}

/// Classifier backed by trained CNN weights.
pub struct TrainedClassifier {
    input_size: u32,
    num_classes: usize,
    model: Option<CnnModel>,
}

impl std::fmt::Debug for TrainedClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainedClassifier")
            .field("input_size", &self.input_size)
            .field("num_classes", &self.num_classes)
            .field("loaded", &self.model.is_some())
            .finish()
    }
}

impl TrainedClassifier {
    /// Create an unloaded classifier shell. Forward passes fail with
    /// `ModelNotLoaded` until a record is loaded.
    pub fn unloaded(input_size: u32, num_classes: usize) -> Self {
        Self {
            input_size,
            num_classes,
            model: None,
        }
    }

    /// Build a classifier from a weight record, validating layer shapes.
    pub fn from_record(record: ModelRecord) -> Result<Self> {
        if record.num_classes == 0 {
            return Err(CoreError::Initialization(
                "model record declares zero classes".to_string(),
            ));
        }
        if record.blocks.is_empty() {
            return Err(CoreError::Initialization(
                "model record has no convolutional blocks".to_string(),
            ));
        }

        let input_size = record.input_size;
        let num_classes = record.num_classes;

        let mut blocks = Vec::with_capacity(record.blocks.len());
        let mut channels = 3;
        for (i, block_record) in record.blocks.into_iter().enumerate() {
            let block = ConvBlock::from_record(block_record, channels, i)?;
            channels = block.out_channels();
            blocks.push(block);
        }

        let fc1 = Linear::from_record(record.fc1, "fc1")?;
        if fc1.weight.dim().1 != channels {
            return Err(CoreError::Initialization(format!(
                "fc1 expects {} inputs but final block produces {} channels",
                fc1.weight.dim().1,
                channels
            )));
        }

        let fc2 = Linear::from_record(record.fc2, "fc2")?;
        if fc2.weight.dim().1 != fc1.weight.dim().0 {
            return Err(CoreError::Initialization(
                "fc2 input width does not match fc1 output width".to_string(),
            ));
        }
        if fc2.weight.dim().0 != num_classes {
            return Err(CoreError::Initialization(format!(
                "fc2 produces {} outputs but record declares {} classes",
                fc2.weight.dim().0,
                num_classes
            )));
        }

        info!(
            input_size,
            num_classes,
            blocks = blocks.len(),
            "trained classifier loaded"
        );

        Ok(Self {
            input_size,
            num_classes,
            model: Some(CnnModel { blocks, fc1, fc2 }),
        })
    }

    /// Load a classifier from a JSON weight record on disk.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_record(ModelRecord::load(path)?)
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }
}

impl Classifier for TrainedClassifier {
    fn class_count(&self) -> usize {
        self.num_classes
    }

    fn forward(&self, tensor: &ImageTensor) -> Result<ClassProbabilityVector> {
        let model = self.model.as_ref().ok_or(CoreError::ModelNotLoaded)?;
        if tensor.size() != self.input_size as usize {
            return Err(CoreError::Inference(format!(
                "tensor size {} does not match model input size {}",
                tensor.size(),
                self.input_size
            )));
        }
        let logits = model.forward(tensor.data())?;
        softmax(&logits)
    }
}
