//! Classifier architecture and checkpoint loading.
//!
//! The network mirrors the checkpoint this service is deployed with: three
//! conv/relu/maxpool blocks, global average pooling, and a two-layer head.
//! Checkpoints carry parameters only, so the architecture is rebuilt here
//! with the class count inferred from the head weight and the parameters
//! copied in by name.

use std::path::Path;

use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{D, DType, Device, Tensor};
use candle_nn::ops::softmax;
use candle_nn::{Conv2d, Conv2dConfig, Linear, Module, VarBuilder, VarMap};

use crate::checkpoint;
use crate::error::ModelError;

/// Pick the compute device, preferring accelerators unless pinned to CPU.
pub fn device(cpu: bool) -> candle_core::Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if metal_is_available() {
        tracing::info!("Using metal acceleration");
        Device::new_metal(0)
    } else if cuda_is_available() {
        tracing::info!("Using CUDA GPU acceleration");
        Device::new_cuda(0)
    } else {
        tracing::info!(
            "CUDA not available, running on CPU. To run on GPU, build with `--features cuda`"
        );
        Ok(Device::Cpu)
    }
}

/// Outcome of a lenient parameter load.
///
/// Parameters are copied into the freshly built architecture by name;
/// anything that does not line up is recorded here instead of failing the
/// load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
    pub shape_mismatch: Vec<String>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.shape_mismatch.is_empty()
    }
}

#[derive(Debug)]
struct LeafCnn {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    fc: Linear,
    classifier: Linear,
}

impl LeafCnn {
    fn new(vb: VarBuilder, num_classes: usize) -> candle_core::Result<Self> {
        let conv_cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let conv1 = candle_nn::conv2d(3, 16, 3, conv_cfg, vb.pp("conv1"))?;
        let conv2 = candle_nn::conv2d(16, 32, 3, conv_cfg, vb.pp("conv2"))?;
        let conv3 = candle_nn::conv2d(32, 64, 3, conv_cfg, vb.pp("conv3"))?;
        let fc = candle_nn::linear(64, 128, vb.pp("fc"))?;
        let classifier = candle_nn::linear(128, num_classes, vb.pp("classifier"))?;
        Ok(Self {
            conv1,
            conv2,
            conv3,
            fc,
            classifier,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = self.conv1.forward(xs)?.relu()?.max_pool2d(2)?;
        let xs = self.conv2.forward(&xs)?.relu()?.max_pool2d(2)?;
        let xs = self.conv3.forward(&xs)?.relu()?.max_pool2d(2)?;
        // Global average pool: (B, C, H, W) -> (B, C)
        let xs = xs.flatten_from(2)?.mean(D::Minus1)?;
        let xs = self.fc.forward(&xs)?.relu()?;
        self.classifier.forward(&xs)
    }
}

/// The loaded classifier, immutable after load and shared read-only across
/// requests.
#[derive(Debug)]
pub struct DiseaseModel {
    net: LeafCnn,
    num_classes: usize,
    device: Device,
}

impl DiseaseModel {
    /// Load a checkpoint from `path`, building the architecture around the
    /// inferred class count (`fallback_classes` when the checkpoint carries
    /// no recognizable head).
    #[tracing::instrument(skip(device))]
    pub fn load(
        path: &Path,
        device: &Device,
        fallback_classes: usize,
    ) -> Result<(Self, LoadReport), ModelError> {
        let entries = checkpoint::read_checkpoint(path, device)?;
        let entries = checkpoint::normalize_names(entries);

        let num_classes = match checkpoint::infer_num_classes(&entries) {
            Some(n) => n,
            None => {
                tracing::warn!(
                    fallback_classes,
                    "No classifier head found in checkpoint, using fallback class count"
                );
                fallback_classes
            }
        };
        if num_classes != fallback_classes {
            tracing::warn!(
                checkpoint_classes = num_classes,
                taxonomy_classes = fallback_classes,
                "Checkpoint class count differs from taxonomy, rankings will be truncated"
            );
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let net = LeafCnn::new(vb, num_classes)?;
        let report = copy_parameters(&varmap, &entries, device)?;

        tracing::debug!(
            loaded = report.loaded.len(),
            missing = report.missing.len(),
            unexpected = report.unexpected.len(),
            shape_mismatch = report.shape_mismatch.len(),
            "Checkpoint parameters applied"
        );

        Ok((
            Self {
                net,
                num_classes,
                device: device.clone(),
            },
            report,
        ))
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// One forward pass over a `(1, 3, H, W)` batch, softmaxed over the
    /// class dimension. No gradients are tracked; the graph is inference
    /// only.
    pub fn predict_probs(&self, input: &Tensor) -> candle_core::Result<Vec<f32>> {
        let logits = self.net.forward(input)?;
        let probs = softmax(&logits, 1)?;
        probs.squeeze(0)?.to_vec1::<f32>()
    }
}

/// Copy checkpoint parameters into the built architecture by name,
/// tolerating missing, unexpected, and differently shaped entries.
fn copy_parameters(
    varmap: &VarMap,
    entries: &[(String, Tensor)],
    device: &Device,
) -> candle_core::Result<LoadReport> {
    let vars = varmap.data().lock().unwrap();
    let mut report = LoadReport::default();

    for (name, tensor) in entries {
        match vars.get(name) {
            Some(var) if var.shape() == tensor.shape() => {
                var.set(&tensor.to_dtype(var.dtype())?.to_device(device)?)?;
                report.loaded.push(name.clone());
            }
            Some(_) => report.shape_mismatch.push(name.clone()),
            None => report.unexpected.push(name.clone()),
        }
    }

    for name in vars.keys() {
        if !entries.iter().any(|(n, _)| n == name) {
            report.missing.push(name.clone());
        }
    }

    report.missing.sort();
    report.unexpected.sort();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes;

    fn fresh_state(num_classes: usize) -> Vec<(String, Tensor)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        LeafCnn::new(vb, num_classes).unwrap();
        let vars = varmap.data().lock().unwrap();
        let mut entries: Vec<_> = vars
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    #[test]
    fn test_forward_shape_and_softmax_sum() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let net = LeafCnn::new(vb, classes::NUM_CLASSES).unwrap();
        let model = DiseaseModel {
            net,
            num_classes: classes::NUM_CLASSES,
            device: Device::Cpu,
        };

        // The global average pool makes the net input-size agnostic, so a
        // small input keeps this test fast.
        let input = Tensor::zeros((1, 3, 64, 64), DType::F32, &Device::Cpu).unwrap();
        let probs = model.predict_probs(&input).unwrap();

        assert_eq!(probs.len(), classes::NUM_CLASSES);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_clean_parameter_copy() {
        let entries = fresh_state(classes::NUM_CLASSES);

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        LeafCnn::new(vb, classes::NUM_CLASSES).unwrap();

        let report = copy_parameters(&varmap, &entries, &Device::Cpu).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.loaded.len(), entries.len());
    }

    #[test]
    fn test_lenient_copy_reports_mismatches() {
        let mut entries = fresh_state(classes::NUM_CLASSES);
        // Drop one parameter, rename another, and break a shape.
        entries.retain(|(name, _)| name != "conv1.bias");
        entries.push((
            "optimizer.momentum".to_string(),
            Tensor::zeros(4, DType::F32, &Device::Cpu).unwrap(),
        ));
        for (name, tensor) in entries.iter_mut() {
            if name.as_str() == "fc.bias" {
                *tensor = Tensor::zeros(7, DType::F32, &Device::Cpu).unwrap();
            }
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        LeafCnn::new(vb, classes::NUM_CLASSES).unwrap();

        let report = copy_parameters(&varmap, &entries, &Device::Cpu).unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.missing, vec!["conv1.bias".to_string()]);
        assert_eq!(report.unexpected, vec!["optimizer.momentum".to_string()]);
        assert_eq!(report.shape_mismatch, vec!["fc.bias".to_string()]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = DiseaseModel::load(
            Path::new("/no/such/model.safetensors"),
            &Device::Cpu,
            classes::NUM_CLASSES,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::NotFound(_)));
    }
}
