//! Checkpoint loading and saving
//!
//! Two on-disk formats are accepted, chosen by file extension:
//! - `.pth` / `.pt`: a PyTorch `state_dict` written by the training code
//! - `.mpk`: a Burn compact record written by [`save_classifier`]
//!
//! PyTorch checkpoints name parameters `model.layer2.0.downsample.1.weight`;
//! the key remaps below translate those into this crate's module tree
//! (`layer2.blocks.0.downsample.bn.gamma`). Linear weights are transposed and
//! BatchNorm weight/bias renamed by the PyTorch recorder itself.

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{CompactRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use tracing::debug;

use super::resnet::{MedicalClassifier, MedicalClassifierConfig, MedicalClassifierRecord};
use crate::utils::error::{Result, XrayError};

/// Extensions tried, in order, when resolving a checkpoint stem to a file
pub const CHECKPOINT_EXTENSIONS: [&str; 3] = ["pth", "pt", "mpk"];

/// Regex remaps from PyTorch parameter names to module paths, applied in order
const PYTORCH_KEY_REMAPS: [(&str, &str); 4] = [
    // The training wrapper stores the torchvision network under `model`
    (r"^model\.(.+)$", "$1"),
    (r"downsample\.0\.", "downsample.conv."),
    (r"downsample\.1\.", "downsample.bn."),
    (r"^(layer[1-4])\.([0-9]+)\.", "$1.blocks.$2."),
];

/// On-disk checkpoint format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    /// PyTorch pickle (`state_dict`)
    PyTorch,
    /// Burn named MessagePack record
    Burn,
}

impl CheckpointFormat {
    /// Detect the format from a path's extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "pth" | "pt" => Some(Self::PyTorch),
            "mpk" => Some(Self::Burn),
            _ => None,
        }
    }
}

/// Find an existing checkpoint file for `stem` inside `dir`
///
/// Tries each of [`CHECKPOINT_EXTENSIONS`] in order and returns the first
/// file that exists.
pub fn resolve_checkpoint(dir: &Path, stem: &str) -> Option<PathBuf> {
    CHECKPOINT_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", stem, ext)))
        .find(|path| path.is_file())
}

fn pytorch_load_args(path: &Path) -> LoadArgs {
    PYTORCH_KEY_REMAPS
        .iter()
        .fold(LoadArgs::new(path.to_path_buf()), |args, (pattern, replacement)| {
            args.with_key_remap(pattern, replacement)
        })
}

/// Load a classifier from a checkpoint file
///
/// The architecture is built from `config` and the checkpoint's weights are
/// loaded into it. Shape mismatches on the stem or head are reported as
/// [`XrayError::CheckpointLoad`].
pub fn load_classifier<B: Backend>(
    path: &Path,
    config: &MedicalClassifierConfig,
    device: &B::Device,
) -> Result<MedicalClassifier<B>> {
    let format = CheckpointFormat::from_path(path).ok_or_else(|| {
        XrayError::CheckpointLoad(path.to_path_buf(), "unknown checkpoint extension".to_string())
    })?;

    debug!("Loading {:?} checkpoint from {:?}", format, path);

    let model = MedicalClassifier::new(config, device);
    let model = match format {
        CheckpointFormat::PyTorch => {
            let record: MedicalClassifierRecord<B> =
                PyTorchFileRecorder::<FullPrecisionSettings>::default()
                    .load(pytorch_load_args(path), device)
                    .map_err(|e| XrayError::CheckpointLoad(path.to_path_buf(), format!("{:?}", e)))?;
            model.load_record(record)
        }
        CheckpointFormat::Burn => model
            .load_file(path, &CompactRecorder::new(), device)
            .map_err(|e| XrayError::CheckpointLoad(path.to_path_buf(), format!("{:?}", e)))?,
    };

    model
        .check_architecture(config)
        .map_err(|e| XrayError::CheckpointLoad(path.to_path_buf(), e))?;

    Ok(model)
}

/// Save a classifier as a Burn compact record
///
/// The recorder sets the `.mpk` extension; the path actually written is
/// returned.
pub fn save_classifier<B: Backend>(model: &MedicalClassifier<B>, path: &Path) -> Result<PathBuf> {
    let written = path.with_extension("mpk");

    model
        .clone()
        .save_file(path, &CompactRecorder::new())
        .map_err(|e| XrayError::CheckpointSave(path.to_path_buf(), format!("{:?}", e)))?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::resnet::FEATURE_DIM;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use std::io::Write;
    use tempfile::tempdir;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            CheckpointFormat::from_path(Path::new("central_model.pth")),
            Some(CheckpointFormat::PyTorch)
        );
        assert_eq!(
            CheckpointFormat::from_path(Path::new("client_1_model.PT")),
            Some(CheckpointFormat::PyTorch)
        );
        assert_eq!(
            CheckpointFormat::from_path(Path::new("client_1_model.mpk")),
            Some(CheckpointFormat::Burn)
        );
        assert_eq!(CheckpointFormat::from_path(Path::new("notes.txt")), None);
        assert_eq!(CheckpointFormat::from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn test_resolve_checkpoint_prefers_pth() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("central_model.mpk"), b"x").unwrap();
        assert_eq!(
            resolve_checkpoint(dir.path(), "central_model"),
            Some(dir.path().join("central_model.mpk"))
        );

        std::fs::write(dir.path().join("central_model.pth"), b"x").unwrap();
        assert_eq!(
            resolve_checkpoint(dir.path(), "central_model"),
            Some(dir.path().join("central_model.pth"))
        );

        assert_eq!(resolve_checkpoint(dir.path(), "client_4_model"), None);
    }

    #[test]
    fn test_key_remaps_translate_pytorch_names() {
        let remap = |key: &str| -> String {
            PYTORCH_KEY_REMAPS.iter().fold(key.to_string(), |name, (pattern, replacement)| {
                regex_replace(pattern, &name, replacement)
            })
        };

        assert_eq!(remap("model.conv1.weight"), "conv1.weight");
        assert_eq!(remap("model.fc.bias"), "fc.bias");
        assert_eq!(
            remap("model.layer2.0.downsample.1.running_var"),
            "layer2.blocks.0.downsample.bn.running_var"
        );
        assert_eq!(
            remap("model.layer4.1.conv2.weight"),
            "layer4.blocks.1.conv2.weight"
        );
        // Checkpoints saved from a bare ResNet have no wrapper prefix
        assert_eq!(remap("layer1.0.bn1.bias"), "layer1.blocks.0.bn1.bias");
    }

    fn regex_replace(pattern: &str, text: &str, replacement: &str) -> String {
        regex::Regex::new(pattern)
            .unwrap()
            .replace_all(text, replacement)
            .to_string()
    }

    #[test]
    fn test_save_and_load_burn_checkpoint() {
        let dir = tempdir().unwrap();
        let device = Default::default();
        let config = MedicalClassifierConfig::new();
        let model = config.init::<TestBackend>(&device);

        let written = save_classifier(&model, &dir.path().join("central_model")).unwrap();
        assert_eq!(written, dir.path().join("central_model.mpk"));
        assert!(written.is_file());

        let loaded = load_classifier::<TestBackend>(&written, &config, &device).unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 224, 224], &device);
        let expected: Vec<f32> = model.forward_softmax(input.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32> = loaded.forward_softmax(input).into_data().to_vec().unwrap();

        // Compact records store half precision weights
        for (a, e) in actual.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-2, "{} vs {}", a, e);
        }
    }

    #[test]
    fn test_load_corrupt_pytorch_checkpoint_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client_3_model.pth");
        std::fs::write(&path, b"definitely not a pickle").unwrap();

        let result =
            load_classifier::<TestBackend>(&path, &MedicalClassifierConfig::new(), &Default::default());
        assert!(matches!(result, Err(XrayError::CheckpointLoad(p, _)) if p == path));
    }

    /// Storage of one tensor in a `torch.save` archive
    enum TorchStorage {
        Float(Vec<f32>),
        Long(Vec<i64>),
    }

    impl TorchStorage {
        fn class_name(&self) -> &'static str {
            match self {
                TorchStorage::Float(_) => "FloatStorage",
                TorchStorage::Long(_) => "LongStorage",
            }
        }

        fn len(&self) -> usize {
            match self {
                TorchStorage::Float(v) => v.len(),
                TorchStorage::Long(v) => v.len(),
            }
        }

        fn to_le_bytes(&self) -> Vec<u8> {
            match self {
                TorchStorage::Float(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
                TorchStorage::Long(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            }
        }
    }

    struct TorchTensor {
        key: String,
        shape: Vec<usize>,
        storage: TorchStorage,
    }

    /// A torchvision ResNet-18 `state_dict` wrapped under `model.`, written
    /// in the zip layout of `torch.save`
    struct TorchStateDict {
        tensors: Vec<TorchTensor>,
    }

    /// Deterministic values in [0, 1), different for every tensor
    fn pattern(seed: usize, i: usize) -> f32 {
        ((i * 31 + seed * 17) % 101) as f32 / 101.0
    }

    impl TorchStateDict {
        fn resnet18() -> Self {
            let mut dict = Self { tensors: Vec::new() };

            dict.conv("conv1.weight", [64, 3, 7, 7]);
            dict.batch_norm("bn1", 64);

            let mut in_channels = 64;
            for (stage, out_channels) in [64, 128, 256, 512].into_iter().enumerate() {
                for block in 0..2 {
                    let prefix = format!("layer{}.{}", stage + 1, block);
                    let block_in = if block == 0 { in_channels } else { out_channels };

                    dict.conv(&format!("{}.conv1.weight", prefix), [out_channels, block_in, 3, 3]);
                    dict.batch_norm(&format!("{}.bn1", prefix), out_channels);
                    dict.conv(&format!("{}.conv2.weight", prefix), [out_channels, out_channels, 3, 3]);
                    dict.batch_norm(&format!("{}.bn2", prefix), out_channels);

                    if block == 0 && stage > 0 {
                        dict.conv(&format!("{}.downsample.0.weight", prefix), [out_channels, block_in, 1, 1]);
                        dict.batch_norm(&format!("{}.downsample.1", prefix), out_channels);
                    }
                }
                in_channels = out_channels;
            }

            dict.push("fc.weight", &[2, FEATURE_DIM], |p| (p - 0.5) / FEATURE_DIM as f32);
            dict.push("fc.bias", &[2], |p| (p - 0.5) * 0.1);

            dict
        }

        fn push(&mut self, key: &str, shape: &[usize], value: impl Fn(f32) -> f32) {
            let seed = self.tensors.len();
            let numel: usize = shape.iter().product();
            let data = (0..numel).map(|i| value(pattern(seed, i))).collect();

            self.tensors.push(TorchTensor {
                key: format!("model.{}", key),
                shape: shape.to_vec(),
                storage: TorchStorage::Float(data),
            });
        }

        /// Weights bounded by 0.5 / fan_in keep activations finite through the net
        fn conv(&mut self, key: &str, shape: [usize; 4]) {
            let fan_in = (shape[1] * shape[2] * shape[3]) as f32;
            self.push(key, &shape, |p| (p - 0.5) / fan_in);
        }

        fn batch_norm(&mut self, prefix: &str, channels: usize) {
            self.push(&format!("{}.weight", prefix), &[channels], |p| 0.5 + p);
            self.push(&format!("{}.bias", prefix), &[channels], |p| (p - 0.5) * 0.1);
            self.push(&format!("{}.running_mean", prefix), &[channels], |p| (p - 0.5) * 0.1);
            self.push(&format!("{}.running_var", prefix), &[channels], |p| 1.0 + p);
            self.tensors.push(TorchTensor {
                key: format!("model.{}.num_batches_tracked", prefix),
                shape: Vec::new(),
                storage: TorchStorage::Long(vec![120]),
            });
        }

        fn values(&self, key: &str) -> &[f32] {
            match self.tensors.iter().find(|t| t.key == key).map(|t| &t.storage) {
                Some(TorchStorage::Float(values)) => values,
                _ => panic!("no float tensor named {}", key),
            }
        }

        /// Protocol 2 pickle of an `OrderedDict` of `_rebuild_tensor_v2` calls
        fn pickle(&self) -> Vec<u8> {
            fn global(out: &mut Vec<u8>, module: &str, name: &str) {
                out.push(b'c');
                out.extend_from_slice(format!("{}\n{}\n", module, name).as_bytes());
            }
            fn unicode(out: &mut Vec<u8>, text: &str) {
                out.push(b'X');
                out.extend_from_slice(&(text.len() as u32).to_le_bytes());
                out.extend_from_slice(text.as_bytes());
            }
            fn int(out: &mut Vec<u8>, value: usize) {
                out.push(b'J');
                out.extend_from_slice(&(value as i32).to_le_bytes());
            }
            fn int_tuple(out: &mut Vec<u8>, values: &[usize]) {
                if values.is_empty() {
                    out.push(b')');
                    return;
                }
                out.push(b'(');
                for &v in values {
                    int(out, v);
                }
                out.push(b't');
            }
            fn empty_ordered_dict(out: &mut Vec<u8>) {
                global(out, "collections", "OrderedDict");
                out.extend_from_slice(b")R");
            }

            let mut out = vec![0x80, 0x02];
            empty_ordered_dict(&mut out);
            out.push(b'(');

            for (n, tensor) in self.tensors.iter().enumerate() {
                let strides: Vec<usize> = (0..tensor.shape.len())
                    .map(|d| tensor.shape[d + 1..].iter().product())
                    .collect();

                unicode(&mut out, &tensor.key);
                global(&mut out, "torch._utils", "_rebuild_tensor_v2");
                out.push(b'(');

                // persistent id: ('storage', <class>, key, location, numel)
                out.push(b'(');
                unicode(&mut out, "storage");
                global(&mut out, "torch", tensor.storage.class_name());
                unicode(&mut out, &n.to_string());
                unicode(&mut out, "cpu");
                int(&mut out, tensor.storage.len());
                out.extend_from_slice(b"tQ");

                int(&mut out, 0);
                int_tuple(&mut out, &tensor.shape);
                int_tuple(&mut out, &strides);
                out.push(0x89);
                empty_ordered_dict(&mut out);
                out.extend_from_slice(b"tR");
            }

            out.extend_from_slice(b"u.");
            out
        }

        fn save(&self, path: &Path) {
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            let mut archive = zip::ZipWriter::new(std::fs::File::create(path).unwrap());

            archive.start_file("archive/data.pkl", options).unwrap();
            archive.write_all(&self.pickle()).unwrap();

            for (n, tensor) in self.tensors.iter().enumerate() {
                archive
                    .start_file(format!("archive/data/{}", n), options)
                    .unwrap();
                archive.write_all(&tensor.storage.to_le_bytes()).unwrap();
            }

            archive.start_file("archive/version", options).unwrap();
            archive.write_all(b"3\n").unwrap();
            archive.finish().unwrap();
        }
    }

    fn to_vec<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_load_pytorch_state_dict() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("central_model.pth");
        let torch = TorchStateDict::resnet18();
        assert_eq!(torch.tensors.len(), 122);
        torch.save(&path);

        let device = Default::default();
        let model =
            load_classifier::<TestBackend>(&path, &MedicalClassifierConfig::new(), &device).unwrap();

        // Linear weights are stored [out, in] by torch and [in, out] by burn
        assert_eq!(model.fc.weight.val().dims(), [FEATURE_DIM, 2]);
        let fc = to_vec(model.fc.weight.val());
        let torch_fc = torch.values("model.fc.weight");
        for (i, j) in [(0, 1), (5, 0), (511, 1)] {
            assert_eq!(fc[i * 2 + j], torch_fc[j * FEATURE_DIM + i]);
        }
        assert_eq!(
            to_vec(model.fc.bias.as_ref().unwrap().val()),
            torch.values("model.fc.bias")
        );

        // BatchNorm weight/bias land in gamma/beta
        assert_eq!(to_vec(model.bn1.gamma.val()), torch.values("model.bn1.weight"));
        assert_eq!(to_vec(model.bn1.beta.val()), torch.values("model.bn1.bias"));

        assert!(model.layer1.blocks.iter().all(|b| b.downsample.is_none()));
        let downsample = model.layer2.blocks[0].downsample.as_ref().unwrap();
        assert_eq!(
            to_vec(downsample.conv.weight.val()),
            torch.values("model.layer2.0.downsample.0.weight")
        );
        assert_eq!(
            to_vec(downsample.bn.running_var.value()),
            torch.values("model.layer2.0.downsample.1.running_var")
        );
        assert_eq!(
            to_vec(model.layer4.blocks[1].conv2.weight.val()),
            torch.values("model.layer4.1.conv2.weight")
        );

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 64, 64], &device);
        let probs = to_vec(model.forward_softmax(input));
        assert_eq!(probs.len(), 2);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
}
