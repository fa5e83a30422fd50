//! ResNet-18 Classifier for Chest X-Ray Diagnosis
//!
//! Standard ResNet-18 feature extractor with its final fully connected layer
//! replaced by a 512 -> 2 linear head. Field names follow the layout of the
//! training code's checkpoints so their weights can be mapped onto this
//! module (see `checkpoint`).

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Width of the feature vector produced by the last residual stage
pub const FEATURE_DIM: usize = 512;

/// Channels produced by the stem convolution
const STEM_CHANNELS: usize = 64;

/// Configuration for the MedicalClassifier model
#[derive(Config, Debug)]
pub struct MedicalClassifierConfig {
    /// Number of output classes (NORMAL, PNEUMONIA)
    #[config(default = "2")]
    pub num_classes: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Residual blocks per stage; [2, 2, 2, 2] is ResNet-18
    #[config(default = "[2, 2, 2, 2]")]
    pub blocks_per_stage: [usize; 4],
}

impl MedicalClassifierConfig {
    /// Build the model on the given device with freshly initialized weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> MedicalClassifier<B> {
        MedicalClassifier::new(self, device)
    }
}

/// 1x1 projection applied to the residual path when the shape changes
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_stride([stride, stride])
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);

        Self { conv, bn }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Two 3x3 convolutions with an identity (or projected) shortcut
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub relu: Relu,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B, 2>,
    pub downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let bn1 = BatchNormConfig::new(out_channels).init(device);

        let conv2 = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let bn2 = BatchNormConfig::new(out_channels).init(device);

        let downsample = if stride != 1 || in_channels != out_channels {
            Some(Downsample::new(in_channels, out_channels, stride, device))
        } else {
            None
        };

        Self {
            conv1,
            bn1,
            relu: Relu::new(),
            conv2,
            bn2,
            downsample,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.conv1.forward(x);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv2.forward(out);
        let out = self.bn2.forward(out);

        self.relu.forward(out + identity)
    }
}

/// One residual stage (`layer1` .. `layer4`)
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    pub blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> LayerBlock<B> {
    fn new(
        num_blocks: usize,
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|i| {
                if i == 0 {
                    BasicBlock::new(in_channels, out_channels, stride, device)
                } else {
                    BasicBlock::new(out_channels, out_channels, 1, device)
                }
            })
            .collect();

        Self { blocks }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

/// Chest X-ray classifier: ResNet-18 backbone with a two-class head
///
/// Architecture:
/// - 7x7/2 stem convolution, BatchNorm, ReLU, 3x3/2 max pooling
/// - Four residual stages of two basic blocks (64, 128, 256, 512 channels)
/// - Global average pooling
/// - Linear classifier 512 -> num_classes
#[derive(Module, Debug)]
pub struct MedicalClassifier<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub relu: Relu,
    pub maxpool: MaxPool2d,
    pub layer1: LayerBlock<B>,
    pub layer2: LayerBlock<B>,
    pub layer3: LayerBlock<B>,
    pub layer4: LayerBlock<B>,
    pub avgpool: AdaptiveAvgPool2d,
    pub fc: Linear<B>,
}

impl<B: Backend> MedicalClassifier<B> {
    /// Create a new MedicalClassifier from configuration
    pub fn new(config: &MedicalClassifierConfig, device: &B::Device) -> Self {
        let [b1, b2, b3, b4] = config.blocks_per_stage;

        let conv1 = Conv2dConfig::new([config.in_channels, STEM_CHANNELS], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let bn1 = BatchNormConfig::new(STEM_CHANNELS).init(device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        // 224 -> 112 (stem) -> 56 (pool) -> 56 -> 28 -> 14 -> 7
        let layer1 = LayerBlock::new(b1, STEM_CHANNELS, 64, 1, device);
        let layer2 = LayerBlock::new(b2, 64, 128, 2, device);
        let layer3 = LayerBlock::new(b3, 128, 256, 2, device);
        let layer4 = LayerBlock::new(b4, 256, FEATURE_DIM, 2, device);

        let avgpool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let fc = LinearConfig::new(FEATURE_DIM, config.num_classes).init(device);

        Self {
            conv1,
            bn1,
            relu: Relu::new(),
            maxpool,
            layer1,
            layer2,
            layer3,
            layer4,
            avgpool,
            fc,
        }
    }

    /// Forward pass through the network
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.bn1.forward(x);
        let x = self.relu.forward(x);
        let x = self.maxpool.forward(x);

        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);
        let x = self.layer4.forward(x);

        // [B, 512, 7, 7] -> [B, 512, 1, 1] -> [B, 512]
        let x = self.avgpool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        self.fc.forward(x)
    }

    /// Forward pass with softmax for inference
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let logits = self.forward(x);
        burn::tensor::activation::softmax(logits, 1)
    }

    /// Number of output classes, read from the classifier head
    pub fn num_classes(&self) -> usize {
        self.fc.weight.val().dims()[1]
    }

    /// Check that loaded weights have the shapes this configuration expects
    ///
    /// Only the stem and the head are inspected; a mismatch anywhere in
    /// between is rejected by the record loader itself.
    pub fn check_architecture(&self, config: &MedicalClassifierConfig) -> Result<(), String> {
        let stem = self.conv1.weight.val().dims();
        let expected_stem = [STEM_CHANNELS, config.in_channels, 7, 7];
        if stem != expected_stem {
            return Err(format!(
                "stem convolution has shape {:?}, expected {:?}",
                stem, expected_stem
            ));
        }

        let head = self.fc.weight.val().dims();
        let expected_head = [FEATURE_DIM, config.num_classes];
        if head != expected_head {
            return Err(format!(
                "classifier head has shape {:?}, expected {:?}",
                head, expected_head
            ));
        }

        Ok(())
    }
}
