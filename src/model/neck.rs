use burn::prelude::*;

use super::blocks::{Activation, ConvModule, LevelGate, ResizeMode};
use super::refine::Refine;
use crate::config::{AsfpConfig, RefineType};
use crate::error::{AsfpError, Result};

/// Output of the gather stage: the averaged map at the refine resolution and
/// the per-level gates reused when scattering.
#[derive(Debug, Clone)]
pub struct Gathered<B: Backend> {
    pub fused: Tensor<B, 4>,
    pub gates: Vec<Tensor<B, 4>>,
}

/// ASFP neck: gather every pyramid level to one resolution, refine the fused
/// map once, then scatter it back and blend with each input through a learned
/// per-pixel gate.
#[derive(Module, Debug)]
pub struct Asfp<B: Backend> {
    gates: Vec<LevelGate<B>>,
    asfp_convs: Vec<ConvModule<B>>,
    refine: Option<Refine<B>>,
    in_channels: usize,
    num_levels: usize,
    refine_level: usize,
}

impl<B: Backend> Asfp<B> {
    pub fn new(device: &B::Device, config: &AsfpConfig) -> Result<Self> {
        config.validate()?;

        let channels = config.in_channels;
        let norm = config.norm.as_ref();

        log::info!("ASFP init:");
        log::info!("  in_channels  = {}", channels);
        log::info!("  num_levels   = {}", config.num_levels);
        log::info!("  refine_level = {}", config.refine_level);
        log::info!("  refine_type  = {}", config.refine_type);

        let gates = (0..config.num_levels)
            .map(|_| LevelGate::new(device, channels))
            .collect();
        let asfp_convs = (0..config.num_levels)
            .map(|_| ConvModule::new(device, channels, channels, 3, norm, Some(Activation::Relu)))
            .collect();

        Ok(Self {
            gates,
            asfp_convs,
            refine: Refine::build(device, config.refine_type, channels, norm),
            in_channels: channels,
            num_levels: config.num_levels,
            refine_level: config.refine_level,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn refine_level(&self) -> usize {
        self.refine_level
    }

    pub fn refine_type(&self) -> RefineType {
        self.refine
            .as_ref()
            .map_or(RefineType::None, Refine::refine_type)
    }

    pub fn gate(&self, level: usize) -> Option<&LevelGate<B>> {
        self.gates.get(level)
    }

    /// Re-initialises every convolution, refine sub-modules included, with
    /// Xavier uniform weights and zero bias. Gates are left as they are.
    pub fn init_weights(self) -> Self {
        Self {
            asfp_convs: self
                .asfp_convs
                .into_iter()
                .map(ConvModule::xavier_init)
                .collect(),
            refine: self.refine.map(Refine::xavier_init),
            ..self
        }
    }

    pub fn forward(&self, inputs: Vec<Tensor<B, 4>>) -> Result<Vec<Tensor<B, 4>>> {
        let Gathered { fused, gates } = self.gather(&inputs)?;
        let refined = self.refine(fused);
        Ok(self.scatter(inputs, gates, refined))
    }

    /// Gates every level, resizes the affine outputs to the refine level's
    /// resolution and averages them.
    pub fn gather(&self, inputs: &[Tensor<B, 4>]) -> Result<Gathered<B>> {
        self.check_inputs(inputs)?;

        let [_, _, gh, gw] = inputs[self.refine_level].dims();
        let mut gates = Vec::with_capacity(self.num_levels);
        let mut sum: Option<Tensor<B, 4>> = None;

        for (level, (x, gate)) in inputs.iter().zip(&self.gates).enumerate() {
            let (affine, g) = gate.forward(x.clone());
            gates.push(g);

            let mode = ResizeMode::gather(level, self.refine_level);
            let resized = mode.apply(affine, [gh, gw]);
            log::debug!(
                "  gather level {}: {:?} -> {:?} ({:?})",
                level,
                x.dims(),
                resized.dims(),
                mode
            );

            sum = Some(match sum {
                Some(acc) => acc + resized,
                None => resized,
            });
        }

        let fused = sum.ok_or_else(|| AsfpError::shape("at least one level", "0 levels"))?
            / self.num_levels as f32;

        Ok(Gathered { fused, gates })
    }

    /// Applies the configured refine operator; identity when there is none.
    pub fn refine(&self, fused: Tensor<B, 4>) -> Tensor<B, 4> {
        match &self.refine {
            Some(refine) => refine.forward(fused),
            None => fused,
        }
    }

    /// Resizes `refined` back to every level, convolves it and blends it with
    /// the input: `gate * x + (1 - gate) * conv(refined)`.
    pub fn scatter(
        &self,
        inputs: Vec<Tensor<B, 4>>,
        gates: Vec<Tensor<B, 4>>,
        refined: Tensor<B, 4>,
    ) -> Vec<Tensor<B, 4>> {
        inputs
            .into_iter()
            .zip(gates)
            .zip(&self.asfp_convs)
            .enumerate()
            .map(|(level, ((x, gate), conv))| {
                let [_, _, h, w] = x.dims();
                let mode = ResizeMode::scatter(level, self.refine_level);
                let residual = conv.forward(mode.apply(refined.clone(), [h, w]));
                log::debug!("  scatter level {}: {:?} ({:?})", level, [h, w], mode);

                let keep = gate.clone().neg().add_scalar(1.0);
                gate * x + keep * residual
            })
            .collect()
    }

    fn check_inputs(&self, inputs: &[Tensor<B, 4>]) -> Result<()> {
        if inputs.len() != self.num_levels {
            return Err(AsfpError::shape(
                format!("{} levels", self.num_levels),
                format!("{} levels", inputs.len()),
            ));
        }

        let batch = inputs[0].dims()[0];
        for (level, x) in inputs.iter().enumerate() {
            let [b, c, _, _] = x.dims();
            if c != self.in_channels {
                return Err(AsfpError::shape(
                    format!("{} channels at level {}", self.in_channels, level),
                    format!("{} channels", c),
                ));
            }
            if b != batch {
                return Err(AsfpError::shape(
                    format!("batch {} at level {}", batch, level),
                    format!("batch {}", b),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormConfig;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    fn pyramid<B: Backend>(
        device: &B::Device,
        batch: usize,
        channels: usize,
        sizes: &[usize],
    ) -> Vec<Tensor<B, 4>> {
        sizes
            .iter()
            .map(|&s| Tensor::random([batch, channels, s, s], Distribution::Default, device))
            .collect()
    }

    fn to_vec(x: Tensor<TestBackend, 4>) -> Vec<f32> {
        x.into_data().to_vec().unwrap()
    }

    fn assert_same_shapes(inputs: &[Tensor<TestBackend, 4>], outputs: &[Tensor<TestBackend, 4>]) {
        assert_eq!(inputs.len(), outputs.len());
        for (x, y) in inputs.iter().zip(outputs) {
            assert_eq!(x.dims(), y.dims());
        }
    }

    #[test]
    fn test_forward_preserves_level_shapes_for_every_refine_type() {
        let device = Default::default();
        for refine_type in [RefineType::None, RefineType::Conv, RefineType::NonLocal] {
            let config = AsfpConfig::new(8, 4)
                .with_refine_level(1)
                .with_refine_type(refine_type);
            let neck = Asfp::<TestBackend>::new(&device, &config).unwrap();
            assert_eq!(neck.refine_type(), refine_type);

            let inputs = pyramid::<TestBackend>(&device, 2, 8, &[16, 8, 4, 2]);
            let outputs = neck.forward(inputs.clone()).unwrap();
            assert_same_shapes(&inputs, &outputs);
        }
    }

    #[test]
    fn test_refine_level_boundaries() {
        let device = Default::default();
        for refine_level in [0, 4] {
            let config = AsfpConfig::new(4, 5)
                .with_refine_level(refine_level)
                .with_refine_type(RefineType::Conv);
            let neck = Asfp::<TestBackend>::new(&device, &config).unwrap();

            let inputs = pyramid::<TestBackend>(&device, 1, 4, &[32, 16, 8, 4, 2]);
            let gathered = neck.gather(&inputs).unwrap();
            let expected = inputs[refine_level].dims();
            assert_eq!(gathered.fused.dims(), expected);

            let outputs = neck.forward(inputs.clone()).unwrap();
            assert_same_shapes(&inputs, &outputs);
        }
    }

    #[test]
    fn test_non_square_and_non_halving_levels() {
        let device = Default::default();
        let config = AsfpConfig::new(4, 3)
            .with_refine_level(1)
            .with_refine_type(RefineType::NonLocal);
        let neck = Asfp::<TestBackend>::new(&device, &config).unwrap();

        let inputs: Vec<Tensor<TestBackend, 4>> = vec![
            Tensor::random([1, 4, 25, 38], Distribution::Default, &device),
            Tensor::random([1, 4, 13, 19], Distribution::Default, &device),
            Tensor::random([1, 4, 7, 10], Distribution::Default, &device),
        ];
        let outputs = neck.forward(inputs.clone()).unwrap();
        assert_same_shapes(&inputs, &outputs);
    }

    #[test]
    fn test_wrong_level_count_is_rejected() {
        let device = Default::default();
        let neck = Asfp::<TestBackend>::new(&device, &AsfpConfig::new(4, 3).with_refine_level(1))
            .unwrap();

        let inputs = pyramid::<TestBackend>(&device, 1, 4, &[8, 4]);
        assert!(matches!(
            neck.forward(inputs),
            Err(AsfpError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_wrong_channel_count_is_rejected() {
        let device = Default::default();
        let neck = Asfp::<TestBackend>::new(&device, &AsfpConfig::new(4, 2).with_refine_level(0))
            .unwrap();

        let inputs: Vec<Tensor<TestBackend, 4>> = vec![
            Tensor::random([1, 4, 8, 8], Distribution::Default, &device),
            Tensor::random([1, 5, 4, 4], Distribution::Default, &device),
        ];
        assert!(matches!(
            neck.forward(inputs),
            Err(AsfpError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_mismatched_batch_is_rejected() {
        let device = Default::default();
        let neck = Asfp::<TestBackend>::new(&device, &AsfpConfig::new(4, 2).with_refine_level(0))
            .unwrap();

        let inputs: Vec<Tensor<TestBackend, 4>> = vec![
            Tensor::random([2, 4, 8, 8], Distribution::Default, &device),
            Tensor::random([1, 4, 4, 4], Distribution::Default, &device),
        ];
        assert!(matches!(
            neck.forward(inputs),
            Err(AsfpError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_refine_level_is_rejected() {
        let device = Default::default();
        let result = Asfp::<TestBackend>::new(&device, &AsfpConfig::new(4, 3).with_refine_level(3));
        assert!(matches!(result, Err(AsfpError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_forward_is_deterministic() {
        let device = Default::default();
        let config = AsfpConfig::new(4, 3)
            .with_refine_level(1)
            .with_refine_type(RefineType::NonLocal);
        let neck = Asfp::<TestBackend>::new(&device, &config)
            .unwrap()
            .init_weights();

        let inputs = pyramid::<TestBackend>(&device, 1, 4, &[8, 4, 2]);
        let first = neck.forward(inputs.clone()).unwrap();
        let second = neck.forward(inputs).unwrap();

        for (a, b) in first.into_iter().zip(second) {
            assert_eq!(to_vec(a), to_vec(b));
        }
    }

    #[test]
    fn test_no_refine_feeds_fused_map_straight_to_scatter() {
        let device = Default::default();
        let neck = Asfp::<TestBackend>::new(&device, &AsfpConfig::new(4, 3).with_refine_level(1))
            .unwrap();
        let inputs = pyramid::<TestBackend>(&device, 1, 4, &[8, 4, 2]);

        let Gathered { fused, gates } = neck.gather(&inputs).unwrap();
        assert_eq!(to_vec(neck.refine(fused.clone())), to_vec(fused.clone()));

        let skipped = neck.scatter(inputs.clone(), gates, fused);
        let full = neck.forward(inputs).unwrap();
        for (a, b) in skipped.into_iter().zip(full) {
            assert_eq!(to_vec(a), to_vec(b));
        }
    }

    #[test]
    fn test_gather_is_mean_of_resized_affine_levels() {
        let device = Default::default();
        let neck = Asfp::<TestBackend>::new(&device, &AsfpConfig::new(1, 2).with_refine_level(1))
            .unwrap();

        // level 0 is max-pooled 2x2 -> 1x1, level 1 is already 1x1
        let inputs: Vec<Tensor<TestBackend, 4>> = vec![
            Tensor::from_data(
                burn::tensor::TensorData::new(vec![1.0f32, 4.0, 2.0, 3.0], [1, 1, 2, 2]),
                &device,
            ),
            Tensor::from_data(burn::tensor::TensorData::new(vec![2.0f32], [1, 1, 1, 1]), &device),
        ];
        let gathered = neck.gather(&inputs).unwrap();
        assert_eq!(to_vec(gathered.fused), vec![3.0]);
        assert_eq!(gathered.gates.len(), 2);
    }

    #[test]
    fn test_gates_and_convs_are_registered_parameters() {
        let device = Default::default();
        let channels = 4;
        let levels = 3;
        let neck =
            Asfp::<TestBackend>::new(&device, &AsfpConfig::new(channels, levels).with_refine_level(1))
                .unwrap();

        let gate_params = 2 * channels * levels;
        let conv_params = levels * (channels * channels * 9 + channels);
        assert_eq!(neck.num_params(), gate_params + conv_params);
    }

    #[test]
    fn test_gate_parameters_receive_gradients() {
        type AutodiffBackend = Autodiff<NdArray>;

        let device = Default::default();
        let config = AsfpConfig::new(4, 3)
            .with_refine_level(1)
            .with_refine_type(RefineType::Conv)
            .with_norm(Some(NormConfig::GroupNorm { num_groups: 2 }));
        let neck = Asfp::<AutodiffBackend>::new(&device, &config).unwrap();

        let inputs = pyramid::<AutodiffBackend>(&device, 1, 4, &[8, 4, 2]);
        let loss = neck
            .forward(inputs)
            .unwrap()
            .into_iter()
            .map(|y| y.sum())
            .reduce(|a, b| a + b)
            .unwrap();
        let grads = loss.backward();

        for level in 0..3 {
            let gate = neck.gate(level).unwrap();
            assert!(gate.scale.val().grad(&grads).is_some());
            assert!(gate.bias.val().grad(&grads).is_some());
        }
    }

    fn assert_finite_end_to_end(channels: usize, sizes: &[usize]) {
        let device = Default::default();
        let config = AsfpConfig::new(channels, sizes.len())
            .with_refine_level(1)
            .with_refine_type(RefineType::NonLocal);
        let neck = Asfp::<TestBackend>::new(&device, &config)
            .unwrap()
            .init_weights();

        let inputs = pyramid::<TestBackend>(&device, 1, channels, sizes);
        let outputs = neck.forward(inputs.clone()).unwrap();
        assert_same_shapes(&inputs, &outputs);
        for y in outputs {
            assert!(to_vec(y).iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_end_to_end_reduced_pyramid() {
        assert_finite_end_to_end(16, &[32, 16, 8, 4, 2]);
    }

    #[test]
    #[ignore = "full-resolution pyramid, slow on the CPU backend; run with `cargo test -- --ignored`"]
    fn test_end_to_end_retinanet_pyramid() {
        assert_finite_end_to_end(256, &[128, 64, 32, 16, 8]);
    }
}
