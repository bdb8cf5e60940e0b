//! Feed-forward network: an ordered chain of dense blocks.
//!
//! The network only knows how to run forward; training lives in
//! [`crate::BackpropTrainer`], which mutates the blocks' weights in place and
//! reads their cached states during the backward walk.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

use crate::{Activation, Error, NeuralBlock, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Initial weight distribution, scaled by `1/sqrt(fan_in)` per layer.
pub enum WeightInit {
    /// Leave weights and biases at zero.
    Zero,
    /// `U(-1, 1) / sqrt(fan_in)`.
    Uniform,
    /// `N(0, 1) / sqrt(fan_in)`.
    Normal,
}

#[derive(Debug, Clone)]
pub struct FeedForwardNetwork {
    blocks: Vec<NeuralBlock>,
    input_size: usize,
}

impl FeedForwardNetwork {
    /// Start building a network that accepts inputs of length `input_size`.
    pub fn builder(input_size: usize) -> Result<NetworkBuilder> {
        NetworkBuilder::new(input_size)
    }

    fn from_blocks(blocks: Vec<NeuralBlock>, input_size: usize) -> Self {
        Self { blocks, input_size }
    }

    #[inline]
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    #[inline]
    pub fn output_size(&self) -> usize {
        self.blocks
            .last()
            .expect("network must have at least one block")
            .size()
    }

    #[inline]
    pub fn blocks_count(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn block(&self, idx: usize) -> &NeuralBlock {
        &self.blocks[idx]
    }

    #[inline]
    pub fn block_mut(&mut self, idx: usize) -> &mut NeuralBlock {
        &mut self.blocks[idx]
    }

    #[inline]
    pub(crate) fn blocks_mut(&mut self) -> &mut [NeuralBlock] {
        &mut self.blocks
    }

    /// Forward pass: evaluate every block in order and copy the final state
    /// into `output`.
    ///
    /// The result is a pure function of the current weights; the mutation is
    /// confined to the blocks' net/state caches.
    ///
    /// Shape contract:
    /// - `input.len() == self.input_size()`
    /// - `output.len() == self.output_size()`
    pub fn predict(&mut self, input: &[f32], output: &mut [f32]) {
        assert_eq!(
            input.len(),
            self.input_size,
            "input len {} does not match network input_size {}",
            input.len(),
            self.input_size
        );
        assert_eq!(
            output.len(),
            self.output_size(),
            "output len {} does not match network output_size {}",
            output.len(),
            self.output_size()
        );

        self.forward(input);
        output.copy_from_slice(self.blocks.last().expect("at least one block").state());
    }

    /// Forward pass leaving the result in the last block's state cache.
    pub(crate) fn forward(&mut self, input: &[f32]) {
        for idx in 0..self.blocks.len() {
            if idx == 0 {
                self.blocks[0].calculate(input);
            } else {
                let (left, right) = self.blocks.split_at_mut(idx);
                let prev_state = left[idx - 1].state();
                // Split borrow: previous block read-only, current mutable.
                right[0].calculate(prev_state);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BlockSpec {
    size: usize,
    activation: Activation,
}

#[derive(Debug, Clone)]
/// Builder for a [`FeedForwardNetwork`].
///
/// ```rust
/// use neurotrain::{Activation, FeedForwardNetwork, WeightInit};
///
/// # fn main() -> neurotrain::Result<()> {
/// let net = FeedForwardNetwork::builder(2)?
///     .add_layer(3, Activation::Sigmoid { alpha: 1.0 })?
///     .add_layer(1, Activation::Sigmoid { alpha: 1.0 })?
///     .build_with_seed(WeightInit::Uniform, 0)?;
/// # Ok(())
/// # }
/// ```
pub struct NetworkBuilder {
    input_size: usize,
    specs: Vec<BlockSpec>,
}

impl NetworkBuilder {
    fn new(input_size: usize) -> Result<Self> {
        if input_size == 0 {
            return Err(Error::InvalidConfig("input_size must be > 0".to_owned()));
        }
        Ok(Self { input_size, specs: Vec::new() })
    }

    /// Append a dense block with `size` neurons.
    pub fn add_layer(mut self, size: usize, activation: Activation) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig("layer size must be > 0".to_owned()));
        }
        activation.validate()?;
        self.specs.push(BlockSpec { size, activation });
        Ok(self)
    }

    /// Build with a deterministic seed.
    pub fn build_with_seed(self, init: WeightInit, seed: u64) -> Result<FeedForwardNetwork> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.build_with_rng(init, &mut rng)
    }

    /// Build with the provided RNG.
    pub fn build_with_rng<R: Rng + ?Sized>(
        self,
        init: WeightInit,
        rng: &mut R,
    ) -> Result<FeedForwardNetwork> {
        if self.specs.is_empty() {
            return Err(Error::InvalidConfig(
                "network must have at least one layer".to_owned(),
            ));
        }
        // Softmax normalizes a whole block and its derivative is fused into
        // the loss; it is only meaningful on the output tier.
        for (idx, spec) in self.specs.iter().enumerate() {
            if spec.activation == Activation::Softmax && idx + 1 != self.specs.len() {
                return Err(Error::InvalidConfig(
                    "softmax is only supported on the output layer".to_owned(),
                ));
            }
        }

        let mut blocks = Vec::with_capacity(self.specs.len());
        let mut previous_size = self.input_size;
        for spec in &self.specs {
            let mut block = NeuralBlock::new(previous_size, spec.size, spec.activation);
            initialize_block(&mut block, init, rng);
            blocks.push(block);
            previous_size = spec.size;
        }
        Ok(FeedForwardNetwork::from_blocks(blocks, self.input_size))
    }
}

fn initialize_block<R: Rng + ?Sized>(block: &mut NeuralBlock, init: WeightInit, rng: &mut R) {
    if init == WeightInit::Zero {
        return;
    }
    let factor = 1.0 / (block.previous_size() as f32).sqrt();
    match init {
        WeightInit::Uniform => {
            let dist = Uniform::new(-1.0_f32, 1.0);
            for w in block.weights_mut() {
                *w = factor * dist.sample(rng);
            }
            for b in block.bias_mut() {
                *b = factor * dist.sample(rng);
            }
        }
        WeightInit::Normal => {
            let dist = Normal::new(0.0_f32, 1.0).expect("unit normal is well-formed");
            for w in block.weights_mut() {
                *w = factor * dist.sample(rng);
            }
            for b in block.bias_mut() {
                *b = factor * dist.sample(rng);
            }
        }
        WeightInit::Zero => unreachable!(),
    }
}
