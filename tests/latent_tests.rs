use candle_core::{DType, Device, Result, Tensor};
use candle_emote::{
    ImageAutoencoder, LATENT_SCALING_FACTOR, LatentDistribution, LatentEncoder, Pcg32, TrainError,
};

/// Posterior mean equals the input, unit variance.
struct IdentityAutoencoder;

impl ImageAutoencoder for IdentityAutoencoder {
    fn encode(&self, images: &Tensor) -> Result<LatentDistribution> {
        let logvar = images.zeros_like()?;
        LatentDistribution::from_mean_logvar(images, &logvar)
    }
}

/// Keeps a frame axis in its output, as video autoencoders do.
struct VideoShapedAutoencoder;

impl ImageAutoencoder for VideoShapedAutoencoder {
    fn encode(&self, images: &Tensor) -> Result<LatentDistribution> {
        let (n, c, h, w) = images.dims4()?;
        let mean = images.reshape((1, n, c, h, w))?;
        LatentDistribution::from_mean_logvar(&mean, &mean.zeros_like()?)
    }
}

struct FailingAutoencoder;

impl ImageAutoencoder for FailingAutoencoder {
    fn encode(&self, _images: &Tensor) -> Result<LatentDistribution> {
        candle_core::bail!("decoder weights missing")
    }
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
    (a - b).unwrap().abs().unwrap().max_all().unwrap().to_scalar::<f32>().unwrap()
}

#[test]
fn test_seeded_encoding_is_reproducible() -> Result<()> {
    let images = Tensor::randn(0f32, 1.0, (2, 4, 8, 8), &Device::Cpu)?;
    let encoder = LatentEncoder::new(DType::F32);

    let a = encoder.encode(&IdentityAutoencoder, &images, &mut Pcg32::seeded(7)).unwrap();
    let b = encoder.encode(&IdentityAutoencoder, &images, &mut Pcg32::seeded(7)).unwrap();
    assert_eq!(max_abs_diff(&a, &b), 0.0);

    let c = encoder.encode(&IdentityAutoencoder, &images, &mut Pcg32::seeded(8)).unwrap();
    assert!(max_abs_diff(&a, &c) > 0.0);
    Ok(())
}

#[test]
fn test_successive_draws_differ() -> Result<()> {
    let images = Tensor::zeros((1, 4, 8, 8), DType::F32, &Device::Cpu)?;
    let encoder = LatentEncoder::new(DType::F32);
    let mut rng = Pcg32::seeded(1);
    let a = encoder.encode(&IdentityAutoencoder, &images, &mut rng).unwrap();
    let b = encoder.encode(&IdentityAutoencoder, &images, &mut rng).unwrap();
    assert!(max_abs_diff(&a, &b) > 0.0);
    Ok(())
}

#[test]
fn test_latents_are_scaled() -> Result<()> {
    let dev = Device::Cpu;
    let images = Tensor::ones((1, 4, 2, 2), DType::F32, &dev)?;
    // Near-zero variance: the sample is the mean
    struct Deterministic;
    impl ImageAutoencoder for Deterministic {
        fn encode(&self, images: &Tensor) -> Result<LatentDistribution> {
            let logvar = (images.ones_like()? * -60.0)?;
            LatentDistribution::from_mean_logvar(images, &logvar)
        }
    }
    let latents = LatentEncoder::new(DType::F32)
        .encode(&Deterministic, &images, &mut Pcg32::seeded(0))
        .unwrap();
    let values = latents.flatten_all()?.to_vec1::<f32>()?;
    assert!(values.iter().all(|v| (v - LATENT_SCALING_FACTOR as f32).abs() < 1e-4));
    Ok(())
}

#[test]
fn test_custom_scaling_factor() -> Result<()> {
    let images = (Tensor::ones((1, 4, 2, 2), DType::F32, &Device::Cpu)? * 3.0)?;
    let encoder = LatentEncoder::new(DType::F32).with_scaling_factor(0.5);
    assert_eq!(encoder.scaling_factor(), 0.5);
    assert_eq!(encoder.dtype(), DType::F32);
    assert_eq!(LatentEncoder::new(DType::F16).scaling_factor(), LATENT_SCALING_FACTOR);

    struct Sharp;
    impl ImageAutoencoder for Sharp {
        fn encode(&self, images: &Tensor) -> Result<LatentDistribution> {
            let moments = Tensor::cat(&[images, &(images.ones_like()? * -60.0)?], 1)?;
            LatentDistribution::from_moments(&moments)
        }
    }
    let latents = encoder.encode(&Sharp, &images, &mut Pcg32::seeded(0)).unwrap();
    assert_eq!(latents.dims(), &[1, 4, 2, 2]);
    let values = latents.flatten_all()?.to_vec1::<f32>()?;
    assert!(values.iter().all(|v| (v - 1.5).abs() < 1e-4));
    Ok(())
}

#[test]
fn test_rank5_images_fold_into_batch() -> Result<()> {
    let images = Tensor::zeros((2, 3, 4, 8, 8), DType::F32, &Device::Cpu)?;
    let latents = LatentEncoder::new(DType::F32)
        .encode(&IdentityAutoencoder, &images, &mut Pcg32::seeded(0))
        .unwrap();
    assert_eq!(latents.dims(), &[6, 4, 8, 8]);
    Ok(())
}

#[test]
fn test_rank5_posterior_is_folded() -> Result<()> {
    let images = Tensor::zeros((3, 4, 8, 8), DType::F32, &Device::Cpu)?;
    let latents = LatentEncoder::new(DType::F32)
        .encode(&VideoShapedAutoencoder, &images, &mut Pcg32::seeded(0))
        .unwrap();
    assert_eq!(latents.rank(), 4);
    assert_eq!(latents.dims(), &[3, 4, 8, 8]);
    Ok(())
}

#[test]
fn test_encoder_failure_is_reported() -> Result<()> {
    let images = Tensor::zeros((1, 3, 8, 8), DType::F32, &Device::Cpu)?;
    let result = LatentEncoder::new(DType::F32).encode(&FailingAutoencoder, &images, &mut Pcg32::seeded(0));
    assert!(matches!(result, Err(TrainError::Encoding(_))));
    Ok(())
}

#[test]
fn test_output_dtype_follows_weight_dtype() -> Result<()> {
    let images = Tensor::zeros((1, 4, 4, 4), DType::F32, &Device::Cpu)?;
    let latents = LatentEncoder::new(DType::BF16)
        .encode(&IdentityAutoencoder, &images, &mut Pcg32::seeded(0))
        .unwrap();
    assert_eq!(latents.dtype(), DType::BF16);
    Ok(())
}
