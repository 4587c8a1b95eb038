use candle_core::{DType, Device, IndexOp, Result, Tensor};
use candle_emote::{TrainError, VideoSample, padded_collate};

fn filled(shape: (usize, usize, usize), value: f32) -> Tensor {
    (Tensor::ones(shape, DType::F32, &Device::Cpu).unwrap() * value as f64).unwrap()
}

fn sum(t: &Tensor) -> f32 {
    t.sum_all().unwrap().to_scalar::<f32>().unwrap()
}

#[test]
fn test_pads_to_batch_maximum() -> Result<()> {
    let a = VideoSample::new(vec![filled((3, 10, 8), 1.0)]);
    let b = VideoSample::new(vec![filled((3, 6, 12), 2.0)]);
    let batch = padded_collate(&[a, b]).unwrap();
    assert_eq!(batch.images().dims(), &[2, 3, 10, 12]);

    let first = batch.images().i(0)?;
    assert_eq!(sum(&first.i((.., 0..10, 0..8))?), 3.0 * 10.0 * 8.0);
    assert_eq!(sum(&first.i((.., .., 8..12))?), 0.0);

    let second = batch.images().i(1)?;
    assert_eq!(sum(&second.i((.., 0..6, 0..12))?), 2.0 * 3.0 * 6.0 * 12.0);
    assert_eq!(sum(&second.i((.., 6..10, ..))?), 0.0);
    Ok(())
}

#[test]
fn test_flattens_samples_in_order() -> Result<()> {
    let a = VideoSample::new(vec![filled((1, 2, 2), 1.0), filled((1, 2, 2), 2.0)]);
    let b = VideoSample::new(vec![filled((1, 2, 2), 3.0)]);
    let batch = padded_collate(&[a, b]).unwrap();
    assert_eq!(batch.len(), 3);
    for (i, expected) in [1.0f32, 2.0, 3.0].into_iter().enumerate() {
        assert_eq!(sum(&batch.frame(i).unwrap()), expected * 4.0);
    }
    Ok(())
}

#[test]
fn test_rejects_2d_image() {
    let flat = Tensor::ones((10, 8), DType::F32, &Device::Cpu).unwrap();
    let sample = VideoSample::new(vec![filled((3, 10, 8), 1.0), flat]);
    assert!(matches!(padded_collate(&[sample]), Err(TrainError::Shape(_))));
}

#[test]
fn test_rejects_4d_image() {
    let batched = Tensor::ones((1, 3, 10, 8), DType::F32, &Device::Cpu).unwrap();
    assert!(matches!(
        padded_collate(&[VideoSample::new(vec![batched])]),
        Err(TrainError::Shape(_))
    ));
}
