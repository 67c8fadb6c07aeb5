use burn::backend::NdArray;
use burn::tensor::Tensor;
use models::{
    load_checkpoint, load_meta, save_checkpoint, CheckpointError, CheckpointMeta, RetinaNetConfig,
};

type B = NdArray<f32>;

fn meta() -> CheckpointMeta {
    CheckpointMeta {
        model: RetinaNetConfig {
            num_classes: 2,
            depths: [1, 1, 1, 1],
            widths: [8, 8, 8, 8],
            fpn_channels: 8,
            head_convs: 1,
            ..Default::default()
        },
        input_size: (64, 64),
        letterbox: true,
        labels: vec!["Abyssinian".into(), "beagle".into()],
        epoch: 3,
        val_loss: Some(1.25),
    }
}

#[test]
fn saved_weights_reload_with_identical_outputs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ckpt").join("best.bin");
    let device = Default::default();
    let meta = meta();
    let model = meta.model.init::<B>(&device);
    save_checkpoint(&model, &meta, &path).expect("save");
    assert!(path.exists());
    assert!(path.with_extension("json").exists());

    let (loaded, loaded_meta) = load_checkpoint::<B>(&path, &device).expect("load");
    assert_eq!(loaded_meta, meta);

    let x = Tensor::<B, 4>::ones([1, 3, 64, 64], &device);
    let a = model.forward(x.clone()).cls_logits.into_data().to_vec::<f32>().expect("f32");
    let b = loaded.forward(x).cls_logits.into_data().to_vec::<f32>().expect("f32");
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).abs() < 1e-5, "{x} vs {y}");
    }
}

#[test]
fn missing_sidecar_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = load_meta(&dir.path().join("absent.bin")).unwrap_err();
    assert!(matches!(err, CheckpointError::Io { .. }));
}
