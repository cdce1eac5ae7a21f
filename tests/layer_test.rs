use std::sync::Arc;

use pretty_assertions::assert_eq;
use qconv::{
    ActivationKind, CalibrationStats, Compatibility, ConvAlgorithm, ConvConfig, ConvError, Dst, ElemKind,
    PlanOptions, QuantizedConvolution, ReferenceKernel, Scratch, Src, TensorFormat,
};

fn fill_deterministic(data: &mut [f32]) {
    for (i, v) in data.iter_mut().enumerate() {
        *v = ((i as f32) * 0.1 + 0.05).sin() * 0.2;
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn initialized(cfg: &ConvConfig) -> QuantizedConvolution {
    init_logging();
    let mut conv = QuantizedConvolution::new(cfg).unwrap();
    let mut w = vec![0.0; conv.shape().weight_count()];
    fill_deterministic(&mut w);
    conv.set_params(&w, None, &[], &CalibrationStats::uniform(cfg.src_c, cfg.dst_c, -1.0, 1.0))
        .unwrap();
    conv
}

#[test]
fn invalid_shapes_are_rejected() {
    let bad = [
        ConvConfig::new(0, 4, 8, 8, 4, 3),
        ConvConfig::new(1, 4, 8, 8, 0, 3),
        ConvConfig::new(1, 4, 8, 8, 4, 3).stride(0),
        ConvConfig::new(1, 6, 8, 8, 4, 3).group(4),
        ConvConfig::new(1, 4, 2, 2, 4, 3),
    ];
    for cfg in bad {
        let err = QuantizedConvolution::new(&cfg).err();
        assert!(matches!(err, Some(ConvError::InvalidShape(_))), "{:?} -> {:?}", cfg, err);
    }
}

#[test]
fn output_size_follows_geometry() {
    let conv = QuantizedConvolution::new(&ConvConfig::new(1, 3, 11, 9, 4, 3).stride(2).pad(1)).unwrap();
    assert_eq!((conv.shape().dst_h, conv.shape().dst_w), (6, 5));
    let conv = QuantizedConvolution::new(&ConvConfig::new(1, 3, 11, 9, 4, 3).dilation(2)).unwrap();
    assert_eq!((conv.shape().dst_h, conv.shape().dst_w), (7, 5));
}

#[test]
fn algorithm_selection_and_descriptions() {
    let cases = [
        (ConvConfig::new(1, 8, 6, 6, 8, 3), ConvAlgorithm::Direct, "Ref::NhwcDirect"),
        (ConvConfig::new(1, 8, 6, 6, 8, 3).group(8), ConvAlgorithm::Depthwise, "Ref::DepthwiseConv3x3"),
        (ConvConfig::new(1, 8, 6, 6, 8, 5).group(8), ConvAlgorithm::Depthwise, "Ref::DepthwiseConv"),
        (ConvConfig::new(1, 8, 6, 6, 8, 3).group(2), ConvAlgorithm::Gemm, "Ref::GemmNhwc"),
        (ConvConfig::new(1, 8, 6, 6, 8, 3).format(TensorFormat::Nchw), ConvAlgorithm::Gemm, "Ref::GemmNchw"),
        (
            ConvConfig::new(1, 8, 6, 6, 8, 3).group(8).format(TensorFormat::Nchw),
            ConvAlgorithm::Gemm,
            "Ref::GemmNchw",
        ),
    ];
    for (cfg, algorithm, description) in cases {
        let conv = QuantizedConvolution::new(&cfg).unwrap();
        assert_eq!(conv.algorithm(), algorithm);
        assert_eq!(conv.description(), description);
        assert!(!algorithm.to_string().is_empty());
    }
}

#[test]
fn forced_algorithm_must_support_shape() {
    let nchw = ConvConfig::new(1, 8, 6, 6, 8, 3).format(TensorFormat::Nchw);
    let kernel = Arc::new(ReferenceKernel::default());
    let err = QuantizedConvolution::with_algorithm(&nchw, ConvAlgorithm::Direct, &PlanOptions::default(), kernel.clone())
        .err();
    assert!(matches!(err, Some(ConvError::InvalidShape(_))));

    let grouped = ConvConfig::new(1, 8, 6, 6, 8, 3).group(2);
    assert!(
        QuantizedConvolution::with_algorithm(&grouped, ConvAlgorithm::Depthwise, &PlanOptions::default(), kernel.clone())
            .is_err()
    );
    let gemm = QuantizedConvolution::with_algorithm(&nchw, ConvAlgorithm::Gemm, &PlanOptions::default(), kernel).unwrap();
    assert_eq!(gemm.algorithm(), ConvAlgorithm::Gemm);
}

#[test]
fn forward_before_set_params_fails() {
    let conv = QuantizedConvolution::new(&ConvConfig::new(1, 4, 5, 5, 4, 3)).unwrap();
    assert!(!conv.is_initialized());
    assert!(conv.weights().is_none());
    let src = vec![0u8; 100];
    let mut dst = vec![0u8; 36];
    let err = conv.forward(Src::U8(&src), None, Dst::U8(&mut dst)).unwrap_err();
    assert_eq!(err, ConvError::NotInitialized);
    let err = conv.forward_reference(Src::U8(&src), Dst::U8(&mut dst)).unwrap_err();
    assert_eq!(err, ConvError::NotInitialized);
}

#[test]
fn buffer_mismatches_are_rejected() {
    let conv = initialized(&ConvConfig::new(1, 4, 5, 5, 4, 3));
    assert!(conv.is_initialized());
    let src = vec![0u8; 100];
    let floats = vec![0.0f32; 100];
    let mut dst = vec![0u8; 36];
    let mut short = vec![0u8; 35];
    let mut float_dst = vec![0.0f32; 36];

    let err = conv.forward(Src::U8(&src[..99]), None, Dst::U8(&mut dst)).unwrap_err();
    assert!(matches!(err, ConvError::BufferMismatch(_)));
    let err = conv.forward(Src::F32(&floats), None, Dst::U8(&mut dst)).unwrap_err();
    assert!(matches!(err, ConvError::BufferMismatch(_)));
    let err = conv.forward(Src::U8(&src), None, Dst::U8(&mut short)).unwrap_err();
    assert!(matches!(err, ConvError::BufferMismatch(_)));
    let err = conv.forward(Src::U8(&src), None, Dst::F32(&mut float_dst)).unwrap_err();
    assert!(matches!(err, ConvError::BufferMismatch(_)));
    assert!(conv.forward(Src::U8(&src), None, Dst::U8(&mut dst)).is_ok());
}

#[test]
fn parameter_lengths_are_checked() {
    let cfg = ConvConfig::new(1, 4, 5, 5, 6, 3);
    let mut conv = QuantizedConvolution::new(&cfg).unwrap();
    let w = vec![0.1; conv.shape().weight_count()];

    let stats = CalibrationStats::uniform(3, 6, -1.0, 1.0);
    let err = conv.set_params(&w, None, &[], &stats).unwrap_err();
    assert_eq!(err, ConvError::ParameterLength { what: "source calibration min", expected: 4, actual: 3 });

    let stats = CalibrationStats::uniform(4, 5, -1.0, 1.0);
    let err = conv.set_params(&w, None, &[], &stats).unwrap_err();
    assert!(matches!(err, ConvError::ParameterLength { expected: 6, actual: 5, .. }));

    let stats = CalibrationStats::uniform(4, 6, -1.0, 1.0);
    let err = conv.set_params(&w[1..], None, &[], &stats).unwrap_err();
    assert!(matches!(err, ConvError::ParameterLength { what: "weights", .. }));

    let mut bad = stats.clone();
    bad.src_min[2] = 3.0;
    let err = conv.set_params(&w, None, &[], &bad).unwrap_err();
    assert!(matches!(err, ConvError::InvalidCalibration { channel: 2, .. }));
    assert!(!conv.is_initialized());

    conv.set_params(&w, Some(&[0.0; 6]), &[], &stats).unwrap();
    assert!(conv.is_initialized());
}

#[test]
fn prelu_needs_one_slope_per_output_channel() {
    let cfg = ConvConfig::new(1, 4, 5, 5, 6, 3).activation(ActivationKind::Prelu);
    let mut conv = QuantizedConvolution::new(&cfg).unwrap();
    let w = vec![0.1; conv.shape().weight_count()];
    let stats = CalibrationStats::uniform(4, 6, -1.0, 1.0);
    let err = conv.set_params(&w, None, &[0.1; 2], &stats).unwrap_err();
    assert!(matches!(err, ConvError::ParameterLength { what: "activation params", .. }));
    conv.set_params(&w, None, &[0.1; 6], &stats).unwrap();
    assert_eq!(conv.activation().unwrap().params().len(), 6);
}

#[test]
fn external_buffer_sizes() {
    let direct = QuantizedConvolution::new(&ConvConfig::new(1, 8, 6, 6, 8, 3)).unwrap();
    // 8 accumulators for each of the 4x4 output pixels, no padded copy.
    assert_eq!(direct.external_buffer_size(), 512);

    let float_src = QuantizedConvolution::new(&ConvConfig::new(1, 8, 6, 6, 8, 3).kinds(ElemKind::F32, ElemKind::U8))
        .unwrap();
    assert_eq!(float_src.external_buffer_size(), 512 + 288);

    let gemm = QuantizedConvolution::new(&ConvConfig::new(1, 8, 6, 6, 8, 3).format(TensorFormat::Nchw)).unwrap();
    // 72-wide patches for 16 pixels plus the full int32 output image.
    assert_eq!(gemm.external_buffer_size(), 1152 + 512);

    let depthwise = QuantizedConvolution::new(&ConvConfig::new(1, 8, 6, 6, 8, 3).group(8)).unwrap();
    assert_eq!(depthwise.external_buffer_size(), 4 * 8 * 4);

    let pointwise = QuantizedConvolution::new(&ConvConfig::new(1, 8, 6, 6, 8, 1).group(2)).unwrap();
    assert_eq!(pointwise.external_buffer_size(), 8 * 36 * 4);
}

#[test]
fn internal_buffer_size_counts_parameters() {
    let cfg = ConvConfig::new(1, 8, 6, 6, 8, 3);
    let conv = QuantizedConvolution::new(&cfg).unwrap();
    assert_eq!(conv.internal_buffer_size(), 0);
    let conv = initialized(&cfg);
    let weights = conv.weights().unwrap();
    assert!(conv.internal_buffer_size() > weights.memory_bytes());
    assert!(weights.memory_bytes() >= cfg.src_c * cfg.dst_c * 9);
}

#[test]
fn scratch_is_reused_and_grows_once() {
    let cfg = ConvConfig::new(2, 8, 7, 7, 12, 3).pad(1).kinds(ElemKind::F32, ElemKind::F32);
    let conv = initialized(&cfg);
    let mut src = vec![0.0f32; 2 * 8 * 49];
    fill_deterministic(&mut src);
    let mut scratch = Scratch::new();
    let mut first = vec![0.0f32; 2 * 12 * 49];
    conv.forward(Src::F32(&src), Some(&mut scratch), Dst::F32(&mut first)).unwrap();
    let bytes = scratch.bytes();
    assert!(bytes >= conv.external_buffer_size());

    let mut second = vec![0.0f32; first.len()];
    conv.forward(Src::F32(&src), Some(&mut scratch), Dst::F32(&mut second)).unwrap();
    assert_eq!(scratch.bytes(), bytes);
    assert_eq!(first, second);

    let mut fresh = vec![0.0f32; first.len()];
    conv.forward(Src::F32(&src), None, Dst::F32(&mut fresh)).unwrap();
    assert_eq!(first, fresh);
}

#[test]
fn float_and_quantized_inputs_agree() {
    let cfg = ConvConfig::new(1, 4, 6, 6, 5, 3).pad(1).kinds(ElemKind::F32, ElemKind::U8);
    let conv = initialized(&cfg);
    let mut src = vec![0.0f32; 4 * 36];
    fill_deterministic(&mut src);
    let profile = conv.src_profile().unwrap();
    let codes: Vec<u8> = src.iter().enumerate().map(|(i, &x)| profile.quantize(x, i % 4)).collect();

    let mut from_float = vec![0u8; 5 * 36];
    conv.forward(Src::F32(&src), None, Dst::U8(&mut from_float)).unwrap();

    let u8_cfg = ConvConfig { src_kind: ElemKind::U8, ..cfg };
    let u8_conv = initialized(&u8_cfg);
    let mut from_codes = vec![0u8; 5 * 36];
    u8_conv.forward(Src::U8(&codes), None, Dst::U8(&mut from_codes)).unwrap();
    assert_eq!(from_float, from_codes);
}

#[test]
fn narrowed_outputs_stay_in_range() {
    let cfg = ConvConfig::new(1, 8, 6, 6, 8, 3).pad(1).compatibility(Compatibility::narrowed());
    let conv = initialized(&cfg);
    let src: Vec<u8> = (0..8 * 36).map(|i| (i * 13 % 181) as u8).collect();
    let mut dst = vec![0u8; 8 * 36];
    conv.forward(Src::U8(&src), None, Dst::U8(&mut dst)).unwrap();
    assert!(dst.iter().all(|&q| q <= 180));
}

#[test]
fn config_from_json() {
    let cfg: ConvConfig = serde_json::from_str(
        r#"{
            "src_kind": "F32",
            "dst_kind": "U8",
            "format": "Nhwc",
            "batch": 1,
            "src_c": 16,
            "src_h": 10,
            "src_w": 10,
            "dst_c": 32,
            "kernel": [3, 3],
            "pad": [1, 1, 1, 1],
            "activation": "Relu",
            "compatibility": {"overflow_16i": true}
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.stride, [1, 1]);
    assert_eq!(cfg.group, 1);
    assert!(cfg.compatibility.overflow_16i);
    assert!(!cfg.compatibility.narrowed);
    let expected = ConvConfig::new(1, 16, 10, 10, 32, 3)
        .pad(1)
        .kinds(ElemKind::F32, ElemKind::U8)
        .activation(ActivationKind::Relu)
        .compatibility(Compatibility::precise().with_overflow_16i(true));
    assert_eq!(cfg, expected);

    let conv = QuantizedConvolution::new(&cfg).unwrap();
    assert_eq!(conv.algorithm(), ConvAlgorithm::Direct);
}
