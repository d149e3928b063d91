//! Autoexposure tests for lumen-compute.

use approx::assert_relative_eq;
use lumen_compute::{
    Autoexposure, Backend, ComputeError, Engine, EngineConfig, Image, ScratchBuffer, Storage,
};
use lumen_core::{ImageDesc, ImageFormat};

/// Route engine logs to the test harness; set `RUST_LOG=lumen_compute=trace` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn engine(backend: Backend) -> Engine {
    init_tracing();
    Engine::new(EngineConfig::default().with_backend(backend)).unwrap()
}

fn gray_image(
    engine: &Engine,
    format: ImageFormat,
    width: usize,
    height: usize,
    value: f32,
) -> Image {
    let img = engine.new_image(ImageDesc::new(format, width, height), Storage::Host).unwrap();
    img.fill([value; 3]).unwrap();
    img
}

/// Binds fresh scratch; the returned buffer must outlive the op's runs.
fn bind_scratch(engine: &Engine, ae: &mut Autoexposure) -> ScratchBuffer {
    let scratch = engine.new_scratch_buffer(ae.scratch_byte_size()).unwrap();
    let tensor = engine.new_tensor_at(&scratch, ae.scratch_desc(), 0).unwrap();
    ae.set_scratch(tensor).unwrap();
    scratch
}

fn exposure_of(engine: &Engine, img: Image) -> f32 {
    let mut ae = engine.new_autoexposure(img.desc()).unwrap();
    let _scratch = bind_scratch(engine, &mut ae);
    ae.set_src(img).unwrap();
    ae.run().unwrap();
    ae.read_result().unwrap()
}

#[test]
fn test_uniform_gray() {
    let engine = engine(Backend::Cpu);
    let img = gray_image(&engine, ImageFormat::Float3, 32, 32, 0.5);

    let ae = engine.new_autoexposure(img.desc()).unwrap();
    assert_eq!(ae.scratch_byte_size(), 24);

    assert_relative_eq!(exposure_of(&engine, img), 0.36, epsilon = 1e-4);
}

#[test]
fn test_single_lit_tile() {
    let engine = engine(Backend::Cpu);
    let img = engine.new_image(ImageDesc::new(ImageFormat::Float3, 32, 32), Storage::Host).unwrap();
    img.fill_with(|h, w| if h < 16 && w < 16 { [0.8; 3] } else { [0.0; 3] }).unwrap();

    // dark tiles are excluded from the mean
    assert_relative_eq!(exposure_of(&engine, img), 0.18 / 0.8, epsilon = 1e-4);
}

#[test]
fn test_single_lit_tile_across_groups() {
    // 65 x 65 tiles = 4225 bins, spread over 5 reduce groups
    for backend in [Backend::Cpu, Backend::Serial] {
        let engine = engine(backend);
        let desc = ImageDesc::new(ImageFormat::Float3, 1040, 1040);
        let img = engine.new_image(desc, Storage::Host).unwrap();
        img.fill_with(|h, w| if h < 16 && w < 16 { [0.8; 3] } else { [0.0; 3] }).unwrap();

        let mut ae = engine.new_autoexposure(&desc).unwrap();
        assert_eq!(ae.grid().num_bins, 4225);
        assert_eq!(ae.grid().num_groups, 5);

        let _scratch = bind_scratch(&engine, &mut ae);
        ae.set_src(img).unwrap();
        ae.run().unwrap();
        let exposure = ae.read_result().unwrap();
        assert_relative_eq!(exposure, 0.18 / 0.8, epsilon = 1e-4);
    }
}

#[test]
fn test_uniform_gray_across_groups() {
    for backend in [Backend::Cpu, Backend::Serial] {
        let engine = engine(backend);
        let img = gray_image(&engine, ImageFormat::Float4, 1040, 1040, 0.5);
        assert_relative_eq!(exposure_of(&engine, img), 0.36, epsilon = 1e-4);
    }
}

#[test]
fn test_odd_size_partial_tiles() {
    let engine = engine(Backend::Cpu);
    let img = gray_image(&engine, ImageFormat::Float4, 33, 17, 0.25);
    assert_relative_eq!(exposure_of(&engine, img), 0.72, epsilon = 1e-4);
}

#[test]
fn test_nan_and_inf_are_sanitized() {
    let engine = engine(Backend::Cpu);
    let img = gray_image(&engine, ImageFormat::Float3, 32, 32, 0.5);
    img.set3(0, 0, [f32::NAN, f32::INFINITY, -4.0]).unwrap();
    img.set3(20, 20, [f32::NEG_INFINITY; 3]).unwrap();

    let exposure = exposure_of(&engine, img);
    assert!(exposure.is_finite());
    assert_relative_eq!(exposure, 0.36, epsilon = 1e-2);
}

#[test]
fn test_black_image_is_neutral() {
    let engine = engine(Backend::Serial);
    let img = gray_image(&engine, ImageFormat::Float3, 48, 16, 0.0);
    assert_eq!(exposure_of(&engine, img), 1.0);
}

#[test]
fn test_half_source() {
    let engine = engine(Backend::Cpu);
    let img = gray_image(&engine, ImageFormat::Half4, 64, 40, 0.5);
    assert_relative_eq!(exposure_of(&engine, img), 0.36, epsilon = 1e-3);
}

#[test]
fn test_uchar_source_unsupported() {
    let engine = engine(Backend::Serial);
    let img = gray_image(&engine, ImageFormat::UChar3, 16, 16, 0.5);

    let mut ae = engine.new_autoexposure(img.desc()).unwrap();
    let _scratch = bind_scratch(&engine, &mut ae);
    ae.set_src(img).unwrap();

    let err = ae.run().unwrap_err();
    assert!(matches!(err, ComputeError::UnsupportedFormat(_)));
    assert!(ae.read_result().is_err());
}

#[test]
fn test_failed_run_clears_result() {
    let engine = engine(Backend::Serial);
    let mut ae = engine.new_autoexposure(&ImageDesc::new(ImageFormat::Float3, 32, 32)).unwrap();
    let _scratch = bind_scratch(&engine, &mut ae);

    ae.set_src(gray_image(&engine, ImageFormat::Float3, 32, 32, 0.5)).unwrap();
    ae.run().unwrap();
    assert_relative_eq!(ae.read_result().unwrap(), 0.36, epsilon = 1e-4);

    // same size, unsupported element type
    ae.set_src(gray_image(&engine, ImageFormat::UChar3, 32, 32, 0.5)).unwrap();
    assert!(matches!(ae.run(), Err(ComputeError::UnsupportedFormat(_))));
    assert!(matches!(ae.read_result(), Err(ComputeError::NotReady(_))));
    assert!(ae.result().is_err());

    // a good source brings the result back
    ae.set_src(gray_image(&engine, ImageFormat::Float3, 32, 32, 0.09)).unwrap();
    ae.run().unwrap();
    assert_relative_eq!(ae.read_result().unwrap(), 2.0, epsilon = 1e-3);
}

#[test]
fn test_rerun_is_bit_identical() {
    let engine = engine(Backend::Cpu);
    let desc = ImageDesc::new(ImageFormat::Float3, 200, 120);
    let img = engine.new_image(desc, Storage::Host).unwrap();
    img.fill_with(|h, w| [(h % 7) as f32 * 0.1, (w % 5) as f32 * 0.2, 0.3]).unwrap();

    let mut ae = engine.new_autoexposure(img.desc()).unwrap();
    let _scratch = bind_scratch(&engine, &mut ae);
    ae.set_src(img).unwrap();

    ae.run().unwrap();
    let first = ae.read_result().unwrap();
    ae.run().unwrap();
    assert_eq!(ae.read_result().unwrap().to_bits(), first.to_bits());
}

#[test]
fn test_backends_agree() {
    let cpu = engine(Backend::Cpu);
    let serial = engine(Backend::Serial);
    let fill = |h: usize, w: usize| [((h * 31 + w * 17) % 101) as f32 / 50.0, 0.2, (w % 3) as f32];

    let a = cpu.new_image(ImageDesc::new(ImageFormat::Float3, 300, 170), Storage::Host).unwrap();
    a.fill_with(fill).unwrap();
    let b = serial.new_image(ImageDesc::new(ImageFormat::Float3, 300, 170), Storage::Host).unwrap();
    b.fill_with(fill).unwrap();

    assert_eq!(exposure_of(&cpu, a).to_bits(), exposure_of(&serial, b).to_bits());
}

#[test]
fn test_rebind_source() {
    let engine = engine(Backend::Cpu);
    let desc = ImageDesc::new(ImageFormat::Float3, 32, 32);

    let mut ae = engine.new_autoexposure(&desc).unwrap();
    let _scratch = bind_scratch(&engine, &mut ae);

    ae.set_src(gray_image(&engine, ImageFormat::Float3, 32, 32, 0.5)).unwrap();
    ae.run().unwrap();
    assert_relative_eq!(ae.read_result().unwrap(), 0.36, epsilon = 1e-4);

    ae.set_src(gray_image(&engine, ImageFormat::Float3, 32, 32, 0.09)).unwrap();
    ae.run().unwrap();
    assert_relative_eq!(ae.read_result().unwrap(), 2.0, epsilon = 1e-3);
}

#[test]
fn test_size_mismatch_rejected() {
    let engine = engine(Backend::Serial);
    let mut ae = engine.new_autoexposure(&ImageDesc::new(ImageFormat::Float3, 32, 32)).unwrap();

    let err = ae.set_src(gray_image(&engine, ImageFormat::Float3, 32, 31, 0.5)).unwrap_err();
    assert!(matches!(err, ComputeError::DimensionMismatch { .. }));
    assert!(ae.src().is_none());

    // same size in another format is fine
    ae.set_src(gray_image(&engine, ImageFormat::Half3, 32, 32, 0.5)).unwrap();
}

#[test]
fn test_small_scratch_rejected() {
    let engine = engine(Backend::Serial);
    let mut ae = engine.new_autoexposure(&ImageDesc::new(ImageFormat::Float3, 32, 32)).unwrap();

    let buffer = engine.new_buffer(20, Storage::Device).unwrap();
    let small = engine
        .new_tensor_at(&buffer, lumen_compute::TensorDesc::x(5, lumen_core::DataType::F32), 0)
        .unwrap();
    let err = ae.set_scratch(small).unwrap_err();
    assert!(matches!(err, ComputeError::ScratchTooSmall { required: 24, actual: 20 }));
    assert!(ae.scratch().is_none());
}

#[test]
fn test_run_without_bindings() {
    let engine = engine(Backend::Serial);
    let mut ae = engine.new_autoexposure(&ImageDesc::new(ImageFormat::Float3, 8, 8)).unwrap();
    assert!(matches!(ae.run(), Err(ComputeError::NotReady(_))));
    assert!(ae.result().is_err());
}

#[test]
fn test_empty_image_rejected() {
    let engine = engine(Backend::Serial);
    assert!(engine.new_autoexposure(&ImageDesc::new(ImageFormat::Float3, 0, 8)).is_err());
}

#[test]
fn test_scratch_at_offset_in_shared_buffer() {
    let engine = engine(Backend::Cpu);
    let img = gray_image(&engine, ImageFormat::Float3, 64, 64, 0.5);
    let mut ae = engine.new_autoexposure(img.desc()).unwrap();

    // scratch placed after 100 bytes of unrelated data
    let shared = engine.new_buffer(100 + ae.scratch_byte_size(), Storage::Device).unwrap();
    let before_desc = lumen_compute::TensorDesc::x(25, lumen_core::DataType::F32);
    let before = engine.new_tensor_at(&shared, before_desc, 0).unwrap();
    before.fill(42.0).unwrap();

    ae.set_scratch(engine.new_tensor_at(&shared, ae.scratch_desc(), 100).unwrap()).unwrap();
    ae.set_src(img).unwrap();
    ae.run().unwrap();

    assert_relative_eq!(ae.read_result().unwrap(), 0.36, epsilon = 1e-4);
    assert!(before.to_vec_f32().unwrap().iter().all(|&v| v == 42.0));
}

#[test]
fn test_result_pointer_matches_read() {
    let engine = engine(Backend::Cpu);
    let img = gray_image(&engine, ImageFormat::Float3, 16, 16, 0.5);
    let mut ae = engine.new_autoexposure(img.desc()).unwrap();
    let _scratch = bind_scratch(&engine, &mut ae);
    ae.set_src(img).unwrap();
    ae.run().unwrap();

    let ptr = ae.result().unwrap();
    engine.wait();
    // CPU backends keep device memory host-addressable
    let value = unsafe { ptr.read(0) };
    assert_eq!(value, ae.read_result().unwrap());
}
