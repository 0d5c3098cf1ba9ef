// Shader attachment and uniform lifecycle: reflection, typed access,
// carry-over semantics, and failure handling. Tests skip when the host has
// no usable GPU adapter.

use ndarray::{array, Array2, Array3};
use texraster::{RasterError, Rasterizer, ShaderSet, ShaderStage, UniformValue};

const TINTED_FRAGMENT: &str = r#"
@group(2) @binding(0) var<uniform> tint: vec3<f32>;
@group(2) @binding(1) var<uniform> gain: f32;

struct FragmentIn {
    @location(0) tcoord: vec2<f32>,
    @location(1) interpolant: vec3<f32>,
};

struct FragmentOut {
    @location(0) color: vec4<f32>,
    @location(1) interpolant: vec4<f32>,
};

@fragment
fn fs_main(in: FragmentIn) -> FragmentOut {
    var out: FragmentOut;
    out.color = vec4<f32>(tint * gain, 1.0);
    out.interpolant = vec4<f32>(in.interpolant, 1.0);
    return out;
}
"#;

fn try_engine(width: u32, height: u32) -> Option<Rasterizer> {
    let _ = env_logger::builder().is_test(true).try_init();
    match Rasterizer::new(width, height) {
        Ok(engine) => Some(engine),
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            None
        }
    }
}

fn render_quad(engine: &mut Rasterizer) -> texraster::RenderOutput {
    let points = array![
        [-1.0f32, -1.0, 0.0],
        [1.0, -1.0, 0.0],
        [1.0, 1.0, 0.0],
        [-1.0, 1.0, 0.0]
    ];
    let trilist = array![[0u32, 1, 2], [2, 3, 0]];
    let tcoords = array![[0.0f32, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
    let texture = Array3::<f32>::from_elem((8, 8, 3), 0.5);
    engine
        .render(
            points.view(),
            trilist.view(),
            tcoords.view(),
            texture.view(),
            None,
            None,
        )
        .unwrap()
}

#[test]
fn reflected_uniforms_drive_shading() {
    let Some(mut engine) = try_engine(32, 32) else {
        return;
    };
    engine
        .attach_shaders(ShaderSet::default().fragment(TINTED_FRAGMENT), true)
        .unwrap();

    let mut names = engine.active_uniform_names();
    names.sort();
    assert_eq!(names, vec!["gain".to_string(), "tint".to_string()]);

    engine
        .set_uniform("tint", UniformValue::Vec3([0.2, 0.4, 0.8]))
        .unwrap();
    engine.set_uniform("gain", UniformValue::Float(0.5)).unwrap();

    let out = render_quad(&mut engine);
    let expected = [0.1f32, 0.2, 0.4];
    for (c, want) in expected.iter().enumerate() {
        let got = out.rgb[[16, 16, c]];
        assert!(
            (got - want).abs() < 1e-5,
            "channel {c}: got {got}, want {want}"
        );
    }
}

#[test]
fn unknown_uniform_and_type_mismatch_are_rejected() {
    let Some(mut engine) = try_engine(16, 16) else {
        return;
    };
    engine
        .attach_shaders(ShaderSet::default().fragment(TINTED_FRAGMENT), true)
        .unwrap();

    let err = engine
        .set_uniform("missing", UniformValue::Float(1.0))
        .unwrap_err();
    assert!(matches!(err, RasterError::UnknownUniform(name) if name == "missing"));

    let err = engine.get_uniform("missing").unwrap_err();
    assert!(matches!(err, RasterError::UnknownUniform(_)));

    let err = engine
        .set_uniform("gain", UniformValue::Vec3([1.0, 1.0, 1.0]))
        .unwrap_err();
    match err {
        RasterError::TypeMismatch { name, expected, got } => {
            assert_eq!(name, "gain");
            assert_eq!(expected, "f32");
            assert_eq!(got, "vec3<f32>");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn carry_over_preserves_matching_uniform_values() {
    let Some(mut engine) = try_engine(16, 16) else {
        return;
    };
    engine
        .attach_shaders(ShaderSet::default().fragment(TINTED_FRAGMENT), true)
        .unwrap();
    engine
        .set_uniform("tint", UniformValue::Vec3([0.1, 0.2, 0.3]))
        .unwrap();

    // Re-attach an equivalent program with carry-over: the value survives.
    engine
        .attach_shaders(ShaderSet::default().fragment(TINTED_FRAGMENT), true)
        .unwrap();
    assert_eq!(
        engine.get_uniform("tint").unwrap(),
        Some(UniformValue::Vec3([0.1, 0.2, 0.3]))
    );
    // gain was never set and stays at its default.
    assert_eq!(engine.get_uniform("gain").unwrap(), None);
}

#[test]
fn attach_without_carry_over_resets_to_default_view() {
    let Some(mut engine) = try_engine(16, 16) else {
        return;
    };
    engine
        .attach_shaders(ShaderSet::default().fragment(TINTED_FRAGMENT), true)
        .unwrap();
    engine
        .set_uniform("tint", UniformValue::Vec3([0.9, 0.9, 0.9]))
        .unwrap();
    let model = array![
        [2.0f32, 0.0, 0.0, 0.0],
        [0.0, 2.0, 0.0, 0.0],
        [0.0, 0.0, 2.0, 0.0],
        [0.0, 0.0, 0.0, 1.0]
    ];
    engine.set_model_matrix(model.view()).unwrap();

    engine
        .attach_shaders(ShaderSet::default().fragment(TINTED_FRAGMENT), false)
        .unwrap();

    // Uniforms are back to defaults and the transforms to identity.
    assert_eq!(engine.get_uniform("tint").unwrap(), None);
    assert_eq!(engine.model_matrix(), Array2::<f32>::eye(4));
}

#[test]
fn geometry_stage_fails_the_attach() {
    let Some(mut engine) = try_engine(16, 16) else {
        return;
    };
    let err = engine
        .attach_shaders(ShaderSet::default().geometry("// not supported"), true)
        .unwrap_err();
    assert!(matches!(
        err,
        RasterError::CompileLink {
            stage: ShaderStage::Geometry,
            ..
        }
    ));
}

#[test]
fn failed_attach_keeps_previous_program_usable() {
    let Some(mut engine) = try_engine(16, 16) else {
        return;
    };
    let err = engine
        .attach_shaders(ShaderSet::default().fragment("this is not wgsl"), true)
        .unwrap_err();
    assert!(matches!(
        err,
        RasterError::CompileLink {
            stage: ShaderStage::Fragment,
            ..
        }
    ));

    // The built-in program is still attached and renders the texture.
    let out = render_quad(&mut engine);
    assert!((out.rgb[[8, 8, 0]] - 0.5).abs() < 1e-5);
    assert!(out.mask[[8, 8]]);
}
