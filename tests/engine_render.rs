// End-to-end render contract: quad texture reproduction, coverage masking,
// and the untransformed interpolant channel. Tests skip when the host has no
// usable GPU adapter.

use ndarray::{array, Array2, Array3};
use texraster::{RasterError, Rasterizer};

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

fn quad_points() -> Array2<f32> {
    array![
        [-1.0f32, -1.0, 0.0],
        [1.0, -1.0, 0.0],
        [1.0, 1.0, 0.0],
        [-1.0, 1.0, 0.0]
    ]
}

fn quad_trilist() -> Array2<u32> {
    array![[0u32, 1, 2], [2, 3, 0]]
}

fn quad_tcoords() -> Array2<f32> {
    array![[0.0f32, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]
}

/// Deterministic texture pattern with all channels distinct.
fn test_texture(h: usize, w: usize) -> Array3<f32> {
    let mut tex = Array3::<f32>::zeros((h, w, 3));
    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                tex[[y, x, c]] = ((x * 7 + y * 13 + c * 31) % 97) as f32 / 96.0;
            }
        }
    }
    tex
}

#[test]
fn full_screen_quad_reproduces_texture() {
    let (w, h) = (64usize, 48usize);
    let Some(mut engine) = try_engine(w as u32, h as u32) else {
        return;
    };
    let texture = test_texture(h, w);
    let out = engine
        .render(
            quad_points().view(),
            quad_trilist().view(),
            quad_tcoords().view(),
            texture.view(),
            None,
            None,
        )
        .unwrap();

    assert_eq!(out.rgb.dim(), (h, w, 3));
    for y in 0..h {
        for x in 0..w {
            assert!(out.mask[[y, x]], "uncovered pixel at ({y}, {x})");
            for c in 0..3 {
                let got = out.rgb[[y, x, c]];
                let want = texture[[y, x, c]];
                assert!(
                    (got - want).abs() < 1e-5,
                    "pixel ({y}, {x}, {c}): got {got}, want {want}"
                );
            }
        }
    }
}

#[test]
fn uncovered_pixels_keep_mask_false_and_clear_color() {
    let Some(mut engine) = try_engine(64, 64) else {
        return;
    };
    // Lower-left half triangle; the top-right region stays uncovered.
    let points = array![[-1.0f32, -1.0, 0.0], [1.0, -1.0, 0.0], [-1.0, 1.0, 0.0]];
    let trilist = array![[0u32, 1, 2]];
    let tcoords = array![[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0]];
    let texture = test_texture(16, 16);

    let out = engine
        .render(
            points.view(),
            trilist.view(),
            tcoords.view(),
            texture.view(),
            None,
            None,
        )
        .unwrap();

    // Bottom-left of the caller image is inside the triangle.
    assert!(out.mask[[61, 2]]);
    // Top-right is well outside and reads the white clear color.
    assert!(!out.mask[[2, 61]]);
    for c in 0..3 {
        assert_eq!(out.rgb[[2, 61, c]], 1.0);
    }
}

#[test]
fn custom_clear_color_fills_uncovered_pixels() {
    let Some(mut engine) = try_engine(64, 64) else {
        return;
    };
    assert_eq!(engine.clear_color(), [1.0, 1.0, 1.0, 0.0]);
    engine.set_clear_color([0.25, 0.5, 0.75, 0.0]);

    // Lower-left half triangle; the top-right region stays uncovered.
    let points = array![[-1.0f32, -1.0, 0.0], [1.0, -1.0, 0.0], [-1.0, 1.0, 0.0]];
    let trilist = array![[0u32, 1, 2]];
    let tcoords = array![[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0]];
    let texture = test_texture(16, 16);

    let out = engine
        .render(
            points.view(),
            trilist.view(),
            tcoords.view(),
            texture.view(),
            None,
            None,
        )
        .unwrap();

    assert!(!out.mask[[2, 61]]);
    assert!((out.rgb[[2, 61, 0]] - 0.25).abs() < 1e-6);
    assert!((out.rgb[[2, 61, 1]] - 0.5).abs() < 1e-6);
    assert!((out.rgb[[2, 61, 2]] - 0.75).abs() < 1e-6);

    // Clear alpha feeds the coverage mask: a non-zero alpha makes every
    // uncovered pixel read as covered.
    engine.set_clear_color([0.25, 0.5, 0.75, 1.0]);
    let out = engine
        .render(
            points.view(),
            trilist.view(),
            tcoords.view(),
            texture.view(),
            None,
            None,
        )
        .unwrap();
    assert!(out.mask[[2, 61]]);
    assert!(out.mask[[61, 2]]);
}

#[test]
fn default_interpolant_is_model_space_points() {
    let (w, h) = (64usize, 64usize);
    let Some(mut engine) = try_engine(w as u32, h as u32) else {
        return;
    };
    let texture = test_texture(8, 8);
    let out = engine
        .render(
            quad_points().view(),
            quad_trilist().view(),
            quad_tcoords().view(),
            texture.view(),
            None,
            None,
        )
        .unwrap();

    // Top-left pixel center sits near model-space (-1, 1, 0).
    let expect_x = -1.0 + 1.0 / w as f32;
    let expect_y = 1.0 - 1.0 / h as f32;
    assert!((out.interpolant[[0, 0, 0]] - expect_x).abs() < 1e-4);
    assert!((out.interpolant[[0, 0, 1]] - expect_y).abs() < 1e-4);
    assert!(out.interpolant[[0, 0, 2]].abs() < 1e-5);
}

#[test]
fn interpolant_ignores_transform_matrices() {
    let (w, h) = (64usize, 64usize);
    let Some(mut engine) = try_engine(w as u32, h as u32) else {
        return;
    };
    // Shift the quad half a unit right; the interpolant must stay in model
    // space, so covered pixels report pre-transform coordinates.
    let model = array![
        [1.0f32, 0.0, 0.0, 0.5],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0]
    ];
    engine.set_model_matrix(model.view()).unwrap();

    let texture = test_texture(8, 8);
    let out = engine
        .render(
            quad_points().view(),
            quad_trilist().view(),
            quad_tcoords().view(),
            texture.view(),
            None,
            None,
        )
        .unwrap();

    // Pixel three quarters across sits at NDC x = 0.5, which the shifted quad
    // covers with model-space x = 0.
    let x = (3 * w) / 4;
    let y = h / 2;
    assert!(out.mask[[y, x]]);
    assert!(
        out.interpolant[[y, x, 0]].abs() < 2.0 / w as f32,
        "interpolant x = {}, expected model space ~0",
        out.interpolant[[y, x, 0]]
    );

    // The left quarter of the screen is no longer covered.
    assert!(!out.mask[[y, 2]]);
}

#[test]
fn matrix_setters_round_trip_and_reject_bad_shapes() {
    let Some(mut engine) = try_engine(8, 8) else {
        return;
    };
    let m = array![
        [1.0f32, 2.0, 3.0, 4.0],
        [5.0, 6.0, 7.0, 8.0],
        [9.0, 10.0, 11.0, 12.0],
        [13.0, 14.0, 15.0, 16.0]
    ];
    engine.set_model_matrix(m.view()).unwrap();
    assert_eq!(engine.model_matrix(), m);

    let bad = Array2::<f32>::zeros((4, 3));
    let err = engine.set_model_matrix(bad.view()).unwrap_err();
    assert!(matches!(err, RasterError::Shape { .. }));
    // Prior state survives the failed set.
    assert_eq!(engine.model_matrix(), m);
}

#[test]
fn malformed_points_fail_before_any_gpu_work() {
    let Some(mut engine) = try_engine(8, 8) else {
        return;
    };
    let points = Array2::<f32>::zeros((4, 2));
    let err = engine
        .render(
            points.view(),
            quad_trilist().view(),
            quad_tcoords().view(),
            test_texture(4, 4).view(),
            None,
            None,
        )
        .unwrap_err();
    match err {
        RasterError::Shape { what, .. } => assert_eq!(what, "points"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn constructor_applies_optional_matrices() {
    let view = array![
        [1.0f32, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0]
    ];
    let projection = array![
        [0.5f32, 0.0, 0.0, 0.0],
        [0.0, 0.5, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0]
    ];
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = match Rasterizer::with_matrices(
        16,
        16,
        None,
        Some(view.view()),
        Some(projection.view()),
    ) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            return;
        }
    };
    assert_eq!(engine.width(), 16);
    assert_eq!(engine.height(), 16);
    assert_eq!(engine.view_matrix(), view);
    assert_eq!(engine.projection_matrix(), projection);
}
