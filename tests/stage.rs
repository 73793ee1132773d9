use glam::Vec3;
use image::{Rgba, RgbaImage};
use projection_mapper::material::{Fragment, Texture};
use projection_mapper::mesh::{build_box, build_plane};
use projection_mapper::records::{self, ProjectionRecord};
use projection_mapper::{
    Bounds, CameraMode, Euler, ProjectionSettings, ProjectorCamera, ProjectorKind, RasterDepthCapture, Stage,
};
use projection_mapper::loader::AssetLoader;
use std::sync::Arc;
use std::time::Duration;

fn red() -> Arc<Texture> {
    Arc::new(Texture::from_image("red.png", RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]))))
}

/// Backdrop 58 m down -Z with a small wall half way.
fn occluded_stage() -> Stage {
    let mut stage = Stage::new(Box::new(RasterDepthCapture::new(128)));
    stage.add_model("backdrop", build_box(Vec3::new(-40.0, 0.0, -60.0), Vec3::new(40.0, 20.0, -58.0)));
    stage.add_model("wall", build_box(Vec3::new(-2.0, 3.0, -31.0), Vec3::new(2.0, 7.0, -30.0)));
    stage
}

fn straight_ahead() -> ProjectionSettings {
    ProjectionSettings {
        position: Vec3::new(0.0, 5.0, 0.0),
        rotation: Euler::new(0.0, 0.0, 0.0),
        fov: 60.0,
        aspect: Some(1.0),
        screen: false,
        ..Default::default()
    }
}

fn wait_for_loads(stage: &mut Stage) {
    for _ in 0..500 {
        stage.frame(0.0);
        if stage.loading() == 0 {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("loads never finished");
}

#[test]
fn every_model_gets_one_slot_per_projection() {
    let mut stage = occluded_stage();
    let ids: Vec<_> = (0..3).map(|_| stage.add_projection(straight_ahead(), None)).collect();
    for s in stage.scene().models() {
        assert_eq!(s.slots().len(), ids.len() + 1);
        assert_eq!(s.mesh().groups().len(), ids.len() + 1);
        assert_eq!(s.projections().collect::<Vec<_>>(), ids);
    }
}

#[test]
fn wall_blocks_the_projection_behind_it() {
    let mut stage = occluded_stage();
    let id = stage.add_projection(straight_ahead(), Some(red()));
    stage.frame(0.0);

    let backdrop = stage.scene().surface_by_name("backdrop").unwrap().id();
    let material = stage.projection(id).unwrap().binding(backdrop).unwrap();

    assert!(matches!(material.shade(Vec3::new(0.0, 5.0, -58.0), 0.0), Fragment::Fallback(_)));
    assert!(matches!(material.shade(Vec3::new(15.0, 5.0, -58.0), 0.0), Fragment::Textured(_)));
    // outside the frustum
    assert!(matches!(material.shade(Vec3::new(0.0, 5.0, 10.0), 0.0), Fragment::Fallback(_)));
}

#[test]
fn repeated_updates_are_bit_identical() {
    let mut stage = occluded_stage();
    let id = stage.add_projection(straight_ahead(), Some(red()));
    stage.frame(0.0);
    let wall = stage.scene().surface_by_name("wall").unwrap().id();

    let snapshot = |stage: &Stage| {
        let p = stage.projection(id).unwrap();
        (
            p.depth_map().unwrap().data().to_vec(),
            p.binding(wall).unwrap().view_proj(),
        )
    };
    let before = snapshot(&stage);
    stage.edit(id, |p, cx| p.update(cx));
    let after = snapshot(&stage);

    assert_eq!(before.1, after.1);
    assert!(before.0.iter().zip(&after.0).all(|(a, b)| a.to_bits() == b.to_bits()));
}

#[test]
fn exported_records_restore_the_pose() {
    let mut stage = occluded_stage();
    let settings = ProjectionSettings {
        position: Vec3::new(12.0, 3.5, -4.0),
        rotation: Euler::new(-0.1, 0.8, 0.02),
        fov: 42.0,
        far: 300.0,
        ..straight_ahead()
    };
    stage.add_projection(settings.clone(), Some(red()));
    stage.add_projection(
        ProjectionSettings {
            kind: ProjectorKind::Orthographic,
            bounds: Some(Bounds::from([-20.0, 20.0, 10.0, -10.0])),
            ..straight_ahead()
        },
        Some(red()),
    );

    let json = serde_json::to_string(&stage.export_records()).unwrap();
    let restored: Vec<ProjectionRecord> = records::parse_records(&json).unwrap();
    assert_eq!(restored.len(), 2);

    let persp = restored[0].to_settings();
    assert!(persp.position.abs_diff_eq(settings.position, 1e-5));
    let (a, b) = (persp.rotation.to_quat(), settings.rotation.to_quat());
    assert!(a.dot(b).abs() > 1.0 - 1e-5);
    assert_eq!(persp.fov, 42.0);
    assert_eq!(persp.far, 300.0);

    let ortho = restored[1].to_settings();
    assert_eq!(ortho.kind, ProjectorKind::Orthographic);
    assert_eq!(ortho.bounds, Some(Bounds::from([-20.0, 20.0, 10.0, -10.0])));
}

#[test]
fn wider_lenses_see_more() {
    let mut last = 0.0;
    for fov in [20.0, 40.0, 60.0, 90.0, 120.0] {
        let size = ProjectorCamera::perspective(fov, 0.75, 1.0, 150.0).view_size(10.0);
        assert!(size.y > last);
        assert!((size.x / size.y - 0.75).abs() < 1e-4);
        last = size.y;
    }
}

#[test]
fn attached_projection_implies_first_person() {
    let mut stage = occluded_stage();
    let a = stage.add_projection(straight_ahead(), None);
    stage.add_projection(straight_ahead(), None);

    let check = |stage: &Stage| {
        if stage.operator().attached().is_some() {
            assert_eq!(stage.operator().mode(), CameraMode::FirstPerson);
        }
    };
    stage.select(0);
    check(&stage);
    stage.select(1);
    check(&stage);
    stage.toggle_mode();
    check(&stage);
    assert_eq!(stage.operator().attached(), None);
    stage.attach_projection(a, false);
    stage.to_map();
    check(&stage);
    stage.attach_projection(a, true);
    stage.pointer_lost();
    check(&stage);
    assert!(!stage.projection(a).unwrap().focus());
}

#[test]
fn textures_for_removed_projections_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    RgbaImage::from_pixel(8, 4, Rgba([0, 255, 0, 255]))
        .save(dir.path().join("green.png"))
        .unwrap();

    let capture = Box::new(RasterDepthCapture::new(16));
    let mut stage = Stage::with_loader(capture, AssetLoader::new(Some(dir.path().to_path_buf())));
    stage.add_model("ground", build_plane(100.0));

    let kept = stage.add_projection(straight_ahead(), None);
    let removed = stage.add_projection(straight_ahead(), None);
    stage.select_texture_source(kept, "green.png").unwrap();
    stage.select_texture_source(removed, "green.png").unwrap();
    assert!(stage.remove_projection(removed));

    wait_for_loads(&mut stage);
    assert_eq!(stage.projections().len(), 1);
    assert_eq!(stage.projection(kept).unwrap().texture_source(), Some("green.png"));
    assert!(stage.projection(removed).is_none());
}

#[test]
fn records_create_projections_once_media_arrives() {
    let dir = tempfile::tempdir().unwrap();
    RgbaImage::from_pixel(4, 4, Rgba([0, 0, 255, 255]))
        .save(dir.path().join("blue.png"))
        .unwrap();
    let json = r#"[
        { "media": "blue.png", "camera": { "position": [0, 5, 0], "rotation": [0, 0, 0], "fov": 50 } },
        { "media": "missing.png", "camera": { "position": [0, 5, 0], "rotation": [0, 0, 0] } }
    ]"#;

    let mut stage = Stage::with_loader(
        Box::new(RasterDepthCapture::new(16)),
        AssetLoader::new(Some(dir.path().to_path_buf())),
    );
    stage.add_model("ground", build_plane(100.0));
    let list = records::parse_records(json).unwrap();
    assert_eq!(stage.load_records(&list).len(), 2);
    assert!(stage.projections().is_empty());

    wait_for_loads(&mut stage);
    assert_eq!(stage.projections().len(), 1);
    assert_eq!(stage.projections()[0].camera().fov(), 50.0);
}

#[test]
fn attach_then_detach_restores_the_surface() {
    let mut stage = occluded_stage();
    let a = stage.add_projection(straight_ahead(), None);
    let b = stage.add_projection(straight_ahead(), None);
    let wall = stage.scene().surface_by_name("wall").unwrap().id();

    assert!(stage.edit(a, |p, cx| p.detach_from_surface(cx.scene, wall)).unwrap());
    let counts = |stage: &Stage| {
        let s = stage.scene().surface(wall).unwrap();
        (s.slots().len(), s.mesh().groups().len())
    };
    let before = counts(&stage);
    assert_eq!(before, (2, 2));

    let order = stage.order();
    assert!(stage.edit(a, |p, cx| p.attach_to_surface(cx.scene, wall, &order)).unwrap());
    assert_eq!(counts(&stage), (3, 3));
    assert_eq!(stage.scene().surface(wall).unwrap().slot_of(b), Some(2));

    assert!(stage.edit(a, |p, cx| p.detach_from_surface(cx.scene, wall)).unwrap());
    assert_eq!(counts(&stage), before);
    assert_eq!(stage.scene().surface(wall).unwrap().slot_of(b), Some(1));
}
