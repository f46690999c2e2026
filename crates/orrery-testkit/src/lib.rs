//! Shared scene fixtures for orrery tests.

use glam::DVec3;
use orrery_core::{Body, BodyType, Scene};

/// A sphere body with explicit id, mass, and position; everything else
/// defaulted.
pub fn body(id: &str, mass: f64, position: [f64; 3]) -> Body {
    Body {
        id: id.to_string(),
        mass,
        position: DVec3::from_array(position),
        ..Body::default()
    }
}

/// Two unit-mass spheres placed symmetrically about the origin on the x-axis.
pub fn two_body_scene() -> Scene {
    let mut scene = Scene::new("two-body", "Two body test scene");
    scene.has_ground = false;
    scene.gravity = DVec3::ZERO;
    scene.gravitational_physics.enabled = true;
    scene.objects.push(body("a", 1.0, [-5.0, 0.0, 0.0]));
    scene.objects.push(body("b", 1.0, [5.0, 0.0, 0.0]));
    scene
}

/// A small terrestrial scene: static ground box plus two dynamic spheres.
pub fn sample_scene() -> Scene {
    let mut scene = Scene::new("sample", "Sample scene");
    scene.objects.push(Body {
        id: "ground".to_string(),
        body_type: BodyType::Box,
        mass: 0.0,
        is_static: true,
        radius: None,
        dimensions: Some([20.0, 1.0, 20.0]),
        position: DVec3::new(0.0, -0.5, 0.0),
        ..Body::default()
    });
    scene.objects.push(body("ball-1", 1.0, [0.0, 5.0, 0.0]));
    scene.objects.push(body("ball-2", 2.0, [3.0, 5.0, 0.0]));
    scene
}
