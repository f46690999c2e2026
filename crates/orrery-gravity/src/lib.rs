//! Pairwise N-body gravitational attraction.
//!
//! The integrator supplies one external force per body per simulation tick;
//! it never integrates positions itself — that is owned by the external
//! rigid-body backend, which pushes live position/velocity updates into the
//! per-body cache here and is expected to apply the returned forces through
//! its own API. Rebuild the integrator whenever the scene's gravitational
//! parameters change; reset the cache on every simulation reset.

use glam::DVec3;
use indexmap::IndexMap;
use orrery_core::{Body, Scene};
use std::collections::HashMap;

/// Below this squared separation a pair is treated as coincident and
/// skipped outright — a direct guard, independent of the softening term.
const COINCIDENT_EPSILON_SQ: f64 = 1e-12;

/// Latest live pose for one body, pushed by the rigid-body backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub position: DVec3,
    pub velocity: DVec3,
}

#[derive(Debug, Clone)]
pub struct GravitationalIntegrator {
    enabled: bool,
    gravitational_constant: f64,
    min_distance: f64,
    softening: f64,
    states: HashMap<String, BodyState>,
}

impl GravitationalIntegrator {
    /// Build from the scene's gravitational parameters, seeding the live
    /// cache with the scene's authoritative initial positions/velocities.
    pub fn from_scene(scene: &Scene) -> Self {
        let physics = &scene.gravitational_physics;
        Self {
            enabled: physics.enabled,
            gravitational_constant: physics.gravitational_constant,
            min_distance: physics.min_distance,
            softening: physics.softening,
            states: seed_states(scene),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Reset the live cache to the scene's authoritative initial values.
    /// Parameter changes require rebuilding the integrator instead.
    pub fn reset(&mut self, scene: &Scene) {
        self.states = seed_states(scene);
    }

    /// Record the latest backend-pushed pose for one body.
    pub fn update_body_state(&mut self, id: &str, position: DVec3, velocity: DVec3) {
        self.states
            .insert(id.to_string(), BodyState { position, velocity });
    }

    #[must_use]
    pub fn body_state(&self, id: &str) -> Option<BodyState> {
        self.states.get(id).copied()
    }

    /// Newtonian attraction over every unordered pair of positive-mass
    /// bodies. The softening term is added to the squared distance before
    /// the inverse-square divide, and the result is clamped by the minimum
    /// distance; the force acts along the raw displacement direction.
    /// Static bodies attract others but never receive a force. Degenerate
    /// cases (disabled, fewer than two massive bodies, coincident pairs,
    /// zero masses) silently contribute nothing.
    pub fn compute_forces(&self, objects: &[Body]) -> IndexMap<String, DVec3> {
        let mut forces: IndexMap<String, DVec3> = IndexMap::new();
        if !self.enabled {
            return forces;
        }

        let massive: Vec<(&Body, DVec3, f64)> = objects
            .iter()
            .filter_map(|body| {
                let mass = body.effective_gravitational_mass();
                (mass > 0.0).then(|| (body, self.position_of(body), mass))
            })
            .collect();
        if massive.len() < 2 {
            return forces;
        }

        let floor = self.min_distance * self.min_distance;
        for i in 0..massive.len() {
            for j in (i + 1)..massive.len() {
                let (body_a, pos_a, mass_a) = massive[i];
                let (body_b, pos_b, mass_b) = massive[j];

                let delta = pos_b - pos_a;
                let dist_sq = delta.length_squared();
                if dist_sq < COINCIDENT_EPSILON_SQ {
                    continue;
                }

                let softened = (dist_sq + self.softening * self.softening).max(floor);
                let magnitude = self.gravitational_constant * mass_a * mass_b / softened;
                let direction = delta / dist_sq.sqrt();

                if !body_a.is_static {
                    *forces.entry(body_a.id.clone()).or_insert(DVec3::ZERO) +=
                        direction * magnitude;
                }
                if !body_b.is_static {
                    *forces.entry(body_b.id.clone()).or_insert(DVec3::ZERO) -=
                        direction * magnitude;
                }
            }
        }
        forces
    }

    fn position_of(&self, body: &Body) -> DVec3 {
        self.states
            .get(&body.id)
            .map(|s| s.position)
            .unwrap_or(body.position)
    }
}

fn seed_states(scene: &Scene) -> HashMap<String, BodyState> {
    scene
        .objects
        .iter()
        .map(|body| {
            (
                body.id.clone(),
                BodyState {
                    position: body.position,
                    velocity: body.velocity,
                },
            )
        })
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────────
