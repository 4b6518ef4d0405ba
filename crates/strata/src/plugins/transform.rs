//! 2D transforms and hierarchy propagation.
//!
//! Entities carry a local [`Transform`] relative to their parent. Once per
//! tick, in [`Phase::PostUpdate`], [`TransformPlugin`] walks the hierarchy
//! breadth first from every root and writes the composed result into each
//! entity's [`GlobalTransform`].
//!
//! Composition is additive except for scale:
//!
//! ```text
//! global.translation = parent.translation + local.translation
//! global.rotation    = parent.rotation    + local.rotation
//! global.size        = parent.size        + local.size
//! global.layer       = parent.layer       + local.layer
//! global.scale       = parent.scale       * local.scale
//! ```

use std::collections::VecDeque;

pub use glam::{Affine2, Vec2};
use serde::{Deserialize, Serialize};

use crate::app::{App, Plugin};
use crate::context::Context;
use crate::ecs::{Component, Entity, has_no_parent};
use crate::error::Result;
use crate::schedule::Phase;

/// Position, rotation (radians), scale, size and draw layer of an entity,
/// relative to its parent. Missing fields deserialize to [`Transform::IDENTITY`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub translation: Vec2,
    pub rotation: f32,
    pub scale: Vec2,
    pub size: Vec2,
    pub layer: i32,
}

impl Component for Transform {}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec2::ZERO,
        rotation: 0.0,
        scale: Vec2::ONE,
        size: Vec2::ZERO,
        layer: 0,
    };

    pub fn from_xy(x: f32, y: f32) -> Self {
        Self {
            translation: Vec2::new(x, y),
            ..Self::IDENTITY
        }
    }

    pub fn with_translation(mut self, translation: Vec2) -> Self {
        self.translation = translation;
        self
    }

    pub fn with_rotation(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec2) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_size(mut self, size: Vec2) -> Self {
        self.size = size;
        self
    }

    pub fn with_layer(mut self, layer: i32) -> Self {
        self.layer = layer;
        self
    }

    /// The 2D affine matrix (scale, then rotate, then translate).
    pub fn matrix(&self) -> Affine2 {
        Affine2::from_scale_angle_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// World-space transform, written by the propagation system. Treat as read-only.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GlobalTransform(pub Transform);

impl Component for GlobalTransform {}

impl GlobalTransform {
    /// This transform with `local` applied as a child.
    pub fn compose(&self, local: &Transform) -> Self {
        let parent = &self.0;
        Self(Transform {
            translation: parent.translation + local.translation,
            rotation: parent.rotation + local.rotation,
            scale: parent.scale * local.scale,
            size: parent.size + local.size,
            layer: parent.layer + local.layer,
        })
    }

    pub fn translation(&self) -> Vec2 {
        self.0.translation
    }

    pub fn matrix(&self) -> Affine2 {
        self.0.matrix()
    }
}

impl From<Transform> for GlobalTransform {
    fn from(local: Transform) -> Self {
        Self(local)
    }
}

/// The two components every positioned entity needs.
pub fn transform_bundle(transform: Transform) -> (Transform, GlobalTransform) {
    (transform, GlobalTransform::from(transform))
}

fn propagate_transforms(ctx: &mut Context<'_>) -> Result<()> {
    let mut queue: VecDeque<Entity> = VecDeque::new();

    let mut roots = ctx.query::<(Entity, &Transform, &mut GlobalTransform)>([has_no_parent()])?;
    for (entity, local, global) in roots.iter() {
        *global = GlobalTransform::from(*local);
        queue.push_back(entity);
    }
    drop(roots);

    while let Some(parent) = queue.pop_front() {
        let Some(parent_global) = ctx.world.get::<GlobalTransform>(parent)?.copied() else {
            continue;
        };
        for child in ctx.world.children(parent)? {
            let Some(local) = ctx.world.get::<Transform>(child)?.copied() else {
                continue;
            };
            if let Some(global) = ctx.world.get_mut::<GlobalTransform>(child)? {
                *global = parent_global.compose(&local);
                queue.push_back(child);
            }
        }
    }
    Ok(())
}

/// Registers [`Transform`] and [`GlobalTransform`] and propagates them.
pub struct TransformPlugin;

impl Plugin for TransformPlugin {
    fn build(&self, app: &mut App) {
        app.add_component::<Transform>()
            .add_component::<GlobalTransform>()
            .add_system(Phase::PostUpdate, propagate_transforms);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn compose_is_additive_except_scale() {
        let parent = GlobalTransform(
            Transform::from_xy(10.0, 0.0)
                .with_scale(Vec2::splat(2.0))
                .with_layer(1),
        );
        let child = Transform::from_xy(1.0, 2.0)
            .with_scale(Vec2::new(0.5, 3.0))
            .with_rotation(0.25)
            .with_layer(2);
        let global = parent.compose(&child);
        assert_eq!(global.translation(), Vec2::new(11.0, 2.0));
        assert_eq!(global.0.scale, Vec2::new(1.0, 6.0));
        assert_eq!(global.0.layer, 3);
        assert_eq!(global.0.rotation, 0.25);
    }

    #[test]
    fn partial_json_fills_in_identity() {
        let json = r#"{ "translation": [4.0, 2.0], "layer": 3 }"#;
        let t: Transform = serde_json::from_str(json).unwrap();
        assert_eq!(t.translation, Vec2::new(4.0, 2.0));
        assert_eq!(t.scale, Vec2::ONE);
        assert_eq!(t.layer, 3);
    }

    #[test]
    fn propagates_down_the_hierarchy() {
        let mut runtime = App::new().plugin(TransformPlugin).build().unwrap();
        runtime.start_blocking().unwrap();

        let world = runtime.world_mut();
        let root = world.spawn(transform_bundle(Transform::from_xy(1.0, 1.0))).unwrap();
        let child = world
            .spawn_child(root, transform_bundle(Transform::from_xy(2.0, 0.0)))
            .unwrap();
        let grandchild = world
            .spawn_child(child, transform_bundle(Transform::from_xy(0.0, 3.0)))
            .unwrap();
        // No GlobalTransform: skipped, and so is everything below it.
        let bare = world.spawn_child(root, (Transform::from_xy(9.0, 9.0),)).unwrap();

        runtime.tick(Duration::ZERO).unwrap();

        let world = runtime.world();
        let global = |e: Entity| world.get::<GlobalTransform>(e).unwrap().unwrap().translation();
        assert_eq!(global(root), Vec2::new(1.0, 1.0));
        assert_eq!(global(child), Vec2::new(3.0, 1.0));
        assert_eq!(global(grandchild), Vec2::new(3.0, 4.0));
        assert!(!world.has::<GlobalTransform>(bare).unwrap());
    }

    #[test]
    fn reparenting_moves_the_subtree() {
        let mut runtime = App::new().plugin(TransformPlugin).build().unwrap();
        runtime.start_blocking().unwrap();

        let world = runtime.world_mut();
        let a = world.spawn(transform_bundle(Transform::from_xy(5.0, 0.0))).unwrap();
        let b = world.spawn(transform_bundle(Transform::from_xy(0.0, 5.0))).unwrap();
        let item = world
            .spawn_child(a, transform_bundle(Transform::from_xy(1.0, 1.0)))
            .unwrap();
        runtime.tick(Duration::ZERO).unwrap();

        runtime.world_mut().set_parent(item, b).unwrap();
        runtime.tick(Duration::ZERO).unwrap();
        let global = runtime.world().get::<GlobalTransform>(item).unwrap().unwrap();
        assert_eq!(global.translation(), Vec2::new(1.0, 6.0));
    }
}
