//! Minimal transform hierarchy the runtime mutates. Nodes carry a local
//! position/rotation/scale relative to their parent; world-space values are
//! derived on demand by walking the parent chain.

use std::collections::BTreeMap;

use glam::{EulerRot, Mat4, Quat, Vec3};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTransform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for LocalTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl LocalTransform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Build a transform from a position, `{x, y, z}` Euler degrees (applied
    /// yaw, then pitch, then roll) and a scale.
    pub fn from_parts(position: [f32; 3], euler_degrees: [f32; 3], scale: [f32; 3]) -> Self {
        Self {
            position: Vec3::from_array(position),
            rotation: quat_from_euler_degrees(euler_degrees),
            scale: Vec3::from_array(scale),
        }
    }

    pub fn with_scale(scale: Vec3) -> Self {
        Self {
            scale,
            ..Self::IDENTITY
        }
    }

    fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

pub fn quat_from_euler_degrees(euler: [f32; 3]) -> Quat {
    Quat::from_euler(
        EulerRot::YXZ,
        euler[1].to_radians(),
        euler[0].to_radians(),
        euler[2].to_radians(),
    )
}

/// Yaw in degrees around +Y for a rotation, measured from +Z towards +X.
pub fn yaw_degrees(rotation: Quat) -> f32 {
    let forward = rotation * Vec3::Z;
    forward.x.atan2(forward.z).to_degrees()
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    local: LocalTransform,
    active: bool,
}

#[derive(Debug, Default)]
pub struct Scene {
    nodes: BTreeMap<NodeId, Node>,
    next_id: u32,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(
        &mut self,
        name: impl Into<String>,
        parent: Option<NodeId>,
        local: LocalTransform,
    ) -> NodeId {
        let name = name.into();
        let parent = match parent {
            Some(parent) if self.nodes.contains_key(&parent) => Some(parent),
            Some(parent) => {
                log::warn!(
                    "scene.spawn {name}: parent #{} no longer exists; attaching to root",
                    parent.0
                );
                None
            }
            None => None,
        };

        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes.insert(
            id,
            Node {
                name,
                parent,
                children: Vec::new(),
                local,
                active: true,
            },
        );
        if let Some(parent) = parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.children.push(id);
        }
        id
    }

    /// Destroys a node and its whole subtree. Returns false when the node was
    /// already gone.
    pub fn despawn(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.remove(&id) else {
            return false;
        };
        if let Some(parent) = node.parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.children.retain(|child| *child != id);
        }
        let mut pending = node.children;
        while let Some(child) = pending.pop() {
            if let Some(removed) = self.nodes.remove(&child) {
                pending.extend(removed.children);
            }
        }
        true
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(&id).map(|node| node.name.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn set_active(&mut self, id: NodeId, active: bool) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.active = active;
                true
            }
            None => false,
        }
    }

    /// True when the node and every ancestor are active.
    pub fn is_active_in_hierarchy(&self, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.nodes.get(&current) {
                Some(node) if node.active => cursor = node.parent,
                _ => return false,
            }
        }
        true
    }

    pub fn local(&self, id: NodeId) -> Option<LocalTransform> {
        self.nodes.get(&id).map(|node| node.local)
    }

    pub fn set_local(&mut self, id: NodeId, local: LocalTransform) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.local = local;
                true
            }
            None => false,
        }
    }

    pub fn world_matrix(&self, id: NodeId) -> Option<Mat4> {
        let node = self.nodes.get(&id)?;
        let local = node.local.matrix();
        match node.parent {
            Some(parent) => Some(self.world_matrix(parent)? * local),
            None => Some(local),
        }
    }

    pub fn world_position(&self, id: NodeId) -> Option<Vec3> {
        self.world_matrix(id)
            .map(|matrix| matrix.transform_point3(Vec3::ZERO))
    }

    pub fn world_rotation(&self, id: NodeId) -> Option<Quat> {
        let node = self.nodes.get(&id)?;
        match node.parent {
            Some(parent) => Some((self.world_rotation(parent)? * node.local.rotation).normalize()),
            None => Some(node.local.rotation),
        }
    }

    /// Component-wise product of the scales along the parent chain.
    pub fn world_scale(&self, id: NodeId) -> Option<Vec3> {
        let node = self.nodes.get(&id)?;
        match node.parent {
            Some(parent) => Some(self.world_scale(parent)? * node.local.scale),
            None => Some(node.local.scale),
        }
    }

    pub fn set_world_position(&mut self, id: NodeId, position: Vec3) -> bool {
        let Some(parent) = self.nodes.get(&id).map(|node| node.parent) else {
            return false;
        };
        let local_position = match parent.and_then(|parent| self.world_matrix(parent)) {
            Some(parent_matrix) if parent_matrix.determinant().abs() > f32::EPSILON => {
                parent_matrix.inverse().transform_point3(position)
            }
            Some(parent_matrix) => position - parent_matrix.transform_point3(Vec3::ZERO),
            None => position,
        };
        self.update_local(id, |local| local.position = local_position)
    }

    pub fn set_world_rotation(&mut self, id: NodeId, rotation: Quat) -> bool {
        let Some(parent) = self.nodes.get(&id).map(|node| node.parent) else {
            return false;
        };
        let local_rotation = match parent.and_then(|parent| self.world_rotation(parent)) {
            Some(parent_rotation) => (parent_rotation.inverse() * rotation).normalize(),
            None => rotation,
        };
        self.update_local(id, |local| local.rotation = local_rotation)
    }

    /// Assigns the local scale that makes the node's world scale equal to
    /// `world`. A zero parent axis yields a zero local axis.
    pub fn set_world_scale(&mut self, id: NodeId, world: Vec3) -> bool {
        let Some(parent) = self.nodes.get(&id).map(|node| node.parent) else {
            return false;
        };
        let local_scale = match parent.and_then(|parent| self.world_scale(parent)) {
            Some(parent_scale) => divide_scale(world, parent_scale),
            None => world,
        };
        self.update_local(id, |local| local.scale = local_scale)
    }

    /// Copies world position, rotation and world scale of `source` onto `id`.
    pub fn copy_world_pose(&mut self, id: NodeId, source: NodeId) -> bool {
        let (Some(position), Some(rotation), Some(scale)) = (
            self.world_position(source),
            self.world_rotation(source),
            self.world_scale(source),
        ) else {
            return false;
        };
        self.set_world_position(id, position)
            && self.set_world_rotation(id, rotation)
            && self.set_world_scale(id, scale)
    }

    fn update_local(&mut self, id: NodeId, apply: impl FnOnce(&mut LocalTransform)) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                apply(&mut node.local);
                true
            }
            None => false,
        }
    }
}

pub fn divide_scale(world: Vec3, parent: Vec3) -> Vec3 {
    fn axis(value: f32, divisor: f32) -> f32 {
        if divisor != 0.0 {
            value / divisor
        } else {
            0.0
        }
    }
    Vec3::new(
        axis(world.x, parent.x),
        axis(world.y, parent.y),
        axis(world.z, parent.z),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    fn assert_vec(actual: Vec3, expected: Vec3) {
        assert!(
            actual.abs_diff_eq(expected, EPSILON),
            "{actual:?} != {expected:?}"
        );
    }

    #[test]
    fn world_scale_copy_divides_by_parent_scale() {
        let mut scene = Scene::new();
        let parent = scene.spawn(
            "fallback",
            None,
            LocalTransform::with_scale(Vec3::new(2.0, 1.0, 2.0)),
        );
        let character = scene.spawn("tongtong", Some(parent), LocalTransform::IDENTITY);
        let anchor = scene.spawn(
            "anchor",
            None,
            LocalTransform::with_scale(Vec3::splat(2.0)),
        );

        assert!(scene.copy_world_pose(character, anchor));
        assert_vec(scene.local(character).unwrap().scale, Vec3::new(1.0, 2.0, 1.0));
        assert_vec(scene.world_scale(character).unwrap(), Vec3::splat(2.0));
    }

    #[test]
    fn zero_parent_axis_produces_zero_local_axis() {
        let mut scene = Scene::new();
        let parent = scene.spawn(
            "flat",
            None,
            LocalTransform::with_scale(Vec3::new(1.0, 0.0, 4.0)),
        );
        let child = scene.spawn("child", Some(parent), LocalTransform::IDENTITY);
        scene.set_world_scale(child, Vec3::splat(2.0));
        assert_vec(scene.local(child).unwrap().scale, Vec3::new(2.0, 0.0, 0.5));
    }

    #[test]
    fn world_position_round_trips_through_rotated_parent() {
        let mut scene = Scene::new();
        let parent = scene.spawn(
            "image",
            None,
            LocalTransform::from_parts([1.0, 0.0, 3.0], [0.0, 90.0, 0.0], [2.0, 2.0, 2.0]),
        );
        let child = scene.spawn("start", Some(parent), LocalTransform::IDENTITY);
        let goal = Vec3::new(-4.0, 1.5, 0.25);
        scene.set_world_position(child, goal);
        assert_vec(scene.world_position(child).unwrap(), goal);

        let rotation = quat_from_euler_degrees([0.0, 30.0, 0.0]);
        scene.set_world_rotation(child, rotation);
        let world = scene.world_rotation(child).unwrap();
        assert!(world.abs_diff_eq(rotation, EPSILON) || world.abs_diff_eq(-rotation, EPSILON));
    }

    #[test]
    fn despawn_removes_subtree() {
        let mut scene = Scene::new();
        let root = scene.spawn("image", None, LocalTransform::IDENTITY);
        let a = scene.spawn("a", Some(root), LocalTransform::IDENTITY);
        let b = scene.spawn("b", Some(a), LocalTransform::IDENTITY);
        let other = scene.spawn("other", None, LocalTransform::IDENTITY);

        assert!(scene.despawn(a));
        assert!(!scene.contains(a));
        assert!(!scene.contains(b));
        assert!(scene.contains(root));
        assert!(scene.children(root).is_empty());
        assert!(scene.contains(other));
        assert!(!scene.despawn(a));
    }

    #[test]
    fn inactive_ancestor_hides_descendants() {
        let mut scene = Scene::new();
        let root = scene.spawn("image", None, LocalTransform::IDENTITY);
        let leaf = scene.spawn("target", Some(root), LocalTransform::IDENTITY);
        assert!(scene.is_active_in_hierarchy(leaf));
        scene.set_active(root, false);
        assert!(!scene.is_active_in_hierarchy(leaf));
        scene.set_active(root, true);
        assert!(scene.is_active_in_hierarchy(leaf));
    }

    #[test]
    fn yaw_follows_forward_axis() {
        let rotation = quat_from_euler_degrees([0.0, 90.0, 0.0]);
        assert!((yaw_degrees(rotation) - 90.0).abs() < 1e-3);
        assert!(yaw_degrees(Quat::IDENTITY).abs() < 1e-3);
    }
}
