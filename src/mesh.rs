// mesh.rs — triangle meshes with material groups, plus procedural builders

use glam::Vec3;

/// A run of indices drawn with one material slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Group {
    pub start: u32,
    pub count: u32,
    pub material_index: usize,
}

#[derive(Debug, Clone)]
pub struct Mesh {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    groups: Vec<Group>,
}

impl Mesh {
    /// New mesh with a single group covering every triangle with slot 0.
    pub fn new(positions: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        let mut mesh = Self {
            positions,
            indices,
            groups: Vec::new(),
        };
        mesh.add_full_group(0);
        mesh
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn clear_groups(&mut self) {
        self.groups.clear();
    }

    /// Appends a group spanning the whole index buffer.
    pub fn add_full_group(&mut self, material_index: usize) {
        self.groups.push(Group {
            start: 0,
            count: self.indices.len() as u32,
            material_index,
        });
    }

    /// Removes the group drawn with `material_index` and renumbers the
    /// following groups so group `i` keeps pointing at slot `i`.
    pub fn remove_group(&mut self, material_index: usize) -> bool {
        let Some(pos) = self
            .groups
            .iter()
            .position(|g| g.material_index == material_index)
        else {
            return false;
        };
        self.groups.remove(pos);
        for g in &mut self.groups {
            if g.material_index > material_index {
                g.material_index -= 1;
            }
        }
        true
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).map(|tri| {
            [
                Vec3::from(self.positions[tri[0] as usize]),
                Vec3::from(self.positions[tri[1] as usize]),
                Vec3::from(self.positions[tri[2] as usize]),
            ]
        })
    }
}

/// Square ground plane at y = 0, facing up.
pub fn build_plane(size: f32) -> Mesh {
    let h = size / 2.0;
    Mesh::new(
        vec![[-h, 0.0, -h], [h, 0.0, -h], [h, 0.0, h], [-h, 0.0, h]],
        vec![0, 2, 1, 0, 3, 2],
    )
}

/// Unit quad in the XY plane facing +Z, centred on the origin.
pub fn build_quad() -> Mesh {
    Mesh::new(
        vec![
            [-0.5, -0.5, 0.0],
            [0.5, -0.5, 0.0],
            [0.5, 0.5, 0.0],
            [-0.5, 0.5, 0.0],
        ],
        vec![0, 1, 2, 0, 2, 3],
    )
}

/// Axis-aligned box, outward-facing triangles.
pub fn build_box(min: Vec3, max: Vec3) -> Mesh {
    let mut positions = Vec::with_capacity(8);
    for i in 0..8 {
        positions.push([
            if i & 1 == 0 { min.x } else { max.x },
            if i & 2 == 0 { min.y } else { max.y },
            if i & 4 == 0 { min.z } else { max.z },
        ]);
    }

    // corner index = x | y << 1 | z << 2
    let faces: [[u32; 4]; 6] = [
        [0, 4, 6, 2], // -x
        [1, 3, 7, 5], // +x
        [0, 1, 5, 4], // -y
        [2, 6, 7, 3], // +y
        [0, 2, 3, 1], // -z
        [4, 5, 7, 6], // +z
    ];

    let mut indices = Vec::with_capacity(36);
    for [a, b, c, d] in faces {
        indices.extend_from_slice(&[a, b, c, a, c, d]);
    }

    Mesh::new(positions, indices)
}
