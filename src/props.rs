//! Prop template table.
//!
//! A prop is a hierarchical object: one root entity (`kind = prop`, carrying
//! the real-world mass) and one child per [`PartSpec`], shaped by the part's
//! primitive kind.  Part ids
//! are `"{root}/{part}"`.  Dimensions are metres, mass is kilograms.

use crate::types::{Color, Entity, EntityKind, Physics, Transform, Vec3};

#[derive(Debug)]
pub struct PartSpec {
    pub name: &'static str,
    pub kind: EntityKind,
    /// Offset of the part centre from the prop origin.
    pub offset: Vec3,
    /// Full extents of the part.
    pub size: Vec3,
}

#[derive(Debug)]
pub struct PropSpec {
    pub name: &'static str,
    /// Bounding extents (width, height, depth).
    pub dimensions: Vec3,
    pub mass: f32,
    pub color: Color,
    pub parts: &'static [PartSpec],
}

const WOOD: Color = Color::rgb(0.55, 0.38, 0.22);
const STEEL: Color = Color::rgb(0.62, 0.64, 0.66);
const RUBBER: Color = Color::rgb(0.85, 0.2, 0.15);

const fn part(name: &'static str, kind: EntityKind, offset: Vec3, size: Vec3) -> PartSpec {
    PartSpec {
        name,
        kind,
        offset,
        size,
    }
}

static PROPS: &[PropSpec] = &[
    PropSpec {
        name: "table",
        dimensions: Vec3::new(1.5, 0.75, 0.9),
        mass: 30.0,
        color: WOOD,
        parts: &[
            part("top", EntityKind::Cube, Vec3::new(0.0, 0.725, 0.0), Vec3::new(1.5, 0.05, 0.9)),
            part("leg_1", EntityKind::Cylinder, Vec3::new(-0.7, 0.35, -0.4), Vec3::new(0.05, 0.7, 0.05)),
            part("leg_2", EntityKind::Cylinder, Vec3::new(0.7, 0.35, -0.4), Vec3::new(0.05, 0.7, 0.05)),
            part("leg_3", EntityKind::Cylinder, Vec3::new(-0.7, 0.35, 0.4), Vec3::new(0.05, 0.7, 0.05)),
            part("leg_4", EntityKind::Cylinder, Vec3::new(0.7, 0.35, 0.4), Vec3::new(0.05, 0.7, 0.05)),
        ],
    },
    PropSpec {
        name: "chair",
        dimensions: Vec3::new(0.45, 0.9, 0.5),
        mass: 7.0,
        color: WOOD,
        parts: &[
            part("seat", EntityKind::Cube, Vec3::new(0.0, 0.45, 0.0), Vec3::new(0.45, 0.04, 0.45)),
            part("back", EntityKind::Cube, Vec3::new(0.0, 0.7, -0.22), Vec3::new(0.45, 0.45, 0.03)),
            part("legs", EntityKind::Cube, Vec3::new(0.0, 0.22, 0.0), Vec3::new(0.4, 0.44, 0.4)),
        ],
    },
    PropSpec {
        name: "crate",
        dimensions: Vec3::new(0.6, 0.6, 0.6),
        mass: 12.0,
        color: WOOD,
        parts: &[part("body", EntityKind::Cube, Vec3::new(0.0, 0.3, 0.0), Vec3::new(0.6, 0.6, 0.6))],
    },
    PropSpec {
        name: "ball",
        dimensions: Vec3::new(0.22, 0.22, 0.22),
        mass: 0.43,
        color: RUBBER,
        parts: &[part("shell", EntityKind::Sphere, Vec3::new(0.0, 0.11, 0.0), Vec3::new(0.22, 0.22, 0.22))],
    },
    PropSpec {
        name: "lamp",
        dimensions: Vec3::new(0.4, 1.6, 0.4),
        mass: 4.5,
        color: STEEL,
        parts: &[
            part("base", EntityKind::Cylinder, Vec3::new(0.0, 0.02, 0.0), Vec3::new(0.3, 0.04, 0.3)),
            part("pole", EntityKind::Cylinder, Vec3::new(0.0, 0.8, 0.0), Vec3::new(0.03, 1.5, 0.03)),
            part("shade", EntityKind::Cone, Vec3::new(0.0, 1.5, 0.0), Vec3::new(0.4, 0.25, 0.4)),
            part("bulb", EntityKind::Light, Vec3::new(0.0, 1.45, 0.0), Vec3::new(0.06, 0.06, 0.06)),
        ],
    },
    PropSpec {
        name: "bookshelf",
        dimensions: Vec3::new(0.8, 1.8, 0.3),
        mass: 35.0,
        color: WOOD,
        parts: &[
            part("frame", EntityKind::Cube, Vec3::new(0.0, 0.9, 0.0), Vec3::new(0.8, 1.8, 0.3)),
            part("shelf_1", EntityKind::Plane, Vec3::new(0.0, 0.45, 0.0), Vec3::new(0.76, 0.02, 0.28)),
            part("shelf_2", EntityKind::Plane, Vec3::new(0.0, 0.9, 0.0), Vec3::new(0.76, 0.02, 0.28)),
            part("shelf_3", EntityKind::Plane, Vec3::new(0.0, 1.35, 0.0), Vec3::new(0.76, 0.02, 0.28)),
        ],
    },
];

/// Look up a prop by name.
pub fn lookup(name: &str) -> Option<&'static PropSpec> {
    PROPS.iter().find(|p| p.name == name)
}

/// Names of every known prop.
pub fn names() -> impl Iterator<Item = &'static str> {
    PROPS.iter().map(|p| p.name)
}

impl PropSpec {
    /// Build the root entity followed by its parts, placed at `position`.
    pub fn instantiate(&self, id: &str, position: Vec3) -> Vec<Entity> {
        let mut root = Entity::new(id, EntityKind::Prop)
            .at(position)
            .with_color(self.color)
            .with_tag(format!("prop:{}", self.name));
        root.name = self.name.to_string();
        root.transform.scale = self.dimensions;
        root.physics = Some(Physics {
            mass: self.mass,
            is_static: false,
        });

        let mut out = Vec::with_capacity(self.parts.len() + 1);
        out.push(root);
        for p in self.parts {
            let mut child = Entity::new(format!("{}/{}", id, p.name), p.kind)
                .with_color(self.color)
                .with_tag(format!("prop:{}", self.name));
            child.name = p.name.to_string();
            child.transform = Transform {
                position: position + p.offset,
                scale: p.size,
                rotation: Vec3::zero(),
            };
            child.parent = Some(id.to_string());
            out.push(child);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_and_unknown() {
        assert!(lookup("table").is_some());
        assert!(lookup("spaceship").is_none());
    }

    #[test]
    fn names_are_unique() {
        let mut all: Vec<_> = names().collect();
        let before = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), before);
    }

    #[test]
    fn instantiate_builds_root_and_parts() {
        let spec = lookup("table").unwrap();
        let entities = spec.instantiate("t1", Vec3::new(1.0, 0.0, 2.0));

        assert_eq!(entities.len(), 1 + spec.parts.len());
        let root = &entities[0];
        assert_eq!(root.id, "t1");
        assert_eq!(root.kind, EntityKind::Prop);
        assert_eq!(root.physics.unwrap().mass, 30.0);

        let top = entities.iter().find(|e| e.id == "t1/top").unwrap();
        assert_eq!(top.parent.as_deref(), Some("t1"));
        assert!((top.transform.position.y - 0.725).abs() < 1e-6);
        assert!((top.transform.position.x - 1.0).abs() < 1e-6);
    }
}
