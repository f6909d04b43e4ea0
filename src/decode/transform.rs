//! Node transforms, classified into the cheapest equivalent path.

use glam::{Affine3A, Mat3, Vec3, Vec3A};

/// Tolerance for treating matrix entries as 0 or 1.
pub const TRANSFORM_EPSILON: f32 = 1e-6;

/// A node transform reduced to the cheapest path that reproduces it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeTransform {
    Identity,
    /// Upper 3x3 is identity.
    Translation(Vec3),
    /// Upper 3x3 is diagonal.
    TranslationScale { scale: Vec3, translation: Vec3 },
    General(Affine3A),
}

impl NodeTransform {
    /// Classify a column-major 3x4 transform. `None` means identity.
    pub fn classify(transform: Option<&[f32; 12]>) -> Self {
        match transform {
            None => Self::Identity,
            Some(m) => Self::from_affine(affine_from_array(m)),
        }
    }

    pub fn from_affine(affine: Affine3A) -> Self {
        let m = Mat3::from(affine.matrix3);
        let t = Vec3::from(affine.translation);
        let off_diagonal = [
            m.x_axis.y, m.x_axis.z, m.y_axis.x, m.y_axis.z, m.z_axis.x, m.z_axis.y,
        ];
        let diagonal = Vec3::new(m.x_axis.x, m.y_axis.y, m.z_axis.z);

        if off_diagonal.iter().any(|v| v.abs() > TRANSFORM_EPSILON)
            || diagonal.abs().min_element() <= TRANSFORM_EPSILON
        {
            return Self::General(affine);
        }
        if diagonal.abs_diff_eq(Vec3::ONE, TRANSFORM_EPSILON) {
            if t.abs_diff_eq(Vec3::ZERO, TRANSFORM_EPSILON) {
                return Self::Identity;
            }
            return Self::Translation(t);
        }
        Self::TranslationScale {
            scale: diagonal,
            translation: t,
        }
    }

    pub fn to_affine(&self) -> Affine3A {
        match *self {
            Self::Identity => Affine3A::IDENTITY,
            Self::Translation(t) => Affine3A::from_translation(t),
            Self::TranslationScale { scale, translation } => Affine3A {
                matrix3: glam::Mat3A::from_diagonal(scale),
                translation: Vec3A::from(translation),
            },
            Self::General(a) => a,
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Whether normals pass through unchanged.
    pub fn preserves_normals(&self) -> bool {
        match self {
            Self::Identity | Self::Translation(_) => true,
            Self::TranslationScale { scale, .. } => {
                (scale.x - scale.y).abs() <= TRANSFORM_EPSILON
                    && (scale.x - scale.z).abs() <= TRANSFORM_EPSILON
                    && scale.x > 0.0
            }
            Self::General(_) => false,
        }
    }

    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        match *self {
            Self::Identity => p,
            Self::Translation(t) => p + t,
            Self::TranslationScale { scale, translation } => p * scale + translation,
            Self::General(a) => a.transform_point3(p),
        }
    }

    /// Transform and renormalize a normal. Translation never applies.
    ///
    /// The diagonal path uses the inverse-transpose (`n / scale`); the
    /// general path multiplies by the upper 3x3.
    pub fn transform_normal(&self, n: Vec3) -> Vec3 {
        match *self {
            Self::Identity | Self::Translation(_) => n,
            Self::TranslationScale { scale, .. } => {
                if self.preserves_normals() {
                    n
                } else {
                    (n / scale).normalize_or_zero()
                }
            }
            Self::General(a) => a.transform_vector3(n).normalize_or_zero(),
        }
    }
}

/// Build an affine from the column-major 3x4 on-disk layout.
pub fn affine_from_array(m: &[f32; 12]) -> Affine3A {
    Affine3A::from_cols_array(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;
    use rstest::rstest;

    fn array(a: Affine3A) -> [f32; 12] {
        a.to_cols_array()
    }

    #[test]
    fn test_classify_paths() {
        assert_eq!(NodeTransform::classify(None), NodeTransform::Identity);
        assert_eq!(
            NodeTransform::classify(Some(&array(Affine3A::IDENTITY))),
            NodeTransform::Identity
        );
        assert_eq!(
            NodeTransform::classify(Some(&array(Affine3A::from_translation(Vec3::X)))),
            NodeTransform::Translation(Vec3::X)
        );
        assert!(matches!(
            NodeTransform::classify(Some(&array(Affine3A::from_scale(Vec3::new(1.0, 2.0, 3.0))))),
            NodeTransform::TranslationScale { .. }
        ));
        assert!(matches!(
            NodeTransform::classify(Some(&array(Affine3A::from_rotation_z(0.3)))),
            NodeTransform::General(_)
        ));
    }

    #[test]
    fn test_uniform_scale_keeps_normal() {
        let t = NodeTransform::from_affine(Affine3A::from_scale_rotation_translation(
            Vec3::splat(2.0),
            Quat::IDENTITY,
            Vec3::new(0.0, 5.0, 0.0),
        ));
        assert_eq!(t.transform_point(Vec3::X), Vec3::new(2.0, 5.0, 0.0));
        assert_eq!(t.transform_normal(Vec3::X), Vec3::X);
    }

    #[test]
    fn test_non_uniform_scale_inverse_transpose() {
        let t = NodeTransform::from_affine(Affine3A::from_scale(Vec3::new(2.0, 1.0, 1.0)));
        let n = t.transform_normal(Vec3::new(1.0, 1.0, 0.0).normalize());
        let expected = Vec3::new(0.5, 1.0, 0.0).normalize();
        assert!(n.abs_diff_eq(expected, 1e-6));
    }

    #[rstest]
    #[case::translation(Affine3A::from_translation(Vec3::new(3.0, -2.0, 1.0)))]
    #[case::uniform_scale(Affine3A::from_scale(Vec3::splat(4.0)))]
    #[case::scale_translation(Affine3A::from_scale_rotation_translation(
        Vec3::new(2.0, 3.0, 0.5),
        Quat::IDENTITY,
        Vec3::new(1.0, 1.0, 1.0)
    ))]
    #[case::zero_translation(Affine3A::from_translation(Vec3::ZERO))]
    fn test_fast_paths_match_general(#[case] affine: Affine3A) {
        let fast = NodeTransform::from_affine(affine);
        let general = NodeTransform::General(affine);
        for p in [Vec3::ZERO, Vec3::ONE, Vec3::new(-7.5, 0.25, 100.0)] {
            assert!(fast
                .transform_point(p)
                .abs_diff_eq(general.transform_point(p), 1e-5));
        }
        // positive diagonal: inverse-transpose and forward agree on axes
        for n in [Vec3::X, Vec3::Y, Vec3::Z] {
            assert!(fast
                .transform_normal(n)
                .abs_diff_eq(general.transform_normal(n), 1e-5));
        }
    }

    #[test]
    fn test_to_affine_roundtrips_paths() {
        let affine = Affine3A::from_scale_rotation_translation(
            Vec3::new(2.0, 2.0, 3.0),
            Quat::IDENTITY,
            Vec3::new(1.0, 0.0, -1.0),
        );
        let t = NodeTransform::from_affine(affine);
        assert!(t.to_affine().abs_diff_eq(affine, 1e-6));
    }
}
