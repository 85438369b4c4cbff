use nalgebra::{Unit, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::AxisError;

/// Tolerance used when interpreting a direction vector as a canonical axis.
const AXIS_EPSILON: f64 = 1e-8;

// ---------------------------------------------------------------------------
// Dof
// ---------------------------------------------------------------------------

/// One of the six canonical degree-of-freedom channels of a joint.
///
/// The first three translate along the joint's local X/Y/Z axes, the last
/// three rotate about them. The discriminant is the channel index used by
/// every six-wide per-channel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Dof {
    X = 0,
    Y = 1,
    Z = 2,
    Ex = 3,
    Ey = 4,
    Ez = 5,
}

impl Dof {
    /// All channels in index order.
    pub const ALL: [Self; 6] = [Self::X, Self::Y, Self::Z, Self::Ex, Self::Ey, Self::Ez];

    /// Translation channels in index order.
    pub const TRANSLATION: [Self; 3] = [Self::X, Self::Y, Self::Z];

    /// Rotation channels in index order.
    pub const ROTATION: [Self; 3] = [Self::Ex, Self::Ey, Self::Ez];

    /// Index into six-wide per-channel buffers.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::X),
            1 => Some(Self::Y),
            2 => Some(Self::Z),
            3 => Some(Self::Ex),
            4 => Some(Self::Ey),
            5 => Some(Self::Ez),
            _ => None,
        }
    }

    pub const fn is_translation(self) -> bool {
        (self as u8) < 3
    }

    pub const fn is_rotation(self) -> bool {
        !self.is_translation()
    }

    /// Index of the local axis (0 = X, 1 = Y, 2 = Z) this channel acts on.
    pub const fn axis_index(self) -> usize {
        self.index() % 3
    }

    /// The local unit axis this channel translates along or rotates about.
    pub fn axis(self) -> Unit<Vector3<f64>> {
        match self.axis_index() {
            0 => Vector3::x_axis(),
            1 => Vector3::y_axis(),
            _ => Vector3::z_axis(),
        }
    }

    /// Interpret a direction vector as a rotation channel.
    ///
    /// The dominant component selects `Ex`, `Ey` or `Ez`; the sign is
    /// ignored. A zero-length vector or a tie between components is
    /// rejected rather than resolved arbitrarily.
    pub fn from_axis(axis: [f64; 3]) -> Result<Self, AxisError> {
        Ok(Self::ROTATION[dominant_axis(axis)?])
    }

    /// Interpret a direction vector as a translation channel.
    ///
    /// Same rules as [`Dof::from_axis`].
    pub fn translation_from_axis(axis: [f64; 3]) -> Result<Self, AxisError> {
        Ok(Self::TRANSLATION[dominant_axis(axis)?])
    }
}

impl std::fmt::Display for Dof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::X => "X",
            Self::Y => "Y",
            Self::Z => "Z",
            Self::Ex => "EX",
            Self::Ey => "EY",
            Self::Ez => "EZ",
        };
        f.write_str(name)
    }
}

fn dominant_axis(axis: [f64; 3]) -> Result<usize, AxisError> {
    let abs = axis.map(f64::abs);
    let max = abs.iter().copied().fold(0.0_f64, f64::max);
    if max < AXIS_EPSILON {
        return Err(AxisError::ZeroLength);
    }

    let ties = abs.iter().filter(|v| (max - **v).abs() < AXIS_EPSILON).count();
    if ties > 1 {
        return Err(AxisError::Ambiguous { axis });
    }

    Ok(abs
        .iter()
        .position(|v| (max - *v).abs() < AXIS_EPSILON)
        .unwrap_or(2))
}

// ---------------------------------------------------------------------------
// DofSet
// ---------------------------------------------------------------------------

/// Unordered set of DOF channels, stored as a six-bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DofSet(u8);

impl DofSet {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(0b11_1111);
    pub const TRANSLATION: Self = Self(0b00_0111);
    pub const ROTATION: Self = Self(0b11_1000);

    pub fn from_slice(channels: &[Dof]) -> Self {
        channels.iter().fold(Self::EMPTY, |set, &dof| set.with(dof))
    }

    #[must_use]
    pub const fn with(self, dof: Dof) -> Self {
        Self(self.0 | (1 << dof as u8))
    }

    pub fn insert(&mut self, dof: Dof) {
        *self = self.with(dof);
    }

    pub const fn contains(self, dof: Dof) -> bool {
        self.0 & (1 << dof as u8) != 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Active channels in index order.
    pub fn iter(self) -> impl Iterator<Item = Dof> {
        Dof::ALL.into_iter().filter(move |dof| self.contains(*dof))
    }

    /// One boolean per channel, in index order.
    pub fn flags(self) -> [bool; 6] {
        Dof::ALL.map(|dof| self.contains(dof))
    }
}

impl FromIterator<Dof> for DofSet {
    fn from_iter<I: IntoIterator<Item = Dof>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dof_indices_match_buffer_layout() {
        for (i, dof) in Dof::ALL.iter().enumerate() {
            assert_eq!(dof.index(), i);
            assert_eq!(Dof::from_index(i), Some(*dof));
        }
        assert_eq!(Dof::from_index(6), None);
    }

    #[test]
    fn dof_kind_split() {
        assert!(Dof::ALL.iter().take(3).all(|d| d.is_translation()));
        assert!(Dof::ALL.iter().skip(3).all(|d| d.is_rotation()));
        assert_eq!(Dof::Ey.axis_index(), 1);
        assert_eq!(Dof::Z.axis().into_inner(), Vector3::z());
    }

    #[test]
    fn from_axis_picks_dominant_component() {
        assert_eq!(Dof::from_axis([0.0, 0.0, 1.0]).unwrap(), Dof::Ez);
        assert_eq!(Dof::from_axis([-0.9, 0.1, 0.2]).unwrap(), Dof::Ex);
        assert_eq!(Dof::from_axis([0.0, -2.0, 0.5]).unwrap(), Dof::Ey);
        assert_eq!(Dof::translation_from_axis([0.0, 1.0, 0.0]).unwrap(), Dof::Y);
    }

    #[test]
    fn from_axis_rejects_zero_length() {
        assert_eq!(Dof::from_axis([0.0, 0.0, 0.0]), Err(AxisError::ZeroLength));
        assert_eq!(Dof::from_axis([1e-9, 0.0, -1e-9]), Err(AxisError::ZeroLength));
    }

    #[test]
    fn from_axis_rejects_ambiguous() {
        assert!(matches!(
            Dof::from_axis([1.0, -1.0, 0.0]),
            Err(AxisError::Ambiguous { .. })
        ));
        assert!(matches!(
            Dof::translation_from_axis([0.5, 0.5, 0.5]),
            Err(AxisError::Ambiguous { .. })
        ));
    }

    #[test]
    fn dof_set_membership() {
        let set = DofSet::from_slice(&[Dof::X, Dof::Z, Dof::Ex]);
        assert!(set.contains(Dof::X));
        assert!(!set.contains(Dof::Y));
        assert_eq!(set.len(), 3);
        assert_eq!(set.flags(), [true, false, true, true, false, false]);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Dof::X, Dof::Z, Dof::Ex]);
        assert_eq!(set.intersection(DofSet::ROTATION).len(), 1);
    }

    #[test]
    fn dof_set_constants() {
        assert_eq!(DofSet::ALL.len(), 6);
        assert!(DofSet::EMPTY.is_empty());
        assert_eq!(
            DofSet::TRANSLATION.iter().collect::<Vec<_>>(),
            Dof::TRANSLATION.to_vec()
        );
        assert_eq!(Dof::ROTATION.into_iter().collect::<DofSet>(), DofSet::ROTATION);
    }
}
