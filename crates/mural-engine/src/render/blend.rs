use crate::paint::Color;

// ── blend ─────────────────────────────────────────────────────────────────

/// Multiplier applied to the source or destination color before addition.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    DstAlpha,
    OneMinusSrcAlpha,
    OneMinusDstAlpha,
}

impl BlendFactor {
    #[inline]
    fn weight(self, src: Color, dst: Color) -> f32 {
        match self {
            BlendFactor::Zero => 0.0,
            BlendFactor::One => 1.0,
            BlendFactor::SrcAlpha => src.a,
            BlendFactor::DstAlpha => dst.a,
            BlendFactor::OneMinusSrcAlpha => 1.0 - src.a,
            BlendFactor::OneMinusDstAlpha => 1.0 - dst.a,
        }
    }
}

/// Porter-Duff composition modes over premultiplied colors.
///
/// Every mode is `out = src * src_factor + dst * dst_factor`, the same equation
/// a GPU blend state with an `Add` operation computes.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum BlendMode {
    /// Destination becomes fully transparent.
    Clear,
    /// Source replaces destination.
    Copy,
    #[default]
    SourceOver,
    DestinationOver,
    SourceIn,
    DestinationOut,
    /// Additive.
    Lighter,
}

impl BlendMode {
    /// `(src_factor, dst_factor)` for this mode.
    pub const fn factors(self) -> (BlendFactor, BlendFactor) {
        use BlendFactor::*;
        match self {
            BlendMode::Clear => (Zero, Zero),
            BlendMode::Copy => (One, Zero),
            BlendMode::SourceOver => (One, OneMinusSrcAlpha),
            BlendMode::DestinationOver => (OneMinusDstAlpha, One),
            BlendMode::SourceIn => (DstAlpha, Zero),
            BlendMode::DestinationOut => (Zero, OneMinusSrcAlpha),
            BlendMode::Lighter => (One, One),
        }
    }

    /// Applies the blend equation to one premultiplied texel.
    pub fn apply(self, src: Color, dst: Color) -> Color {
        let (sf, df) = self.factors();
        let ws = sf.weight(src, dst);
        let wd = df.weight(src, dst);
        Color::from_premul(
            src.r * ws + dst.r * wd,
            src.g * ws + dst.g * wd,
            src.b * ws + dst.b * wd,
            src.a * ws + dst.a * wd,
        )
        .clamped()
    }
}

// ── fill rule ─────────────────────────────────────────────────────────────

/// Coverage rule for a draw-triangles call.
///
/// `FillAll` shades every triangle in order. `NonZero` and `EvenOdd` treat the
/// whole call as one path: each covered texel is shaded once, if its signed
/// winding count satisfies the rule.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum FillRule {
    #[default]
    FillAll,
    NonZero,
    EvenOdd,
}

impl FillRule {
    #[inline]
    pub fn covers(self, winding: i32) -> bool {
        match self {
            FillRule::FillAll => true,
            FillRule::NonZero => winding != 0,
            FillRule::EvenOdd => winding % 2 != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color::from_premul(1.0, 0.0, 0.0, 1.0);
    const HALF_BLUE: Color = Color::from_premul(0.0, 0.0, 0.5, 0.5);

    #[test]
    fn source_over_half_blue_on_red() {
        let out = BlendMode::SourceOver.apply(HALF_BLUE, RED);
        assert_eq!(out.to_rgba8(), [128, 0, 128, 255]);
    }

    #[test]
    fn clear_and_copy() {
        assert_eq!(BlendMode::Clear.apply(HALF_BLUE, RED), Color::TRANSPARENT);
        assert_eq!(BlendMode::Copy.apply(HALF_BLUE, RED), HALF_BLUE);
    }

    #[test]
    fn destination_over_keeps_opaque_destination() {
        assert_eq!(BlendMode::DestinationOver.apply(HALF_BLUE, RED), RED);
    }

    #[test]
    fn fill_rules() {
        assert!(FillRule::NonZero.covers(-2));
        assert!(!FillRule::EvenOdd.covers(-2));
        assert!(FillRule::EvenOdd.covers(-1));
        assert!(!FillRule::NonZero.covers(0));
    }
}
