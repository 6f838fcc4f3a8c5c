//! Shared identifiers and enums for the expression subsystem.

/// Handle of a node in the expression arena.
///
/// Handles are only meaningful together with the [`ExprStore`](crate::ExprStore)
/// that issued them; a released handle may be recycled for a new node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub(crate) u32);

impl ExprId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of a decision variable, issued by the host driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

/// Index of an expression handler in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdlrId(pub(crate) usize);

/// Domain type of a decision variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Continuous,
    Integer,
    Binary,
}

impl VarType {
    pub fn is_integral(self) -> bool {
        matches!(self, VarType::Integer | VarType::Binary)
    }
}

/// Curvature of an expression over the current box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Curvature {
    #[default]
    Unknown,
    Convex,
    Concave,
    Linear,
}

impl Curvature {
    /// Whether this curvature implies `required`.
    pub fn implies(self, required: Curvature) -> bool {
        match required {
            Curvature::Unknown => true,
            Curvature::Linear => self == Curvature::Linear,
            Curvature::Convex => matches!(self, Curvature::Convex | Curvature::Linear),
            Curvature::Concave => matches!(self, Curvature::Concave | Curvature::Linear),
        }
    }

    pub fn negate(self) -> Curvature {
        match self {
            Curvature::Convex => Curvature::Concave,
            Curvature::Concave => Curvature::Convex,
            other => other,
        }
    }
}

/// Monotonicity of an expression in one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Monotonicity {
    #[default]
    Unknown,
    Increasing,
    Decreasing,
    Constant,
}

impl Monotonicity {
    pub fn negate(self) -> Monotonicity {
        match self {
            Monotonicity::Increasing => Monotonicity::Decreasing,
            Monotonicity::Decreasing => Monotonicity::Increasing,
            other => other,
        }
    }
}

/// Source of point values for evaluation, usually a relaxation solution.
pub trait SolPoint {
    fn value(&self, var: VarId) -> f64;
}

impl<F: Fn(VarId) -> f64> SolPoint for F {
    fn value(&self, var: VarId) -> f64 {
        self(var)
    }
}
