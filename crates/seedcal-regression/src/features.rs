use serde::{Deserialize, Serialize};

/// Largest expansion (third order): 3 linear + 6 quadratic + 10 cubic terms.
pub const MAX_FEATURES: usize = 19;

/// Degree of the monomial expansion of a 3-channel color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolynomialOrder {
    First,
    Second,
    Third,
}

impl PolynomialOrder {
    pub fn feature_count(self) -> usize {
        match self {
            PolynomialOrder::First => 3,
            PolynomialOrder::Second => 9,
            PolynomialOrder::Third => MAX_FEATURES,
        }
    }

    /// Expand `c` into all monomials up to this order.
    ///
    /// Only the first [`feature_count`](Self::feature_count) entries are meaningful.
    pub fn expand(self, c: [f64; 3]) -> [f64; MAX_FEATURES] {
        let [c0, c1, c2] = c;
        let mut f = [0.0; MAX_FEATURES];
        f[0] = c0;
        f[1] = c1;
        f[2] = c2;
        if self == PolynomialOrder::First {
            return f;
        }

        f[3] = c0 * c0;
        f[4] = c0 * c1;
        f[5] = c0 * c2;
        f[6] = c1 * c1;
        f[7] = c1 * c2;
        f[8] = c2 * c2;
        if self == PolynomialOrder::Second {
            return f;
        }

        f[9] = c0 * c0 * c0;
        f[10] = c0 * c0 * c1;
        f[11] = c0 * c0 * c2;
        f[12] = c0 * c1 * c1;
        f[13] = c0 * c1 * c2;
        f[14] = c0 * c2 * c2;
        f[15] = c1 * c1 * c1;
        f[16] = c1 * c1 * c2;
        f[17] = c1 * c2 * c2;
        f[18] = c2 * c2 * c2;
        f
    }
}
