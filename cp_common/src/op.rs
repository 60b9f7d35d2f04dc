//! Operator-impl shorthand for single-field newtype wrappers.

/// Implements a std::ops trait for a tuple struct wrapping a single numeric field.
///
/// * `op!(binary T, Add, add)` implements `T + T -> T`.
/// * `op!(inplace T, SubAssign, sub_assign)` implements `T -= T`.
/// * `op!(unary T, Neg, neg)` implements `-T -> T`.
#[macro_export]
macro_rules! op {
    (binary $t:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $t {
            type Output = Self;

            fn $method(self, rhs: Self) -> Self::Output {
                Self(std::ops::$trait::$method(self.0, rhs.0))
            }
        }
    };
    (inplace $t:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $t {
            fn $method(&mut self, rhs: Self) {
                std::ops::$trait::$method(&mut self.0, rhs.0);
            }
        }
    };
    (unary $t:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $t {
            type Output = Self;

            fn $method(self) -> Self::Output {
                Self(std::ops::$trait::$method(self.0))
            }
        }
    };
}
