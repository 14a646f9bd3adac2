//! # GF(2^8) Arithmetic
//!
//! The finite field underneath the secret-sharing engine. Elements are bytes;
//! the field is GF(2)[x] reduced by the irreducible polynomial
//! `x^8 + x^4 + x^3 + x + 1` (0x11B), the same one AES uses.
//!
//! - Addition and subtraction are XOR (characteristic 2).
//! - Multiplication is carry-less "Russian peasant" multiplication with a
//!   reduction whenever the shifted operand overflows bit 8. It always runs
//!   eight rounds and selects with masks instead of branches.
//! - Inversion uses the extended Euclidean algorithm over the polynomial
//!   representation. Zero has no inverse and yields [`DomainError`].
//!
//! Inversion branches on its input, so it is not constant-time.

use thiserror::Error;

use crate::config::GF256_POLYNOMIAL;

/// The low byte of the reduction polynomial (x^8 folded back in).
const REDUCTION: u8 = (GF256_POLYNOMIAL & 0xFF) as u8;

/// An operation was asked to divide by, or invert, the zero element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{operation} is undefined for zero in GF(256)")]
pub struct DomainError {
    /// The field operation that was attempted.
    pub operation: &'static str,
}

/// Add two elements. Addition is XOR.
#[inline]
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Subtract two elements. Same as addition in characteristic 2.
#[inline]
pub fn sub(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Multiply two elements with carry-less shift-and-add.
pub fn mul(a: u8, b: u8) -> u8 {
    let mut a = a;
    let mut b = b;
    let mut product = 0u8;

    for _ in 0..8 {
        // Add `a` into the product when the low bit of `b` is set.
        product ^= a & 0u8.wrapping_sub(b & 1);
        // Multiply `a` by x, reducing if bit 7 falls off the top.
        let overflow = 0u8.wrapping_sub(a >> 7);
        a = (a << 1) ^ (REDUCTION & overflow);
        b >>= 1;
    }

    product
}

/// Degree of a non-zero polynomial stored in the low bits of a `u16`.
#[inline]
fn degree(p: u16) -> u32 {
    15 - p.leading_zeros()
}

/// Multiplicative inverse via the extended Euclidean algorithm.
///
/// Maintains the invariant `s_i * a == r_i (mod P)` while reducing the
/// remainders; when the remainder reaches the gcd (always 1 for non-zero `a`
/// since `P` is irreducible) the matching `s` is the inverse.
pub fn inverse(a: u8) -> Result<u8, DomainError> {
    if a == 0 {
        return Err(DomainError {
            operation: "inverse",
        });
    }

    let (mut r0, mut r1) = (GF256_POLYNOMIAL, a as u16);
    let (mut s0, mut s1) = (0u16, 1u16);

    while r1 != 0 {
        // r0 <- r0 mod r1, carrying the Bezout coefficient along.
        while r0 != 0 && degree(r0) >= degree(r1) {
            let shift = degree(r0) - degree(r1);
            r0 ^= r1 << shift;
            s0 ^= s1 << shift;
        }
        std::mem::swap(&mut r0, &mut r1);
        std::mem::swap(&mut s0, &mut s1);
    }

    debug_assert_eq!(r0, 1, "0x11B is irreducible, gcd must be 1");
    Ok(s0 as u8)
}

/// Divide `a` by `b`.
pub fn div(a: u8, b: u8) -> Result<u8, DomainError> {
    if b == 0 {
        return Err(DomainError {
            operation: "division",
        });
    }
    Ok(mul(a, inverse(b)?))
}

/// Evaluate a polynomial at `x` using Horner's method.
///
/// `coefficients[0]` is the constant term.
pub fn eval_polynomial(coefficients: &[u8], x: u8) -> u8 {
    coefficients
        .iter()
        .rev()
        .fold(0u8, |acc, &coeff| add(mul(acc, x), coeff))
}

/// Lagrange interpolation of the points `(xs[j], ys[j])` evaluated at zero.
///
/// `f(0) = sum_j y_j * prod_{k != j} x_k / (x_k - x_j)`. Callers guarantee
/// distinct `xs`; a repeated coordinate surfaces as a [`DomainError`] from the
/// zero denominator rather than a silently wrong byte.
pub fn interpolate_at_zero(xs: &[u8], ys: &[u8]) -> Result<u8, DomainError> {
    debug_assert_eq!(xs.len(), ys.len());
    let mut secret = 0u8;

    for (j, (&xj, &yj)) in xs.iter().zip(ys).enumerate() {
        let mut numerator = 1u8;
        let mut denominator = 1u8;
        for (k, &xk) in xs.iter().enumerate() {
            if k == j {
                continue;
            }
            numerator = mul(numerator, xk);
            denominator = mul(denominator, sub(xk, xj));
        }
        let basis = div(numerator, denominator)?;
        secret = add(secret, mul(yj, basis));
    }

    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_xor() {
        assert_eq!(add(0xFF, 0xFF), 0);
        assert_eq!(add(0xAB, 0x00), 0xAB);
        assert_eq!(sub(0x53, 0xCA), add(0x53, 0xCA));
    }

    #[test]
    fn mul_matches_fips_197_examples() {
        // FIPS-197 section 4.2: {57} * {83} = {c1}, {57} * {13} = {fe}.
        assert_eq!(mul(0x57, 0x83), 0xC1);
        assert_eq!(mul(0x57, 0x13), 0xFE);
    }

    #[test]
    fn mul_identity_and_zero() {
        for i in 0..=255u8 {
            assert_eq!(mul(i, 1), i);
            assert_eq!(mul(1, i), i);
            assert_eq!(mul(i, 0), 0);
            assert_eq!(mul(0, i), 0);
        }
    }

    #[test]
    fn mul_is_commutative() {
        for a in (0..=255u8).step_by(7) {
            for b in 0..=255u8 {
                assert_eq!(mul(a, b), mul(b, a));
            }
        }
    }

    #[test]
    fn known_inverse() {
        // The AES S-box is built on this pair.
        assert_eq!(inverse(0x53).unwrap(), 0xCA);
        assert_eq!(inverse(0x01).unwrap(), 0x01);
    }

    #[test]
    fn every_nonzero_element_has_an_inverse() {
        for a in 1..=255u8 {
            let inv = inverse(a).unwrap();
            assert_eq!(mul(a, inv), 1, "inverse of {a:#04x} is wrong");
        }
    }

    #[test]
    fn zero_has_no_inverse() {
        assert_eq!(
            inverse(0),
            Err(DomainError {
                operation: "inverse"
            })
        );
    }

    #[test]
    fn div_by_zero_is_a_domain_error() {
        assert!(div(0x42, 0).is_err());
        assert_eq!(div(0, 0x42).unwrap(), 0);
    }

    #[test]
    fn mul_div_roundtrip() {
        for a in 0..=255u8 {
            for b in 1..=255u8 {
                assert_eq!(div(mul(a, b), b).unwrap(), a);
            }
        }
    }

    #[test]
    fn polynomial_eval_constant() {
        assert_eq!(eval_polynomial(&[42], 1), 42);
        assert_eq!(eval_polynomial(&[42], 200), 42);
        assert_eq!(eval_polynomial(&[], 5), 0);
    }

    #[test]
    fn polynomial_eval_linear() {
        // f(x) = 7 + 3x, f(2) = 7 ^ mul(3, 2) = 7 ^ 6 = 1
        assert_eq!(eval_polynomial(&[7, 3], 2), 1);
    }

    #[test]
    fn interpolation_recovers_constant_term() {
        let coefficients = [0x2A, 0x11, 0xC3];
        let xs = [1u8, 2, 3];
        let ys: Vec<u8> = xs
            .iter()
            .map(|&x| eval_polynomial(&coefficients, x))
            .collect();
        assert_eq!(interpolate_at_zero(&xs, &ys).unwrap(), 0x2A);
    }

    #[test]
    fn interpolation_rejects_repeated_coordinates() {
        assert!(interpolate_at_zero(&[4, 4], &[1, 2]).is_err());
    }
}
