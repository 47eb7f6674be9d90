use itertools::izip;
use multiversion::multiversion;

#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+avx", "arm+neon"))]
pub(crate) fn vector_dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());

    let mut result = 0.;
    for (val1, val2) in a.iter().zip(b) {
        result += *val1 * *val2;
    }
    result
}

#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+avx", "arm+neon"))]
pub(crate) fn axpy(x: &[f64], y: &mut [f64], a: f64) {
    let n = x.len();
    assert!(y.len() == n);

    izip!(x, y).for_each(|(x, y)| {
        *y += a * x;
    });
}

/// `y = a * y + b * x`
#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+avx", "arm+neon"))]
pub(crate) fn axpby(x: &[f64], y: &mut [f64], a: f64, b: f64) {
    let n = x.len();
    assert!(y.len() == n);

    izip!(x, y).for_each(|(x, y)| {
        *y = a * *y + b * x;
    });
}

#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+avx", "arm+neon"))]
pub(crate) fn scale(x: &mut [f64], a: f64) {
    x.iter_mut().for_each(|x| *x *= a);
}
