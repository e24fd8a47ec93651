use fenris_matfree::basis::{ElementBasis, EvalMode, LagrangePolynomials1d};
use fenris_matfree::nalgebra::{DMatrix, DVector};
use fenris_matfree::quadrature::gauss;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};

#[test]
fn lagrange_polynomials_are_nodal() {
    for order in 1..=4 {
        let polynomials = LagrangePolynomials1d::<f64>::equispaced(order);
        assert_eq!(polynomials.num_nodes(), order + 1);
        assert_scalar_eq!(polynomials.nodes()[0], -1.0);
        assert_scalar_eq!(polynomials.nodes()[order], 1.0);

        let mut values = vec![0.0; order + 1];
        for (i, &x_i) in polynomials.nodes().iter().enumerate() {
            polynomials.populate_values(&mut values, x_i);
            for (j, &value) in values.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_scalar_eq!(value, expected, comp = abs, tol = 1e-13);
            }
        }
    }
}

#[test]
fn lagrange_polynomials_partition_unity() {
    let polynomials = LagrangePolynomials1d::<f64>::equispaced(3);
    let mut values = vec![0.0; 4];
    let mut derivatives = vec![0.0; 4];
    for &x in &[-0.9, -0.3, 0.1, 0.77] {
        polynomials.populate_values(&mut values, x);
        polynomials.populate_derivatives(&mut derivatives, x);
        assert_scalar_eq!(values.iter().sum::<f64>(), 1.0, comp = abs, tol = 1e-13);
        assert_scalar_eq!(derivatives.iter().sum::<f64>(), 0.0, comp = abs, tol = 1e-12);
    }
}

#[test]
fn quadratic_lagrange_derivatives_match_closed_form() {
    // Nodes -1, 0, 1: phi_0 = x (x - 1) / 2, phi_1 = 1 - x^2, phi_2 = x (x + 1) / 2
    let polynomials = LagrangePolynomials1d::<f64>::equispaced(2);
    let x = 0.4;
    let mut derivatives = vec![0.0; 3];
    polynomials.populate_derivatives(&mut derivatives, x);
    assert_scalar_eq!(derivatives[0], x - 0.5, comp = abs, tol = 1e-14);
    assert_scalar_eq!(derivatives[1], -2.0 * x, comp = abs, tol = 1e-14);
    assert_scalar_eq!(derivatives[2], x + 0.5, comp = abs, tol = 1e-14);
}

#[test]
fn tensor_lagrange_reproduces_constants_and_linears() {
    for dim in 1..=3 {
        let rule = gauss::<f64>(dim, 3).unwrap();
        let basis = ElementBasis::tensor_lagrange(2, &rule);
        assert_eq!(basis.reference_dim(), dim);
        assert_eq!(basis.num_nodes(), 3usize.pow(dim as u32));
        assert_eq!(basis.num_points(), rule.num_points());
        assert_eq!(basis.num_components(EvalMode::Interp), 1);
        assert_eq!(basis.num_components(EvalMode::Grad), dim);

        // Nodal values of the linear function u(x) = x_0 + 2 x_{dim - 1}
        let polynomials = LagrangePolynomials1d::<f64>::equispaced(2);
        let n1d = polynomials.num_nodes();
        let u = DVector::from_fn(basis.num_nodes(), |node, _| {
            let first = polynomials.nodes()[node % n1d];
            let last = polynomials.nodes()[node / n1d.pow(dim as u32 - 1)];
            first + 2.0 * last
        });

        let mut values = DVector::zeros(basis.num_points());
        basis.apply(EvalMode::Interp, &u, &mut values);
        let mut gradients = DVector::zeros(dim * basis.num_points());
        basis.apply(EvalMode::Grad, &u, &mut gradients);

        for q in 0..rule.num_points() {
            let x = rule.point(q);
            assert_scalar_eq!(values[q], x[0] + 2.0 * x[dim - 1], comp = abs, tol = 1e-12);
            if dim == 1 {
                assert_scalar_eq!(gradients[q], 3.0, comp = abs, tol = 1e-12);
            } else {
                assert_scalar_eq!(gradients[dim * q], 1.0, comp = abs, tol = 1e-12);
                assert_scalar_eq!(gradients[dim * q + dim - 1], 2.0, comp = abs, tol = 1e-12);
            }
        }
    }
}

#[test]
fn apply_transpose_uses_transposed_matrix() {
    let rule = gauss::<f64>(2, 2).unwrap();
    let basis = ElementBasis::tensor_lagrange(1, &rule);
    let v = DVector::from_fn(2 * basis.num_points(), |i, _| i as f64 - 1.5);

    let mut output = DVector::zeros(basis.num_nodes());
    basis.apply_transpose(EvalMode::Grad, &v, &mut output);
    let expected = basis.grad().transpose() * &v;
    assert_matrix_eq!(output, expected, comp = abs, tol = 1e-14);
}

#[test]
#[should_panic]
fn from_matrices_rejects_inconsistent_gradient() {
    let _ = ElementBasis::from_matrices(2, DMatrix::<f64>::zeros(4, 3), DMatrix::zeros(4, 3));
}
