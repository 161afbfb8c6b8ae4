//! Integration test: analytic gradients against central finite differences.

use bnscope::losses::mse_loss_mean;
use bnscope::nn::{BatchNorm, Linear, Module, ReLU};
use bnscope::runtime::session::{Feed, Session};
use bnscope::tensor::{GraphContext, Tensor};

use ndarray::{array, ArrayD};
use std::cell::RefCell;
use std::rc::Rc;

// The forward pass runs in f32, so the step can't be much smaller than this.
const EPSILON: f32 = 1e-2;
const ABS_TOLERANCE: f32 = 5e-3;
const REL_TOLERANCE: f32 = 5e-2;

fn assert_grads_are_close(name: &str, analytic: &ArrayD<f32>, numeric: &ArrayD<f32>) {
    assert_eq!(analytic.shape(), numeric.shape(), "gradient shapes of '{name}' differ");

    for (i, (a, n)) in analytic.iter().zip(numeric.iter()).enumerate() {
        let diff = (a - n).abs();
        let larger = a.abs().max(n.abs());
        assert!(
            diff <= ABS_TOLERANCE + REL_TOLERANCE * larger,
            "gradient of '{name}'[{i}] does not match: analytic {a:.6}, numeric {n:.6}"
        );
    }
}

fn loss_value(session: &mut Session, loss: &Tensor, feed: &Feed) -> f32 {
    session.run(&[loss], feed).unwrap()[0].sum()
}

/// Perturbs every element of `name` by +-EPSILON and differentiates the loss.
fn numeric_grad(session: &mut Session, loss: &Tensor, feed: &Feed, name: &str) -> ArrayD<f32> {
    let original = session.parameter(name).unwrap();
    let mut grad = ArrayD::zeros(original.raw_dim());

    for i in 0..original.len() {
        let mut plus = original.clone();
        plus.as_slice_mut().unwrap()[i] += EPSILON;
        session.set_parameter(name, plus).unwrap();
        let loss_plus = loss_value(session, loss, feed);

        let mut minus = original.clone();
        minus.as_slice_mut().unwrap()[i] -= EPSILON;
        session.set_parameter(name, minus).unwrap();
        let loss_minus = loss_value(session, loss, feed);

        grad.as_slice_mut().unwrap()[i] = (loss_plus - loss_minus) / (2.0 * EPSILON);
    }
    session.set_parameter(name, original).unwrap();
    grad
}

fn check_all(session: &mut Session, loss: &Tensor, params: &[Tensor], feed: &Feed) {
    let analytic = session.gradients(loss, params, feed).unwrap();
    assert_eq!(analytic.len(), params.len());

    for (param, analytic) in params.iter().zip(&analytic) {
        let name = param.name().unwrap();
        let numeric = numeric_grad(session, loss, feed, &name);
        assert_grads_are_close(&name, analytic, &numeric);
    }
}

fn feed(x: ArrayD<f32>) -> Feed {
    Feed::from([("x".to_string(), x)])
}

#[test]
fn test_batchnorm_composite_grad() {
    let ctx = Rc::new(RefCell::new(GraphContext::new()));
    let x = Tensor::new_input(&ctx, "x");
    let fc = Linear::new(&ctx, 2, 3, "fc");
    let bn = BatchNorm::new(&ctx, 3, "bn");
    let target = Tensor::new_literal(
        &ctx,
        array![
            [0.5, -1.0, 0.2],
            [1.5, 0.3, -0.7],
            [-0.4, 0.8, 1.1],
            [0.0, -0.6, 0.9],
            [-1.2, 1.4, -0.3],
            [0.7, 0.1, -1.5]
        ]
        .into_dyn(),
        "target",
    );
    // The mean of a normalized batch is constant, so compare against a target
    // to make every gradient non-trivial.
    let loss = mse_loss_mean(&bn.forward(&fc.forward(&x)), &target);

    let mut session = Session::new(&ctx);
    session.initialize(3).unwrap();
    session
        .set_parameter("fc.weights", array![[0.5, -1.0, 0.3], [1.2, 0.4, -0.8]].into_dyn())
        .unwrap();
    session.set_parameter("bn.gamma", array![[1.5, 0.7, -1.0]].into_dyn()).unwrap();
    session.set_parameter("bn.beta", array![[0.2, -0.3, 0.1]].into_dyn()).unwrap();

    let x = array![[-1.0, 0.5], [0.3, 2.0], [1.7, -0.8], [-0.6, -1.4], [2.2, 0.9], [0.1, 1.3]];
    let params = [fc.weights.clone(), fc.bias.clone(), bn.gamma.clone(), bn.beta.clone()];
    check_all(&mut session, &loss, &params, &feed(x.into_dyn()));
}

#[test]
fn test_batchnorm_bias_has_no_effect() {
    let ctx = Rc::new(RefCell::new(GraphContext::new()));
    let x = Tensor::new_input(&ctx, "x");
    let fc = Linear::new(&ctx, 1, 2, "fc");
    let bn = BatchNorm::new(&ctx, 2, "bn");
    let target = Tensor::new_literal(&ctx, array![[1.0, 0.0], [0.0, 1.0], [2.0, -1.0]].into_dyn(), "t");
    let loss = mse_loss_mean(&bn.forward(&fc.forward(&x)), &target);

    let mut session = Session::new(&ctx);
    session.initialize(0).unwrap();
    let grads = session
        .gradients(&loss, &[fc.bias.clone()], &feed(array![[-1.0], [0.5], [2.0]].into_dyn()))
        .unwrap();
    // Batch normalization subtracts the batch mean, which cancels any bias.
    for g in grads[0].iter() {
        assert!(g.abs() < 1e-3, "bias gradient {g} should vanish");
    }
}

#[test]
fn test_mlp_grad() {
    let ctx = Rc::new(RefCell::new(GraphContext::new()));
    let x = Tensor::new_input(&ctx, "x");
    let y = Tensor::new_input(&ctx, "y");
    let hidden = Linear::new(&ctx, 1, 4, "mlp.hidden");
    let output = Linear::new(&ctx, 4, 1, "mlp.output");
    let prediction = output.forward(&ReLU.forward(&hidden.forward(&x)));
    let loss = mse_loss_mean(&prediction, &y);

    let mut session = Session::new(&ctx);
    session.initialize(11).unwrap();
    // Every pre-activation stays at least 0.15 away from the ReLU kink.
    session
        .set_parameter("mlp.hidden.weights", array![[1.0, -0.5, 0.8, -1.2]].into_dyn())
        .unwrap();
    session
        .set_parameter("mlp.output.weights", array![[0.6], [-0.9], [1.1], [0.4]].into_dyn())
        .unwrap();

    let mut feed = feed(array![[-1.5], [-0.5], [0.5], [1.5]].into_dyn());
    feed.insert("y".to_string(), array![[2.0], [-1.0], [0.5], [3.0]].into_dyn());

    let params = [
        hidden.weights.clone(),
        hidden.bias.clone(),
        output.weights.clone(),
        output.bias.clone(),
    ];
    check_all(&mut session, &loss, &params, &feed);
}
