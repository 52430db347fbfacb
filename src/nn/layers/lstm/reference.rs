//! Default CPU gate kernel.
//!
//! Per time step, with gate blocks in IFOG order:
//! - `z_t = x_t W + h_{t-1} R + b`
//! - `i_t = σ(z_i)`, `f_t = σ(z_f)`, `o_t = σ(z_o)`, `g_t = act(z_g)`
//! - `c_t = f_t * c_{t-1} + i_t * g_t`
//! - `h_t = o_t * act(c_t)`
//!
//! where `σ` is the configured gate activation and `act` the layer activation.

use super::{
    kernel::{BackwardRequest, ForwardOutput, ForwardRequest, ForwardTrace, GateKernel, Truncation},
    params::{ParamGradients, NUM_GATES},
    state::LastStepState,
};
use crate::{
    error::{LstmError, Result},
    nn::{Activation, Gradients},
    tensor::{Scalar, Tensor},
};

/// Registry name of [`ReferenceKernel`].
pub const REFERENCE_BACKEND: &str = "reference";

/// Straightforward time-step loop; supports every activation pair.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceKernel;

impl ReferenceKernel {
    pub fn new() -> Self {
        Self
    }
}

impl<T: Scalar> GateKernel<T> for ReferenceKernel {
    fn name(&self) -> &str {
        REFERENCE_BACKEND
    }

    fn supports(&self, _gate_activation: Activation, _activation: Activation, peephole: bool) -> bool {
        !peephole
    }

    fn forward(&self, request: ForwardRequest<'_, T>) -> Result<ForwardOutput<T>> {
        let params = request.params;
        let (batch, time, n_in) = request.input.dims3()?;
        let n_out = params.n_out();
        let width = NUM_GATES * n_out;

        if n_in != params.n_in() {
            return Err(LstmError::ShapeMismatch {
                expected: vec![batch, time, params.n_in()],
                actual: request.input.shape().to_vec(),
            });
        }
        if time == 0 {
            return Err(LstmError::InvalidInput("input sequence has no time steps".to_string()));
        }

        let initial = match request.initial {
            Some(state) => {
                state.activation.expect_shape(&[batch, n_out])?;
                state.cell.expect_shape(&[batch, n_out])?;
                state.clone()
            }
            None => LastStepState::zeros(batch, n_out),
        };

        let gate_fn = request.gate_activation;
        let act_fn = request.activation;
        let w = params.input_weights().as_slice();
        let r = params.recurrent_weights().as_slice();
        let bias = params.bias().as_slice();

        let mut h_prev = initial.activation.to_vec();
        let mut c_prev = initial.cell.to_vec();
        let mut output = vec![T::zero(); batch * time * n_out];

        let capacity = if request.retain_trace { time } else { 0 };
        let mut gate_pre = Vec::with_capacity(capacity);
        let mut gate_act = Vec::with_capacity(capacity);
        let mut cells = Vec::with_capacity(capacity);
        let mut cell_acts = Vec::with_capacity(capacity);
        let mut hiddens = Vec::with_capacity(capacity);

        for t in 0..time {
            let x_t = request.input.time_step(t)?;

            let mut z = vec![T::zero(); batch * width];
            for row in z.chunks_mut(width) {
                row.copy_from_slice(bias);
            }
            matmul_acc(x_t.as_slice(), w, &mut z, batch, n_in, width);
            matmul_acc(&h_prev, r, &mut z, batch, n_out, width);

            let mut a = vec![T::zero(); batch * width];
            let mut c = vec![T::zero(); batch * n_out];
            let mut c_act = vec![T::zero(); batch * n_out];
            let mut h = vec![T::zero(); batch * n_out];

            for b in 0..batch {
                let row = b * width;
                for j in 0..n_out {
                    let i_g = gate_fn.apply(z[row + j]);
                    let f_g = gate_fn.apply(z[row + n_out + j]);
                    let o_g = gate_fn.apply(z[row + 2 * n_out + j]);
                    let g_g = act_fn.apply(z[row + 3 * n_out + j]);
                    a[row + j] = i_g;
                    a[row + n_out + j] = f_g;
                    a[row + 2 * n_out + j] = o_g;
                    a[row + 3 * n_out + j] = g_g;

                    let idx = b * n_out + j;
                    c[idx] = f_g * c_prev[idx] + i_g * g_g;
                    c_act[idx] = act_fn.apply(c[idx]);
                    h[idx] = o_g * c_act[idx];
                    output[(b * time + t) * n_out + j] = h[idx];
                }
            }

            if request.retain_trace {
                gate_pre.push(Tensor::from_vec(z, &[batch, width])?);
                gate_act.push(Tensor::from_vec(a, &[batch, width])?);
                cells.push(Tensor::from_vec(c.clone(), &[batch, n_out])?);
                cell_acts.push(Tensor::from_vec(c_act, &[batch, n_out])?);
                hiddens.push(Tensor::from_vec(h.clone(), &[batch, n_out])?);
            }

            h_prev = h;
            c_prev = c;
        }

        let output = Tensor::from_vec(output, &[batch, time, n_out])?;
        let last = LastStepState::new(
            Tensor::from_vec(h_prev, &[batch, n_out])?,
            Tensor::from_vec(c_prev, &[batch, n_out])?,
        );

        let trace = if request.retain_trace {
            Some(ForwardTrace {
                params: params.clone(),
                input: request.input.clone(),
                initial,
                gate_activation: gate_fn,
                activation: act_fn,
                gate_pre,
                gate_act,
                cell: cells,
                cell_act: cell_acts,
                hidden: hiddens,
            })
        } else {
            None
        };

        Ok(ForwardOutput { output, last, trace })
    }

    fn backward(&self, request: BackwardRequest<'_, T>) -> Result<Gradients<T, ParamGradients<T>>> {
        let trace = request.trace;
        let (batch, time, n_in) = trace.input.dims3()?;
        let n_out = trace.params.n_out();
        let width = NUM_GATES * n_out;

        if trace.time_steps() != time {
            return Err(LstmError::InvalidInput(format!(
                "forward trace covers {} time steps but its input has {}",
                trace.time_steps(),
                time
            )));
        }
        request.epsilon.expect_shape(&[batch, time, n_out])?;

        let end = match request.truncation {
            Truncation::Full => 0,
            Truncation::Steps(steps) => time.saturating_sub(steps),
        };

        let gate_fn = trace.gate_activation;
        let act_fn = trace.activation;
        let w = trace.params.input_weights().as_slice();
        let r = trace.params.recurrent_weights().as_slice();
        let eps = request.epsilon.as_slice();

        let mut d_w = vec![T::zero(); n_in * width];
        let mut d_r = vec![T::zero(); n_out * width];
        let mut d_b = vec![T::zero(); width];
        let mut eps_in = vec![T::zero(); batch * time * n_in];

        // gradients arriving at step t from step t + 1
        let mut dh_next = vec![T::zero(); batch * n_out];
        let mut dc_next = vec![T::zero(); batch * n_out];

        for t in (end..time).rev() {
            let (h_prev, c_prev) = if t == 0 {
                (trace.initial.activation.as_slice(), trace.initial.cell.as_slice())
            } else {
                (trace.hidden[t - 1].as_slice(), trace.cell[t - 1].as_slice())
            };
            let z = trace.gate_pre[t].as_slice();
            let a = trace.gate_act[t].as_slice();
            let c = trace.cell[t].as_slice();
            let c_act = trace.cell_act[t].as_slice();

            let mut dz = vec![T::zero(); batch * width];
            for b in 0..batch {
                let row = b * width;
                for j in 0..n_out {
                    let idx = b * n_out + j;
                    let dh = eps[(b * time + t) * n_out + j] + dh_next[idx];

                    let i_g = a[row + j];
                    let f_g = a[row + n_out + j];
                    let o_g = a[row + 2 * n_out + j];
                    let g_g = a[row + 3 * n_out + j];

                    let dc = dh * o_g * act_fn.derivative(c[idx]) + dc_next[idx];

                    dz[row + j] = dc * g_g * gate_fn.derivative(z[row + j]);
                    dz[row + n_out + j] = dc * c_prev[idx] * gate_fn.derivative(z[row + n_out + j]);
                    dz[row + 2 * n_out + j] = dh * c_act[idx] * gate_fn.derivative(z[row + 2 * n_out + j]);
                    dz[row + 3 * n_out + j] = dc * i_g * act_fn.derivative(z[row + 3 * n_out + j]);

                    dc_next[idx] = dc * f_g;
                }
            }

            let x_t = trace.input.time_step(t)?;
            matmul_at_b_acc(x_t.as_slice(), &dz, &mut d_w, batch, n_in, width);
            matmul_at_b_acc(h_prev, &dz, &mut d_r, batch, n_out, width);
            for row in dz.chunks(width) {
                for (acc, &v) in d_b.iter_mut().zip(row) {
                    *acc = *acc + v;
                }
            }

            let dx = matmul_a_bt(&dz, w, batch, width, n_in);
            for b in 0..batch {
                let dst = (b * time + t) * n_in;
                eps_in[dst..dst + n_in].copy_from_slice(&dx[b * n_in..(b + 1) * n_in]);
            }
            dh_next = matmul_a_bt(&dz, r, batch, width, n_out);
        }

        Ok(Gradients {
            params: ParamGradients {
                input_weights: Tensor::from_vec(d_w, &[n_in, width])?,
                recurrent_weights: Tensor::from_vec(d_r, &[n_out, width])?,
                bias: Tensor::from_vec(d_b, &[width])?,
            },
            epsilon: Tensor::from_vec(eps_in, &[batch, time, n_in])?,
        })
    }
}

/// `out[m, n] += a[m, k] · b[k, n]`
fn matmul_acc<T: Scalar>(a: &[T], b: &[T], out: &mut [T], m: usize, k: usize, n: usize) {
    for i in 0..m {
        let out_row = &mut out[i * n..(i + 1) * n];
        for p in 0..k {
            let a_ip = a[i * k + p];
            if a_ip == T::zero() {
                continue;
            }
            let b_row = &b[p * n..(p + 1) * n];
            for (o, &b_pj) in out_row.iter_mut().zip(b_row) {
                *o = *o + a_ip * b_pj;
            }
        }
    }
}

/// `out[k, n] += a[m, k]ᵀ · b[m, n]`
fn matmul_at_b_acc<T: Scalar>(a: &[T], b: &[T], out: &mut [T], m: usize, k: usize, n: usize) {
    for i in 0..m {
        let b_row = &b[i * n..(i + 1) * n];
        for p in 0..k {
            let a_ip = a[i * k + p];
            let out_row = &mut out[p * n..(p + 1) * n];
            for (o, &b_ij) in out_row.iter_mut().zip(b_row) {
                *o = *o + a_ip * b_ij;
            }
        }
    }
}

/// `a[m, n] · b[k, n]ᵀ`, returned as `[m, k]`.
fn matmul_a_bt<T: Scalar>(a: &[T], b: &[T], m: usize, n: usize, k: usize) -> Vec<T> {
    let mut out = vec![T::zero(); m * k];
    for i in 0..m {
        let a_row = &a[i * n..(i + 1) * n];
        for p in 0..k {
            let b_row = &b[p * n..(p + 1) * n];
            out[i * k + p] = a_row
                .iter()
                .zip(b_row)
                .fold(T::zero(), |acc, (&x, &y)| acc + x * y);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::lstm::GateParameters;
    use approx::assert_relative_eq;

    fn params(n_in: usize, n_out: usize) -> GateParameters<f64> {
        let width = NUM_GATES * n_out;
        let w = (0..n_in * width).map(|v| ((v % 7) as f64 - 3.0) * 0.05).collect();
        let r = (0..n_out * width).map(|v| ((v % 5) as f64 - 2.0) * 0.07).collect();
        let b = (0..width).map(|v| (v % 3) as f64 * 0.1).collect();
        GateParameters::new(
            Tensor::from_vec(w, &[n_in, width]).unwrap(),
            Tensor::from_vec(r, &[n_out, width]).unwrap(),
            Tensor::from_vec(b, &[width]).unwrap(),
        )
        .unwrap()
    }

    fn request<'a>(
        params: &'a GateParameters<f64>,
        input: &'a Tensor<f64>,
        retain_trace: bool,
    ) -> ForwardRequest<'a, f64> {
        ForwardRequest {
            params,
            input,
            initial: None,
            gate_activation: Activation::Sigmoid,
            activation: Activation::Tanh,
            training: true,
            retain_trace,
        }
    }

    #[test]
    fn test_matmul_helpers() {
        // [1 2; 3 4] · [5 6; 7 8] = [19 22; 43 50]
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut out = [0.0; 4];
        matmul_acc(&a, &b, &mut out, 2, 2, 2);
        assert_eq!(out, [19.0, 22.0, 43.0, 50.0]);

        // aᵀ · b = [1 3; 2 4] · [5 6; 7 8] = [26 30; 38 44]
        let mut out = [0.0; 4];
        matmul_at_b_acc(&a, &b, &mut out, 2, 2, 2);
        assert_eq!(out, [26.0, 30.0, 38.0, 44.0]);

        // a · bᵀ = [1 2; 3 4] · [5 7; 6 8] = [17 23; 39 53]
        assert_eq!(matmul_a_bt(&a, &b, 2, 2, 2), vec![17.0, 23.0, 39.0, 53.0]);
    }

    #[test]
    fn test_single_step_by_hand() {
        // one unit, one input, zero weights except the bias
        let bias = Tensor::from_vec(vec![0.0, 0.0, 0.0, 0.5], &[4]).unwrap();
        let params = GateParameters::new(
            Tensor::zeros(&[1, 4]),
            Tensor::zeros(&[1, 4]),
            bias,
        )
        .unwrap();
        let input = Tensor::from_vec(vec![3.0], &[1, 1, 1]).unwrap();
        let out = ReferenceKernel.forward(request(&params, &input, false)).unwrap();

        // i = f = o = σ(0) = 0.5, g = tanh(0.5), c = 0.5 * g, h = 0.5 * tanh(c)
        let g = 0.5f64.tanh();
        let c = 0.5 * g;
        let h = 0.5 * c.tanh();
        assert_relative_eq!(out.output.as_slice()[0], h, epsilon = 1e-12);
        assert_relative_eq!(out.last.cell.as_slice()[0], c, epsilon = 1e-12);
        assert!(out.trace.is_none());
    }

    #[test]
    fn test_trace_only_when_requested() {
        let params = params(3, 2);
        let input = Tensor::filled(&[2, 4, 3], 0.3);
        let with = ReferenceKernel.forward(request(&params, &input, true)).unwrap();
        let without = ReferenceKernel.forward(request(&params, &input, false)).unwrap();
        assert_eq!(with.output, without.output);
        let trace = with.trace.unwrap();
        assert_eq!(trace.time_steps(), 4);
        assert_eq!(trace.gate_pre[0].shape(), &[2, 8]);
        assert!(without.trace.is_none());
    }

    #[test]
    fn test_last_state_matches_final_output_step() {
        let params = params(2, 3);
        let input = Tensor::filled(&[2, 5, 2], -0.4);
        let out = ReferenceKernel.forward(request(&params, &input, false)).unwrap();
        let final_step = out.output.time_step(4).unwrap();
        assert_eq!(final_step, out.last.activation);
    }

    #[test]
    fn test_input_size_mismatch() {
        let params = params(3, 2);
        let input = Tensor::filled(&[1, 2, 4], 0.1);
        let err = ReferenceKernel.forward(request(&params, &input, false)).unwrap_err();
        assert!(matches!(err, LstmError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_initial_state_shape_checked() {
        let params = params(3, 2);
        let input = Tensor::filled(&[2, 2, 3], 0.1);
        let bad_state = LastStepState::zeros(1, 2);
        let mut req = request(&params, &input, false);
        req.initial = Some(&bad_state);
        assert!(matches!(
            ReferenceKernel.forward(req),
            Err(LstmError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_epsilon_shape_checked() {
        let params = params(3, 2);
        let input = Tensor::filled(&[1, 3, 3], 0.1);
        let trace = ReferenceKernel
            .forward(request(&params, &input, true))
            .unwrap()
            .trace
            .unwrap();
        let epsilon = Tensor::zeros(&[1, 2, 2]);
        let err = ReferenceKernel
            .backward(BackwardRequest {
                trace,
                epsilon: &epsilon,
                truncation: Truncation::Full,
            })
            .unwrap_err();
        assert!(matches!(err, LstmError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_rejects_peepholes() {
        let kernel = ReferenceKernel;
        assert!(GateKernel::<f32>::supports(&kernel, Activation::HardSigmoid, Activation::Softsign, false));
        assert!(!GateKernel::<f32>::supports(&kernel, Activation::Sigmoid, Activation::Tanh, true));
    }
}
