//! Closed-chain ankle decoupling.
//!
//! A 2-DOF ankle (roll, pitch) is driven by two cranks through rods. The
//! actuator-space quantities are crank angles; the joint-space quantities are
//! the (roll, pitch) of the foot. The inverse map (joint to actuator) is closed
//! form per crank. The forward map is solved with Newton iterations on the
//! inverse map, seeded with the previous solution of the same side so that
//! consecutive ticks stay on the same branch.

use nalgebra::{Matrix2, Matrix3, RowVector2, Vector2, Vector3};
use serde::Deserialize;
use thiserror::Error;

const MAX_ITERATIONS: usize = 50;
const TOLERANCE: f64 = 1e-10;
const MAX_STEP: f64 = 0.5;
const SINGULAR_DET: f64 = 1e-9;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecoupleError {
    #[error("{side:?} ankle: roll {roll:.4} pitch {pitch:.4} is out of linkage reach")]
    Unreachable { side: Side, roll: f64, pitch: f64 },
    #[error("{side:?} ankle: linkage Jacobian is singular")]
    Singular { side: Side },
    #[error("{side:?} ankle: forward solve did not converge (residual {residual:.3e})")]
    NoConvergence { side: Side, residual: f64 },
}

/// Leg side; selects the mirrored linkage and its own solution cache.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

/// Position, velocity and effort of a joint pair, in either space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PairState {
    pub q: Vector2<f64>,
    pub v: Vector2<f64>,
    pub tau: Vector2<f64>,
}

impl PairState {
    pub fn new(q: Vector2<f64>, v: Vector2<f64>, tau: Vector2<f64>) -> Self {
        Self { q, v, tau }
    }
}

#[derive(Clone, Copy, Debug)]
struct Crank {
    /// Crank pivot in the shank frame.
    pivot: Vector3<f64>,
    rod: f64,
    /// Rod attachment on the foot, foot frame.
    foot: Vector3<f64>,
}

#[derive(Clone, Copy, Debug)]
pub struct LinkageGeometry {
    crank_len: f64,
    cranks: [Crank; 2],
}

impl LinkageGeometry {
    /// Ankle linkage: an upper crank on the inner side and a lower crank on the
    /// outer side, both reaching 5 cm behind the joint; the right leg mirrors y.
    pub fn ankle(side: Side) -> Self {
        let w = 0.025;
        let y = match side {
            Side::Left => w,
            Side::Right => -w,
        };
        let crank = |y: f64, height: f64| Crank {
            pivot: Vector3::new(0.0, y, height),
            rod: height,
            foot: Vector3::new(0.05, y, 0.0),
        };
        Self {
            crank_len: 0.05,
            cranks: [crank(y, 0.22), crank(-y, 0.14)],
        }
    }

    fn crank_end(&self, crank: &Crank, theta: f64) -> Vector3<f64> {
        crank.pivot + self.crank_len * Vector3::new(theta.cos(), 0.0, theta.sin())
    }

    fn crank_tangent(&self, theta: f64) -> Vector3<f64> {
        self.crank_len * Vector3::new(-theta.sin(), 0.0, theta.cos())
    }
}

fn rot_x(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c)
}

fn rot_y(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c)
}

fn d_rot_x(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(0.0, 0.0, 0.0, 0.0, -s, -c, 0.0, c, -s)
}

fn d_rot_y(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(-s, 0.0, c, 0.0, 0.0, 0.0, -c, 0.0, -s)
}

/// Crank angles and the actuator-from-joint Jacobian at one joint pose.
struct Solution {
    theta: Vector2<f64>,
    jac: Matrix2<f64>,
}

#[derive(Clone, Debug)]
pub struct Decoupler {
    geometry: [LinkageGeometry; 2],
    last_solution: [Vector2<f64>; 2],
}

impl Default for Decoupler {
    fn default() -> Self {
        Self::new(
            LinkageGeometry::ankle(Side::Left),
            LinkageGeometry::ankle(Side::Right),
        )
    }
}

impl Decoupler {
    pub fn new(left: LinkageGeometry, right: LinkageGeometry) -> Self {
        Self {
            geometry: [left, right],
            last_solution: [Vector2::zeros(); 2],
        }
    }

    /// Last joint-space solution found for `side`.
    pub fn last_solution(&self, side: Side) -> Vector2<f64> {
        self.last_solution[side.index()]
    }

    fn solve(&self, side: Side, q: &Vector2<f64>) -> Result<Solution, DecoupleError> {
        let geo = &self.geometry[side.index()];
        let (roll, pitch) = (q[0], q[1]);
        let rot = rot_y(pitch) * rot_x(roll);
        let d_roll = rot_y(pitch) * d_rot_x(roll);
        let d_pitch = d_rot_y(pitch) * rot_x(roll);

        let mut theta = Vector2::zeros();
        let mut jac = Matrix2::zeros();
        for (i, crank) in geo.cranks.iter().enumerate() {
            let c = rot * crank.foot;
            let d = c - crank.pivot;
            let k = (d.norm_squared() + geo.crank_len.powi(2) - crank.rod.powi(2))
                / (2.0 * geo.crank_len);
            let rho = d.x.hypot(d.z);
            if rho < f64::EPSILON || (k / rho).abs() > 1.0 {
                return Err(DecoupleError::Unreachable { side, roll, pitch });
            }
            let t = d.z.atan2(d.x) + (k / rho).acos();
            theta[i] = t;

            let r = c - geo.crank_end(crank, t);
            let denom = r.dot(&geo.crank_tangent(t));
            if denom.abs() < SINGULAR_DET {
                return Err(DecoupleError::Singular { side });
            }
            let row = RowVector2::new(r.dot(&(d_roll * crank.foot)), r.dot(&(d_pitch * crank.foot)));
            jac.set_row(i, &(row / denom));
        }
        Ok(Solution { theta, jac })
    }

    /// Joint space to actuator space. Stateless.
    pub fn inverse(&self, side: Side, joint: &PairState) -> Result<PairState, DecoupleError> {
        let sol = self.solve(side, &joint.q)?;
        let jt_inv = sol
            .jac
            .transpose()
            .try_inverse()
            .ok_or(DecoupleError::Singular { side })?;
        Ok(PairState {
            q: sol.theta,
            v: sol.jac * joint.v,
            tau: jt_inv * joint.tau,
        })
    }

    /// Actuator space to joint space, seeded from and updating the cache of `side`.
    pub fn forward(&mut self, side: Side, actuator: &PairState) -> Result<PairState, DecoupleError> {
        let mut q = self.last_solution[side.index()];
        let mut residual = f64::INFINITY;
        for _ in 0..MAX_ITERATIONS {
            let sol = self.solve(side, &q)?;
            let err = sol.theta - actuator.q;
            residual = err.norm();
            if residual < TOLERANCE {
                let j_inv = sol.jac.try_inverse().ok_or(DecoupleError::Singular { side })?;
                self.last_solution[side.index()] = q;
                return Ok(PairState {
                    q,
                    v: j_inv * actuator.v,
                    tau: sol.jac.transpose() * actuator.tau,
                });
            }
            let j_inv = sol.jac.try_inverse().ok_or(DecoupleError::Singular { side })?;
            let mut step = j_inv * err;
            let norm = step.norm();
            if norm > MAX_STEP {
                step *= MAX_STEP / norm;
            }
            q -= step;
        }
        Err(DecoupleError::NoConvergence { side, residual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &Vector2<f64>, b: &Vector2<f64>, tol: f64) {
        assert!((a - b).norm() < tol, "{a:?} != {b:?}");
    }

    #[test]
    fn test_neutral_pose_is_zero_crank_angle() {
        let dec = Decoupler::default();
        for side in [Side::Left, Side::Right] {
            let act = dec.inverse(side, &PairState::default()).unwrap();
            assert_close(&act.q, &Vector2::zeros(), 1e-12);
        }
    }

    #[test]
    fn test_jacobian_at_neutral() {
        let dec = Decoupler::default();
        let sol = dec.solve(Side::Left, &Vector2::zeros()).unwrap();
        let expected = Matrix2::new(0.5, -1.0, -0.5, -1.0);
        assert!((sol.jac - expected).norm() < 1e-9, "{:?}", sol.jac);
        // mirrored: roll column flips sign
        let sol = dec.solve(Side::Right, &Vector2::zeros()).unwrap();
        let expected = Matrix2::new(-0.5, -1.0, 0.5, -1.0);
        assert!((sol.jac - expected).norm() < 1e-9, "{:?}", sol.jac);
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        let dec = Decoupler::default();
        let q = Vector2::new(0.12, -0.3);
        let h = 1e-6;
        let sol = dec.solve(Side::Left, &q).unwrap();
        for col in 0..2 {
            let mut dq = Vector2::zeros();
            dq[col] = h;
            let plus = dec.solve(Side::Left, &(q + dq)).unwrap().theta;
            let minus = dec.solve(Side::Left, &(q - dq)).unwrap().theta;
            let fd = (plus - minus) / (2.0 * h);
            assert_close(&sol.jac.column(col).into_owned(), &fd, 1e-6);
        }
    }

    #[test]
    fn test_round_trip_over_joint_range() {
        for side in [Side::Left, Side::Right] {
            let mut dec = Decoupler::default();
            for i in 0..=10 {
                for j in 0..=10 {
                    let roll = -0.25 + 0.05 * i as f64;
                    let pitch = -0.5 + 0.1 * j as f64;
                    let joint = PairState::new(
                        Vector2::new(roll, pitch),
                        Vector2::new(0.3, -1.2),
                        Vector2::new(4.0, -9.0),
                    );
                    let act = dec.inverse(side, &joint).unwrap();
                    let back = dec.forward(side, &act).unwrap();
                    assert_close(&back.q, &joint.q, 1e-8);
                    assert_close(&back.v, &joint.v, 1e-6);
                    assert_close(&back.tau, &joint.tau, 1e-6);

                    let again = dec.inverse(side, &back).unwrap();
                    assert_close(&again.q, &act.q, 1e-8);
                    assert_close(&again.tau, &act.tau, 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_cache_is_per_side_and_kept_on_failure() {
        let mut dec = Decoupler::default();
        let target = Vector2::new(0.1, 0.2);
        let act = dec
            .inverse(Side::Left, &PairState::new(target, Vector2::zeros(), Vector2::zeros()))
            .unwrap();
        dec.forward(Side::Left, &act).unwrap();
        assert_close(&dec.last_solution(Side::Left), &target, 1e-8);
        assert_close(&dec.last_solution(Side::Right), &Vector2::zeros(), 1e-15);

        let impossible = PairState::new(Vector2::new(50.0, -50.0), Vector2::zeros(), Vector2::zeros());
        assert!(dec.forward(Side::Left, &impossible).is_err());
        assert_close(&dec.last_solution(Side::Left), &target, 1e-8);
    }

    #[test]
    fn test_power_is_preserved() {
        // tau_q . v_q == tau_theta . v_theta
        let dec = Decoupler::default();
        let joint = PairState::new(
            Vector2::new(-0.1, 0.35),
            Vector2::new(0.7, 0.2),
            Vector2::new(-3.0, 12.0),
        );
        let act = dec.inverse(Side::Right, &joint).unwrap();
        let p_joint = joint.tau.dot(&joint.v);
        let p_act = act.tau.dot(&act.v);
        assert!((p_joint - p_act).abs() < 1e-9);
    }
}
