//! Kalman models for detection-box tracking.
//!
//! The state vector is `[x y s r xvel yvel svel]` where `(x, y)` is the box
//! center, `s` its area and `r` its aspect ratio. Observations are
//! `[x y s r]`. Aspect ratio is modeled as constant; center and area carry
//! constant-velocity dynamics.

pub mod box_motion_model;
pub mod box_observation_model;

use nalgebra::{OMatrix, OVector, RealField, U4, U7};

use adskalman::StateAndCovariance;

/// Convert a detection box to the observation vector `[x y s r]`.
pub fn bbox_to_observation<R: RealField + Copy>(
    x_min: R,
    y_min: R,
    x_max: R,
    y_max: R,
) -> OVector<R, U4> {
    let two: R = nalgebra::convert(2.0);
    let eps: R = nalgebra::convert(1e-6);
    let w = x_max - x_min;
    let h = (y_max - y_min).max(eps);
    let x = x_min + w / two;
    let y = y_min + h / two;
    let s = w * h;
    let r = w / h;
    OVector::<R, U4>::new(x, y, s, r)
}

/// Recover `[x_min y_min x_max y_max]` from the filter state.
pub fn state_to_bbox<R: RealField + Copy>(state: &OVector<R, U7>) -> [R; 4] {
    let two: R = nalgebra::convert(2.0);
    let eps: R = nalgebra::convert(1e-6);
    let s = state[2].max(eps);
    let r = state[3].max(eps);
    let w = (s * r).sqrt();
    let h = s / w.max(eps);
    [
        state[0] - w / two,
        state[1] - h / two,
        state[0] + w / two,
        state[1] + h / two,
    ]
}

/// Initial estimate for a newly spawned hypothesis.
///
/// Position and shape start at the observation with moderate uncertainty;
/// the unobserved velocities start at zero with a large one.
pub fn initial_box_estimate<R: RealField + Copy>(
    observation: &OVector<R, U4>,
) -> StateAndCovariance<R, U7> {
    let zero: R = nalgebra::convert(0.0);
    let pos_var: R = nalgebra::convert(10.0);
    let vel_var: R = nalgebra::convert(10_000.0);

    let state = OVector::<R, U7>::from_iterator(
        [
            observation[0],
            observation[1],
            observation[2],
            observation[3],
            zero,
            zero,
            zero,
        ]
        .into_iter(),
    );

    let mut covariance = OMatrix::<R, U7, U7>::identity() * pos_var;
    for i in 4..7 {
        covariance[(i, i)] = vel_var;
    }
    StateAndCovariance::new(state, covariance)
}
