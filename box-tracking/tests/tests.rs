use approx::assert_relative_eq;
use nalgebra::ComplexField;

use adskalman::{CovarianceUpdateMethod, ObservationModel, TransitionModelLinearNoControl};

use box_tracking::box_motion_model::ConstantVelocityBoxModel;
use box_tracking::box_observation_model::BoxObservationModel;
use box_tracking::{bbox_to_observation, initial_box_estimate, state_to_bbox};

/// Predicting twice with `dt` moves the state as far as predicting once
/// with `2 * dt`.
#[test]
fn test_missing_frames_via_large_dt_box() {
    let model = ConstantVelocityBoxModel::new(1.0);

    let obs = bbox_to_observation(100.0, 100.0, 120.0, 140.0);
    let mut est0 = initial_box_estimate(&obs);
    // Give the hypothesis a velocity so prediction actually moves it.
    let mut state = est0.state().clone();
    state[4] = 3.0;
    state[5] = -2.0;
    est0 = adskalman::StateAndCovariance::new(state, est0.covariance().clone());

    let dt = 1.0;
    let mm1 = model.calc_for_dt(dt);
    let est1 = mm1.predict(&est0);
    let est2 = mm1.predict(&est1);

    let mm2 = model.calc_for_dt(2.0 * dt);
    let est2b = mm2.predict(&est0);

    assert_relative_eq!(est2.state(), est2b.state(), epsilon = 1e-9);
}

#[test]
fn test_aspect_ratio_is_static() {
    let model = ConstantVelocityBoxModel::new(1.0);
    let mm = model.calc_for_dt(1.0);

    let obs = bbox_to_observation(0.0, 0.0, 40.0, 20.0);
    let mut est = initial_box_estimate(&obs);
    let mut state = est.state().clone();
    state[4] = 5.0;
    state[6] = 12.0;
    est = adskalman::StateAndCovariance::new(state, est.covariance().clone());

    let predicted = mm.predict(&est);
    // Center and area move, aspect ratio does not.
    assert_relative_eq!(predicted.state()[0], obs[0] + 5.0, epsilon = 1e-9);
    assert_relative_eq!(predicted.state()[2], obs[2] + 12.0, epsilon = 1e-9);
    assert_relative_eq!(predicted.state()[3], obs[3], epsilon = 1e-9);
}

/// A measurement update moves the estimate strictly toward the observation.
#[test]
fn test_update_pulls_toward_observation() {
    let obs_model = BoxObservationModel::<f64>::new(1.0);

    let z0 = bbox_to_observation(0.0, 0.0, 20.0, 20.0);
    let prior = initial_box_estimate(&z0);

    let z1 = bbox_to_observation(8.0, 6.0, 28.0, 26.0);
    let posterior = obs_model
        .update(&prior, &z1, CovarianceUpdateMethod::JosephForm)
        .expect("kalman update");

    let x = posterior.state()[0];
    let y = posterior.state()[1];
    assert!(x > 10.0 && x <= 18.0, "x estimate {x} outside (prior, obs]");
    assert!(y > 10.0 && y <= 16.0, "y estimate {y} outside (prior, obs]");

    // Covariance shrinks on observed components.
    assert!(posterior.covariance()[(0, 0)] < prior.covariance()[(0, 0)]);
}

#[test]
fn test_state_to_bbox_guards_degenerate_area() {
    let obs = bbox_to_observation(0.0, 0.0, 10.0, 10.0);
    let mut est = initial_box_estimate(&obs);
    let mut state = est.state().clone();
    state[2] = -5.0; // degenerate area
    est = adskalman::StateAndCovariance::new(state, est.covariance().clone());
    let bbox = state_to_bbox(est.state());
    assert!(bbox.iter().all(|v| v.is_finite()));
    assert!(bbox[2] >= bbox[0]);
}
