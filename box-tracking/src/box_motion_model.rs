use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, OMatrix, RealField, U7};

use adskalman::TransitionModelLinearNoControl;

/// Constant-velocity box motion model parameterized by `dt`.
///
/// Calling `calc_for_dt()` returns a motion model for a specific `dt`
/// (one frame in the tracker, so `dt = 1`).
///
/// The state vector is [x y s r xvel yvel svel].
#[derive(Debug, Clone)]
pub struct ConstantVelocityBoxModel<R: RealField>
where
    DefaultAllocator: Allocator<U7, U7>,
    DefaultAllocator: Allocator<U7>,
{
    motion_noise_scale: R,
}

impl<R: RealField + Copy> ConstantVelocityBoxModel<R>
where
    DefaultAllocator: Allocator<U7, U7>,
    DefaultAllocator: Allocator<U7>,
{
    pub fn new(motion_noise_scale: R) -> Self {
        Self { motion_noise_scale }
    }

    /// For a given `dt`, create a new instance of the motion model.
    pub fn calc_for_dt(&self, dt: R) -> BoxMotionModelFixedDt<R> {
        let vel_noise: R = nalgebra::convert(0.01);
        let area_vel_noise: R = nalgebra::convert(1e-4);

        // This is "A" in most Kalman filter descriptions: center and area
        // integrate their velocities, aspect ratio stays put.
        let mut transition_model = OMatrix::<R, U7, U7>::identity();
        transition_model[(0, 4)] = dt;
        transition_model[(1, 5)] = dt;
        transition_model[(2, 6)] = dt;
        let transition_model_transpose = transition_model.transpose();

        // This is "Q": unit noise on the observed components, damped noise
        // on the velocities and strongly damped on the area velocity.
        let mut transition_noise_covariance = OMatrix::<R, U7, U7>::identity();
        transition_noise_covariance[(4, 4)] = vel_noise;
        transition_noise_covariance[(5, 5)] = vel_noise;
        transition_noise_covariance[(6, 6)] = area_vel_noise;
        let transition_noise_covariance = transition_noise_covariance * self.motion_noise_scale;

        BoxMotionModelFixedDt {
            transition_model,
            transition_model_transpose,
            transition_noise_covariance,
        }
    }
}

/// Constant-velocity box motion model for fixed dt.
///
/// The state vector is [x y s r xvel yvel svel].
#[derive(Debug, Clone)]
pub struct BoxMotionModelFixedDt<R: RealField>
where
    DefaultAllocator: Allocator<U7, U7>,
    DefaultAllocator: Allocator<U7>,
{
    pub transition_model: OMatrix<R, U7, U7>,
    pub transition_model_transpose: OMatrix<R, U7, U7>,
    pub transition_noise_covariance: OMatrix<R, U7, U7>,
}

impl<R: RealField> TransitionModelLinearNoControl<R, U7> for BoxMotionModelFixedDt<R>
where
    DefaultAllocator: Allocator<U7, U7>,
    DefaultAllocator: Allocator<U7>,
{
    fn F(&self) -> &OMatrix<R, U7, U7> {
        &self.transition_model
    }
    fn FT(&self) -> &OMatrix<R, U7, U7> {
        &self.transition_model_transpose
    }
    fn Q(&self) -> &OMatrix<R, U7, U7> {
        &self.transition_noise_covariance
    }
}
