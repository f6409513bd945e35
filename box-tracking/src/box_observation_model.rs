use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimMin, OMatrix, OVector, RealField, U4, U7};

/// Linear observation of `[x y s r]` from the 7-dim box state.
///
/// The shape components (area, aspect ratio) are observed with inflated
/// measurement noise relative to the center position.
#[derive(Debug, Clone)]
pub struct BoxObservationModel<R: RealField>
where
    DefaultAllocator: Allocator<U4, U7>,
    DefaultAllocator: Allocator<U7, U4>,
    DefaultAllocator: Allocator<U4, U4>,
{
    observation_matrix: OMatrix<R, U4, U7>,
    observation_matrix_transpose: OMatrix<R, U7, U4>,
    observation_noise_covariance: OMatrix<R, U4, U4>,
}

impl<R: RealField + Copy> BoxObservationModel<R>
where
    DefaultAllocator: Allocator<U4, U7>,
    DefaultAllocator: Allocator<U7, U4>,
    DefaultAllocator: Allocator<U4, U4>,
{
    pub fn new(observation_noise_pixels: f64) -> Self {
        let one: R = nalgebra::convert(1.0);
        let shape_noise_factor: R = nalgebra::convert(10.0);

        let mut observation_matrix = OMatrix::<R, U4, U7>::zeros();
        for i in 0..4 {
            observation_matrix[(i, i)] = one;
        }
        let observation_matrix_transpose = observation_matrix.transpose();

        let r: R = nalgebra::convert(observation_noise_pixels);
        let mut observation_noise_covariance = OMatrix::<R, U4, U4>::identity() * r;
        observation_noise_covariance[(2, 2)] *= shape_noise_factor;
        observation_noise_covariance[(3, 3)] *= shape_noise_factor;

        Self {
            observation_matrix,
            observation_matrix_transpose,
            observation_noise_covariance,
        }
    }
}

impl<R> adskalman::ObservationModel<R, U7, U4> for BoxObservationModel<R>
where
    DefaultAllocator: Allocator<U7, U7>,
    DefaultAllocator: Allocator<U7>,
    DefaultAllocator: Allocator<U4, U7>,
    DefaultAllocator: Allocator<U7, U4>,
    DefaultAllocator: Allocator<U4, U4>,
    DefaultAllocator: Allocator<U4>,
    U4: DimMin<U4, Output = U4>,
    R: RealField + Copy,
{
    fn H(&self) -> &OMatrix<R, U4, U7> {
        &self.observation_matrix
    }
    fn HT(&self) -> &OMatrix<R, U7, U4> {
        &self.observation_matrix_transpose
    }
    fn R(&self) -> &OMatrix<R, U4, U4> {
        &self.observation_noise_covariance
    }
    fn predict_observation(&self, state: &OVector<R, U7>) -> OVector<R, U4> {
        self.observation_matrix * state
    }
}
