/// Errors raised while fitting or evaluating a calibration model.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RegressionError {
    #[error("model has not been trained")]
    NotTrained,
    #[error("not enough samples to fit the model (samples={samples}, coefficients={features})")]
    NotEnoughSamples { samples: usize, features: usize },
    #[error("design matrix is singular or ill-conditioned (dependent column {column})")]
    IllConditioned { column: usize },
    #[error("training inputs differ in length (train={train}, answers={answers})")]
    LengthMismatch { train: usize, answers: usize },
}
