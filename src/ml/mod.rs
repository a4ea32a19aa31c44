pub mod algorithms;
pub mod backends;
pub mod params;
pub mod split;
pub mod training;

pub use algorithms::{Algorithm, HyperparameterOption, ParamKind, Task};
pub use backends::{ModelBackend, Predictor, Trainer, TrainingJob, TrainingOutcome};
pub use params::{
    AlgorithmParams, DecisionTreeParams, GradientBoostingParams, KnnParams, LinearRegressionParams,
    LogisticRegressionParams, NeuralNetworkParams, ParamMap, RandomForestParams, SvmParams,
};
pub use training::{run_prediction, run_training};
