use super::backends::{Predictor, Trainer, TrainingJob, TrainingOutcome};
use super::AlgorithmParams;
use crate::data::{DataValidator, Dataset};
use crate::error::{ForgeError, Result};
use crate::ml::Task;
use crate::runtime::CancelFlag;
use crate::types::{ModelRecord, PredictionOutput};

/// Validates one single-target training request, runs it on `trainer`
/// and checks what comes back. Never returns a fabricated score: a
/// backend result outside [0, 1] is an error.
pub fn run_training<T: Trainer + ?Sized>(
    trainer: &T,
    dataset: &Dataset,
    features: &[String],
    target: &str,
    params: &AlgorithmParams,
    min_rows: usize,
    cancel: &CancelFlag,
) -> Result<TrainingOutcome> {
    DataValidator::validate_columns(dataset, features, &[target.to_string()])?;
    DataValidator::validate_minimum_rows(dataset, min_rows)?;

    let job = TrainingJob {
        dataset,
        features,
        target,
        params,
        task: params.algorithm().task(),
    };

    let outcome = trainer.train(&job, cancel)?;

    if let Err(e) = check_outcome(&outcome, params) {
        trainer.discard(&outcome.artifact);
        return Err(e);
    }
    Ok(outcome)
}

fn check_outcome(outcome: &TrainingOutcome, params: &AlgorithmParams) -> Result<()> {
    if !outcome.accuracy.is_finite() || !(0.0..=1.0).contains(&outcome.accuracy) {
        return Err(ForgeError::backend(format!(
            "Backend reported accuracy {} for {}, expected a value in [0, 1]",
            outcome.accuracy,
            params.algorithm()
        )));
    }
    if outcome.algorithm != params.algorithm() {
        return Err(ForgeError::backend(format!(
            "Backend trained {} but {} was requested",
            outcome.algorithm,
            params.algorithm()
        )));
    }
    Ok(())
}

/// Checks that `model` can serve `rows`, dispatches to `predictor` and
/// verifies the output lines up one-to-one with the input
pub fn run_prediction<P: Predictor + ?Sized>(
    predictor: &P,
    model: &ModelRecord,
    rows: &[Vec<f64>],
    cancel: &CancelFlag,
) -> Result<PredictionOutput> {
    if !model.trained {
        return Err(ForgeError::NotTrained(model.id.clone()));
    }
    DataValidator::validate_input_width(rows, model.features.len())?;

    let mut output = predictor.predict(model, rows, cancel)?;

    if output.predictions.len() != rows.len() {
        return Err(ForgeError::backend(format!(
            "Backend returned {} predictions for {} rows",
            output.predictions.len(),
            rows.len()
        )));
    }
    if let Some(probabilities) = &output.probabilities {
        if probabilities.len() != rows.len() {
            return Err(ForgeError::backend(format!(
                "Backend returned {} probability rows for {} inputs",
                probabilities.len(),
                rows.len()
            )));
        }
    }
    if model.task == Task::Regression {
        output.probabilities = None;
    }

    Ok(output)
}
