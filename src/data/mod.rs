pub mod csv;
pub mod dataset;
pub mod validator;

pub use csv::CsvConnector;
pub use dataset::{Dataset, Row, TrainingData};
pub use validator::DataValidator;
