//! Downloadable renderings of models: JSON, TOML, Python and notebooks.

pub mod formats;
pub mod notebook;
pub mod script;

pub use formats::{export_model, ExportFormat, ExportedModel};
pub use notebook::{apply_network_options, build_notebook, Notebook, NotebookPlan};
