//! Experiment definitions and the file they live in.
//!
//! An experiment file is a [ron] document holding an ordered list of
//! definitions. Each definition names the modules it uses and their
//! settings, both in the order they should be shown and sent:
//!
//! ```ron
//! (
//!     experiments: [
//!         (
//!             name: "Ramp",
//!             module_settings: [
//!                 ("Test", [("Value1", 0.0), ("Value2", 10.0), ("Value3", 320), ("Value4", 10)]),
//!             ],
//!         ),
//!     ],
//! )
//! ```
//!
//! The file is always read and written as a whole.

use crate::experiment_module::{OrderedMap, Settings};

use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

/// One experiment: which modules take part and how they are set up.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExperimentDefinition {
    /// Name shown to the user and used to pick the experiment.
    pub name: String,
    /// Settings per module name.
    #[serde(default)]
    pub module_settings: OrderedMap<Settings>,
}

impl ExperimentDefinition {
    /// A definition with no modules yet.
    pub fn new(name: impl Into<String>) -> Self {
        ExperimentDefinition {
            name: name.into(),
            module_settings: OrderedMap::new(),
        }
    }

    /// Adds (or replaces) a module and its settings.
    pub fn with_module(mut self, module: impl Into<String>, settings: Settings) -> Self {
        self.module_settings.insert(module, settings);
        self
    }

    /// Names of the modules in this definition.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.module_settings.keys()
    }
}

/// Errors reading or writing an experiment file.
#[derive(Debug)]
pub enum ExperimentFileError {
    /// Returned when io fails when reading or writing files.
    IoError(std::io::Error),

    /// Returned when serialization fails.
    RonError(ron::Error),

    /// Returned when the file is not a valid experiment set.
    RonSpannedError(ron::de::SpannedError),
}

impl fmt::Display for ExperimentFileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ExperimentFileError as EFE;
        let msg = match self {
            EFE::IoError(error) => Cow::from(format!("io error: {}", error)),
            EFE::RonError(error) => Cow::from(format!("ron error: {}", error)),
            EFE::RonSpannedError(error) => {
                Cow::from(format!("malformed experiment file: {}", error))
            }
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ExperimentFileError {}

/// The ordered list of experiments a user can choose from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExperimentSet {
    /// Definitions, in file order.
    #[serde(default)]
    pub experiments: Vec<ExperimentDefinition>,
}

impl ExperimentSet {
    /// Reads an experiment set from the path provided.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ExperimentFileError> {
        let handle = File::open(path).map_err(ExperimentFileError::IoError)?;
        Self::from_reader(BufReader::new(handle))
    }

    /// Reads an experiment set from the [Read]able object provided.
    pub fn from_reader(reader: impl Read) -> Result<Self, ExperimentFileError> {
        ron::de::from_reader(reader).map_err(ExperimentFileError::RonSpannedError)
    }

    /// Writes the set out to the path provided, replacing the file.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), ExperimentFileError> {
        let handle = File::create(path).map_err(ExperimentFileError::IoError)?;
        let mut writer = BufWriter::new(handle);
        self.to_writer(&mut writer)?;
        writer.flush().map_err(ExperimentFileError::IoError)
    }

    /// Writes the set to the [Write]able object provided.
    pub fn to_writer(&self, writer: impl Write) -> Result<(), ExperimentFileError> {
        ron::ser::to_writer_pretty(writer, self, ron::ser::PrettyConfig::default())
            .map_err(ExperimentFileError::RonError)
    }

    /// Looks a definition up by name.
    pub fn find(&self, name: &str) -> Option<&ExperimentDefinition> {
        self.experiments.iter().find(|e| e.name == name)
    }

    /// The first definition in the file.
    pub fn first(&self) -> Option<&ExperimentDefinition> {
        self.experiments.first()
    }

    /// Names of all definitions, in file order.
    pub fn names(&self) -> Vec<&str> {
        self.experiments.iter().map(|e| e.name.as_str()).collect()
    }
}
