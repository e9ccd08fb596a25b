use serde::Serialize;
use serde::de::DeserializeOwned;

pub mod file_format;
pub mod fnv;
pub mod log_setup;
pub mod parallel;
pub mod shared_fn;

pub use file_format::{FileExtensionError, SerdeFormat};
pub use fnv::FnvHasher;
pub use shared_fn::SharedFn;

#[derive(Debug, thiserror::Error)]
pub enum SerdeFormatError {
    #[error("YAML serialization failed")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON serialization failed")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Extension(#[from] FileExtensionError),
}

pub type SerdeFormatResult<T> = Result<T, SerdeFormatError>;

pub fn serialize<T: Serialize>(value: &T, format: SerdeFormat) -> SerdeFormatResult<String> {
    match format {
        SerdeFormat::Yaml => Ok(serde_yml::to_string(value)?),
        SerdeFormat::Json => Ok(serde_json::to_string_pretty(value)?),
    }
}

pub fn deserialize<T: DeserializeOwned>(
    serialized: &str,
    format: SerdeFormat,
) -> SerdeFormatResult<T> {
    match format {
        SerdeFormat::Yaml => Ok(serde_yml::from_str(serialized)?),
        SerdeFormat::Json => Ok(serde_json::from_str(serialized)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        rank: usize,
        threshold: f32,
    }

    #[test]
    fn test_yaml_and_json_agree() {
        let value = Sample {
            name: "probe".to_string(),
            rank: 5,
            threshold: 50.0,
        };
        for format in [SerdeFormat::Yaml, SerdeFormat::Json] {
            let text = serialize(&value, format).unwrap();
            let back: Sample = deserialize(&text, format).unwrap();
            assert_eq!(back, value, "format {:?}", format);
        }
    }

    #[test]
    fn test_deserialize_reports_yaml_error() {
        let result: SerdeFormatResult<Sample> = deserialize("rank: [", SerdeFormat::Yaml);
        assert!(matches!(result, Err(SerdeFormatError::Yaml(_))));
    }
}
