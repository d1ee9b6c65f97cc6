//! Loading and validating service descriptors from TOML or JSON files.

use crate::core::coercion::parse_boolean;
use crate::domain::model::{ModelSource, ParamType, ParameterDefinition, ServiceDescriptor};
use crate::utils::error::{Result, ServiceError};
use crate::utils::validation::{validate_bounds, validate_non_empty_string, validate_unique_names, Validate};
use serde_json::Value;
use std::path::Path;

impl ServiceDescriptor {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = super::substitute_env_vars(content);
        let descriptor: Self = toml::from_str(&processed)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let descriptor: Self = serde_json::from_str(content)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Load by file extension (`.toml` or `.json`). A relative model file path is
    /// resolved against the descriptor's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut descriptor = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            Some("json") => Self::from_json_str(&content)?,
            _ => {
                return Err(ServiceError::ConfigError {
                    message: format!(
                        "unsupported descriptor {}, expected a .toml or .json file",
                        path.display()
                    ),
                })
            }
        };

        if let ModelSource::File(model_path) = &descriptor.model {
            if model_path.is_relative() {
                if let Some(base) = path.parent() {
                    descriptor.model = ModelSource::File(base.join(model_path));
                }
            }
        }

        tracing::debug!(
            "Loaded service '{}' from {} ({} inputs, {} outputs)",
            descriptor.id,
            path.display(),
            descriptor.inputs().len(),
            descriptor.outputs().len()
        );
        Ok(descriptor)
    }
}

impl Validate for ServiceDescriptor {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("id", &self.id)?;
        validate_unique_names("inputs", self.inputs().iter().map(|d| d.name.as_str()))?;
        validate_unique_names("outputs", self.outputs().iter().map(|d| d.name.as_str()))?;

        for definition in self.inputs() {
            validate_definition("inputs", definition)?;
        }
        for definition in self.outputs() {
            validate_definition("outputs", definition)?;
            if definition.default.is_some() {
                return Err(invalid(
                    "outputs",
                    definition,
                    "Defaults are only meaningful on inputs",
                ));
            }
        }
        Ok(())
    }
}

fn validate_definition(group: &str, definition: &ParameterDefinition) -> Result<()> {
    validate_non_empty_string(&format!("{}.name", group), &definition.name)?;
    validate_bounds(&format!("{}.{}", group, definition.name), definition.min, definition.max)?;

    if definition.percentage && definition.param_type != ParamType::Number {
        return Err(invalid(group, definition, "Only number parameters can be percentages"));
    }

    if let Some(allowed) = &definition.allowed_values {
        let compatible = match definition.param_type {
            ParamType::Number => allowed.iter().all(|v| {
                v.is_number() || v.as_str().is_some_and(|s| s.trim().parse::<f64>().is_ok())
            }),
            ParamType::Boolean => allowed.iter().all(|v| parse_boolean(v).is_some()),
            ParamType::String => allowed
                .iter()
                .all(|v| !matches!(v, Value::Array(_) | Value::Object(_) | Value::Null)),
            ParamType::Array => false,
        };
        if !compatible {
            return Err(invalid(
                group,
                definition,
                &format!("Allowed values do not fit type '{}'", definition.param_type),
            ));
        }
    }
    Ok(())
}

fn invalid(group: &str, definition: &ParameterDefinition, reason: &str) -> ServiceError {
    ServiceError::InvalidConfigValueError {
        field: format!("{}.{}", group, definition.name),
        value: definition.address.to_string(),
        reason: reason.to_string(),
    }
}
