//! Field and business-rule validation run before anything is persisted.
//!
//! Every problem is collected so the form can show them all at once.

use std::collections::HashSet;

use crate::models::{ExtensionModel, PersonaModel};
use crate::response::ServiceError;

fn require(value: &str, message: &str, errors: &mut Vec<String>) {
    if value.trim().is_empty() {
        errors.push(message.to_string());
    }
}

fn finish(errors: Vec<String>) -> Result<(), ServiceError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::Validation(errors))
    }
}

pub fn validate_persona(model: &PersonaModel) -> Result<(), ServiceError> {
    let mut errors = Vec::new();
    require(&model.name, "Title cannot be empty", &mut errors);
    require(&model.description, "Description cannot be empty", &mut errors);
    require(&model.persona_message, "System message cannot be empty", &mut errors);
    finish(errors)
}

pub fn validate_extension(model: &ExtensionModel) -> Result<(), ServiceError> {
    let mut errors = Vec::new();
    require(&model.name, "Title cannot be empty", &mut errors);
    require(&model.description, "Description cannot be empty", &mut errors);
    require(&model.execution_steps, "Execution steps cannot be empty", &mut errors);

    for header in &model.headers {
        require(&header.key, "Header key cannot be empty", &mut errors);
        require(&header.value, "Header value cannot be empty", &mut errors);
    }
    for function in &model.functions {
        require(&function.code, "Function code cannot be empty", &mut errors);
        require(&function.endpoint, "Function endpoint cannot be empty", &mut errors);
    }
    errors.dedup();

    // Function names are only checked once the record itself is well formed.
    if errors.is_empty() {
        errors = validate_function_names(model);
    }
    finish(errors)
}

fn validate_function_names(model: &ExtensionModel) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for function in &model.functions {
        let schema: serde_json::Value = match serde_json::from_str(&function.code) {
            Ok(v) => v,
            Err(e) => {
                errors.push(format!(
                    "Error validating function schema: {}. The function code must be a valid JSON schema.",
                    e
                ));
                continue;
            }
        };
        let name = match schema.get("name").and_then(|v| v.as_str()) {
            Some(name) if !name.is_empty() => name,
            _ => {
                errors.push("Function name is required.".to_string());
                continue;
            }
        };
        if name.chars().any(char::is_whitespace) {
            errors.push(format!("Function name {} cannot contain spaces.", name));
            continue;
        }
        if !seen.insert(name.to_string()) {
            errors.push(format!(
                "Function name {} is already used. Please use a different name.",
                name
            ));
        }
    }

    if model.functions.is_empty() {
        errors.push("At least one function is required.".to_string());
    }
    errors
}
