//! Structural validation of OpenAPI documents.
//!
//! [`walk_document`] inspects a document once and returns every
//! structural defect it finds as one string each. It never stops at the
//! first problem, and it never blocks resolution: run it over the
//! pre-resolution tree and report the collected defects together.

use lazy_static::lazy_static;
use regex::Regex;
use serde_yaml::{Mapping, Value};

use doc::{get, Document};

lazy_static! {
    static ref VERSION_RE: Regex = Regex::new(r"^\d+\.\d+\.\d+$").unwrap();
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
    static ref HTTP_URL_RE: Regex = Regex::new(r"^https?://.*").unwrap();
    static ref OPERATION_ID_RE: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").unwrap();
    static ref SCHEMA_NAME_RE: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]*$").unwrap();
}

const METHODS: &[&str] = &[
    "get", "post", "put", "delete", "patch", "head", "options", "trace",
];
const PARAMETER_LOCATIONS: &[&str] = &["query", "header", "path", "cookie"];
const SECURITY_SCHEME_TYPES: &[&str] = &["apiKey", "http", "oauth2", "openIdConnect"];

/// Walk |document| once and collect every structural defect.
pub fn walk_document(document: &Document) -> Vec<String> {
    let mut errors = Vec::new();
    let root = document.root();

    if get(root, "openapi").is_none() && get(root, "swagger").is_none() {
        errors.push("document must declare an 'openapi' or 'swagger' version".to_string());
    }

    match get(root, "info").and_then(Value::as_mapping) {
        Some(info) => walk_info(info, &mut errors),
        None => errors.push("'info' is required".to_string()),
    }

    match get(root, "paths").and_then(Value::as_mapping) {
        Some(paths) => walk_paths(paths, &mut errors),
        None => errors.push("'paths' is required".to_string()),
    }

    walk_components(root, &mut errors);
    walk_security(root, &mut errors);

    errors
}

fn walk_info(info: &Mapping, errors: &mut Vec<String>) {
    if get(info, "title").and_then(Value::as_str).is_none() {
        errors.push("info: 'title' is required".to_string());
    }
    match get(info, "version").and_then(Value::as_str) {
        None => errors.push("info: 'version' is required".to_string()),
        Some(version) if !version.is_empty() && !VERSION_RE.is_match(version) => {
            errors.push(format!(
                "info: version '{version}' is not of the form MAJOR.MINOR.PATCH"
            ));
        }
        Some(_) => (),
    }

    if let Some(contact) = get(info, "contact").and_then(Value::as_mapping) {
        if let Some(email) = get(contact, "email").and_then(Value::as_str) {
            if !EMAIL_RE.is_match(email) {
                errors.push(format!("info.contact: '{email}' is not a valid email address"));
            }
        }
        if let Some(url) = get(contact, "url").and_then(Value::as_str) {
            if !HTTP_URL_RE.is_match(url) {
                errors.push(format!("info.contact: '{url}' is not an http(s) URL"));
            }
        }
    }

    if let Some(license) = get(info, "license").and_then(Value::as_mapping) {
        if get(license, "name").and_then(Value::as_str).is_none() {
            errors.push("info.license: 'name' is required".to_string());
        }
        if let Some(url) = get(license, "url").and_then(Value::as_str) {
            if !HTTP_URL_RE.is_match(url) {
                errors.push(format!("info.license: '{url}' is not an http(s) URL"));
            }
        }
    }
}

fn walk_paths(paths: &Mapping, errors: &mut Vec<String>) {
    for (path, item) in paths.iter() {
        let (path, item) = match (path.as_str(), item.as_mapping()) {
            (Some(path), Some(item)) => (path, item),
            _ => continue,
        };

        if let Some(parameters) = get(item, "parameters") {
            walk_parameters(&format!("paths.{path}"), parameters, errors);
        }

        for method in METHODS {
            let operation = match get(item, method).and_then(Value::as_mapping) {
                Some(operation) => operation,
                None => continue,
            };
            walk_operation(&format!("paths.{path}.{method}"), operation, errors);
        }
    }
}

fn walk_operation(location: &str, operation: &Mapping, errors: &mut Vec<String>) {
    match get(operation, "responses").and_then(Value::as_mapping) {
        None => errors.push(format!("{location}: 'responses' is required")),
        Some(responses) if responses.is_empty() => {
            errors.push(format!("{location}: 'responses' must not be empty"));
        }
        Some(responses) => {
            for (status, _) in responses.iter() {
                let status = match status.as_str() {
                    Some(status) => status,
                    None => continue,
                };
                let in_range = status.parse::<i64>().map(|code| (100..=599).contains(&code));
                if status != "default" && in_range != Ok(true) {
                    errors.push(format!(
                        "{location}: response key '{status}' is neither 'default' nor a status code in [100, 599]"
                    ));
                }
            }
        }
    }

    if let Some(operation_id) = get(operation, "operationId").and_then(Value::as_str) {
        if !OPERATION_ID_RE.is_match(operation_id) {
            errors.push(format!(
                "{location}: operationId '{operation_id}' is not a valid identifier"
            ));
        }
    }

    if let Some(parameters) = get(operation, "parameters") {
        walk_parameters(location, parameters, errors);
    }
}

fn walk_parameters(location: &str, parameters: &Value, errors: &mut Vec<String>) {
    let parameters = match parameters.as_sequence() {
        Some(parameters) => parameters,
        None => {
            errors.push(format!("{location}: 'parameters' must be an array"));
            return;
        }
    };

    for (index, parameter) in parameters.iter().enumerate() {
        let parameter = match parameter.as_mapping() {
            Some(parameter) => parameter,
            None => continue,
        };
        // A pure reference is resolved elsewhere; nothing to check here.
        if parameter.len() == 1 && get(parameter, "$ref").is_some() {
            continue;
        }

        if get(parameter, "name").and_then(Value::as_str).is_none() {
            errors.push(format!("{location}.parameters[{index}]: 'name' is required"));
        }
        match get(parameter, "in").and_then(Value::as_str) {
            None => errors.push(format!("{location}.parameters[{index}]: 'in' is required")),
            Some(place) if !PARAMETER_LOCATIONS.contains(&place) => {
                errors.push(format!(
                    "{location}.parameters[{index}]: '{place}' is not one of query, header, path, cookie"
                ));
            }
            Some(_) => (),
        }
    }
}

fn walk_components(root: &Mapping, errors: &mut Vec<String>) {
    let components = match get(root, "components").and_then(Value::as_mapping) {
        Some(components) => components,
        None => return,
    };

    if let Some(schemas) = get(components, "schemas").and_then(Value::as_mapping) {
        for (name, _) in schemas.iter() {
            let name = match name.as_str() {
                Some(name) => name,
                None => continue,
            };
            if !SCHEMA_NAME_RE.is_match(name) {
                errors.push(format!("components.schemas: '{name}' is not a valid schema name"));
            }
        }
    }

    if let Some(schemes) = get(components, "securitySchemes").and_then(Value::as_mapping) {
        for (name, scheme) in schemes.iter() {
            let (name, scheme) = match (name.as_str(), scheme.as_mapping()) {
                (Some(name), Some(scheme)) => (name, scheme),
                _ => continue,
            };
            match get(scheme, "type").and_then(Value::as_str) {
                Some(kind) if SECURITY_SCHEME_TYPES.contains(&kind) => (),
                Some(kind) => errors.push(format!(
                    "components.securitySchemes.{name}: '{kind}' is not one of apiKey, http, oauth2, openIdConnect"
                )),
                None => errors.push(format!(
                    "components.securitySchemes.{name}: 'type' is required"
                )),
            }
        }
    }
}

fn walk_security(root: &Mapping, errors: &mut Vec<String>) {
    let security = match get(root, "security").and_then(Value::as_sequence) {
        Some(security) => security,
        None => return,
    };
    let defined = get(root, "components")
        .and_then(Value::as_mapping)
        .and_then(|components| get(components, "securitySchemes"))
        .and_then(Value::as_mapping);

    for requirement in security {
        let requirement = match requirement.as_mapping() {
            Some(requirement) => requirement,
            None => continue,
        };
        for (name, _) in requirement.iter() {
            let name = match name.as_str() {
                Some(name) => name,
                None => continue,
            };
            let known = defined
                .map(|schemes| get(schemes, name).is_some())
                .unwrap_or(false);
            if !known {
                errors.push(format!(
                    "security: '{name}' is not defined under components.securitySchemes"
                ));
            }
        }
    }
}
