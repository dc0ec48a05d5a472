//! MCP tool definitions: typed property schemas and dispatch
//!
//! Tools declare their arguments as typed properties; arguments are
//! validated against the schema before the handler runs, so handlers can
//! assume well-formed input.

use serde_json::{json, Map, Value};

use crate::{Error, Result};

/// Handler invoked with validated arguments; returns the text result.
pub type ToolHandler = Box<dyn Fn(&Map<String, Value>) -> Result<String> + Send + Sync>;

/// Property value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Boolean,
    Integer,
    String,
}

impl PropertyType {
    const fn json_name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::String => "string",
        }
    }
}

/// One tool argument: type, optional default, optional integer range.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub kind: PropertyType,
    pub default: Option<Value>,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl Property {
    /// Required string property.
    #[must_use]
    pub fn string(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PropertyType::String,
            default: None,
            min: None,
            max: None,
        }
    }

    /// Required boolean property.
    #[must_use]
    pub fn boolean(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PropertyType::Boolean,
            default: None,
            min: None,
            max: None,
        }
    }

    /// Required integer property with an allowed range.
    #[must_use]
    pub fn integer(name: &str, min: i64, max: i64) -> Self {
        Self {
            name: name.to_string(),
            kind: PropertyType::Integer,
            default: None,
            min: Some(min),
            max: Some(max),
        }
    }

    /// Make the property optional with a default value.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn to_json(&self) -> Value {
        let mut schema = json!({ "type": self.kind.json_name() });
        if let Some(default) = &self.default {
            schema["default"] = default.clone();
        }
        if self.kind == PropertyType::Integer {
            if let Some(min) = self.min {
                schema["minimum"] = json!(min);
            }
            if let Some(max) = self.max {
                schema["maximum"] = json!(max);
            }
        }
        schema
    }

    fn validate(&self, value: &Value) -> Result<Value> {
        match self.kind {
            PropertyType::Boolean if value.is_boolean() => Ok(value.clone()),
            PropertyType::String if value.is_string() => Ok(value.clone()),
            PropertyType::Integer => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| Error::Mcp(format!("property {} must be an integer", self.name)))?;
                if let Some(min) = self.min {
                    if n < min {
                        return Err(Error::Mcp(format!(
                            "value {n} is below minimum allowed: {min}"
                        )));
                    }
                }
                if let Some(max) = self.max {
                    if n > max {
                        return Err(Error::Mcp(format!(
                            "value {n} exceeds maximum allowed: {max}"
                        )));
                    }
                }
                Ok(json!(n))
            }
            _ => Err(Error::Mcp(format!(
                "invalid type for property {}",
                self.name
            ))),
        }
    }
}

/// Ordered list of tool properties.
#[derive(Debug, Clone, Default)]
pub struct PropertyList {
    properties: Vec<Property>,
}

impl PropertyList {
    #[must_use]
    pub fn new(properties: Vec<Property>) -> Self {
        Self { properties }
    }

    /// Names of properties without defaults.
    #[must_use]
    pub fn required(&self) -> Vec<&str> {
        self.properties
            .iter()
            .filter(|p| p.default.is_none())
            .map(|p| p.name.as_str())
            .collect()
    }

    /// JSON Schema `properties` object.
    #[must_use]
    pub fn to_schema(&self) -> Value {
        let mut schema = Map::new();
        for property in &self.properties {
            schema.insert(property.name.clone(), property.to_json());
        }
        Value::Object(schema)
    }

    /// Validate arguments against the schema, applying defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mcp`] for missing required arguments, wrong types,
    /// or out-of-range integers.
    pub fn parse_arguments(&self, arguments: &Value) -> Result<Map<String, Value>> {
        let mut parsed = Map::new();

        for property in &self.properties {
            match arguments.get(&property.name) {
                Some(value) => {
                    parsed.insert(property.name.clone(), property.validate(value)?);
                }
                None => match &property.default {
                    Some(default) => {
                        parsed.insert(property.name.clone(), default.clone());
                    }
                    None => {
                        return Err(Error::Mcp(format!(
                            "missing required argument: {}",
                            property.name
                        )));
                    }
                },
            }
        }

        Ok(parsed)
    }
}

/// A callable tool exposed over MCP.
pub struct McpTool {
    pub name: String,
    pub description: String,
    properties: PropertyList,
    handler: ToolHandler,
}

impl McpTool {
    #[must_use]
    pub fn new(
        name: &str,
        description: &str,
        properties: PropertyList,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            properties,
            handler,
        }
    }

    /// Tool descriptor for `tools/list`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": {
                "type": "object",
                "properties": self.properties.to_schema(),
                "required": self.properties.required(),
            },
        })
    }

    /// Validate arguments and run the handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mcp`] on argument validation or handler failure.
    pub fn call(&self, arguments: &Value) -> Result<Value> {
        let parsed = self.properties.parse_arguments(arguments)?;
        let text = (self.handler)(&parsed)?;

        Ok(json!({
            "content": [{ "type": "text", "text": text }],
            "isError": false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume_tool() -> McpTool {
        McpTool::new(
            "set_volume",
            "Set speaker volume",
            PropertyList::new(vec![Property::integer("volume", 0, 100)]),
            Box::new(|args| {
                let volume = args.get("volume").and_then(Value::as_i64).unwrap_or(0);
                Ok(format!("volume set to {volume}"))
            }),
        )
    }

    #[test]
    fn descriptor_lists_required_properties() {
        let tool = volume_tool();
        let descriptor = tool.to_json();

        assert_eq!(descriptor["name"], "set_volume");
        assert_eq!(descriptor["inputSchema"]["required"][0], "volume");
        assert_eq!(
            descriptor["inputSchema"]["properties"]["volume"]["minimum"],
            0
        );
    }

    #[test]
    fn call_validates_range() {
        let tool = volume_tool();

        let result = tool.call(&json!({ "volume": 150 }));
        assert!(result.is_err());

        let result = tool.call(&json!({ "volume": 50 })).unwrap();
        assert_eq!(result["content"][0]["text"], "volume set to 50");
    }

    #[test]
    fn missing_required_argument_fails() {
        let tool = volume_tool();
        assert!(tool.call(&json!({})).is_err());
    }

    #[test]
    fn defaults_fill_absent_arguments() {
        let properties = PropertyList::new(vec![
            Property::string("text").with_default(json!("hi")),
            Property::boolean("loud").with_default(json!(false)),
        ]);

        let parsed = properties.parse_arguments(&json!({})).unwrap();
        assert_eq!(parsed["text"], "hi");
        assert_eq!(parsed["loud"], false);
    }

    #[test]
    fn wrong_type_is_rejected() {
        let properties = PropertyList::new(vec![Property::boolean("flag")]);
        assert!(properties.parse_arguments(&json!({ "flag": "yes" })).is_err());
    }
}
