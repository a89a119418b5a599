//! Decision objects and the schemas that produce them.
//!
//! An agent finishes its step by filling a decision schema. The backend
//! exposes each schema as an internal output tool; the arguments the model
//! passes to it are parsed into a [`Decision`], which the orchestrator then
//! routes.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use crate::error::{FlowError, Result};
use crate::tools::{validate_arguments, ToolArguments, ToolParameters};

/// Routing id that ends the conversation with the configured ending message.
pub const END_SENTINEL: &str = "end";

/// Conventional id of the closing agent.
pub const HANGUP_AGENT: &str = "hangup";

/// Prefix of backend-internal decision-emission tools.
pub const OUTPUT_TOOL_PREFIX: &str = "final_result";

/// Serde tag inserted when parsing one variant of a tagged decision enum.
pub const SCHEMA_TAG: &str = "schema";

/// Whether a tool name belongs to the decision-emission mechanism.
pub fn is_output_tool(tool_name: &str) -> bool {
    tool_name.starts_with(OUTPUT_TOOL_PREFIX)
}

/// Where a decision sends the conversation next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingTarget {
    Agent(String),
    End,
    /// The decision could not determine a next step.
    Unresolved,
}

impl RoutingTarget {
    /// Interpret a routing id, mapping [`END_SENTINEL`] to [`RoutingTarget::End`].
    pub fn from_id(id: Option<&str>) -> Self {
        match id {
            Some(END_SENTINEL) => Self::End,
            Some(id) if !id.is_empty() => Self::Agent(id.to_string()),
            _ => Self::Unresolved,
        }
    }

    pub fn agent(id: impl Into<String>) -> Self {
        let id: String = id.into();
        Self::from_id(Some(&id))
    }
}

/// Routing semantics of a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Plain structured output without routing.
    Informational,
    /// Terminal decision; the conversation ends without further routing.
    Hangup,
    Transfer(RoutingTarget),
}

/// A completed structured result.
pub trait Decision: Debug + Send + Sync {
    /// Schema name, used in logs and protocol errors.
    fn schema_name(&self) -> &str;

    fn route(&self) -> Route;

    /// Domain fields merged into the accumulated state on handoff.
    fn fields(&self) -> Map<String, Value>;
}

/// Serialize a decision's fields, skipping the enum tag.
pub fn fields_of<T: Serialize>(decision: &T) -> Map<String, Value> {
    match serde_json::to_value(decision) {
        Ok(Value::Object(mut map)) => {
            map.remove(SCHEMA_TAG);
            map
        }
        _ => Map::new(),
    }
}

/// Describes a structured output an agent must fill.
pub trait DecisionSchema: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> &ToolParameters;

    /// Parse backend arguments into a decision.
    fn parse(&self, args: &Value) -> Result<Arc<dyn Decision>>;

    /// Name of the backend-internal tool used to emit this decision.
    fn output_tool_name(&self) -> String {
        format!("{OUTPUT_TOOL_PREFIX}_{}", self.name())
    }
}

/// Schema backed by a serde type.
///
/// [`TypedSchema::new`] deserializes arguments straight into `D`.
/// [`TypedSchema::variant`] targets one variant of an internally tagged enum
/// (`#[serde(tag = "schema")]`) by inserting the tag before deserializing, so
/// all decisions of an application can live in one exhaustively matchable
/// type.
pub struct TypedSchema<D> {
    name: String,
    description: String,
    parameters: ToolParameters,
    tag: Option<String>,
    _decision: PhantomData<fn() -> D>,
}

impl<D> TypedSchema<D>
where
    D: Decision + DeserializeOwned + 'static,
{
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            tag: None,
            _decision: PhantomData,
        }
    }

    /// Schema for the enum variant whose serde tag equals `name`.
    pub fn variant(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
    ) -> Self {
        let name = name.into();
        Self {
            tag: Some(name.clone()),
            ..Self::new(name, description, parameters)
        }
    }

    /// Wrap into a shareable trait object.
    pub fn shared(self) -> Arc<dyn DecisionSchema> {
        Arc::new(self)
    }
}

impl<D> Debug for TypedSchema<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedSchema")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .finish()
    }
}

impl<D> DecisionSchema for TypedSchema<D>
where
    D: Decision + DeserializeOwned + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn parse(&self, args: &Value) -> Result<Arc<dyn Decision>> {
        let mut value = ToolArguments::new(args.clone()).normalized()?;
        validate_arguments(&value, &self.parameters.schema)
            .map_err(|e| FlowError::InvalidArgument(format!("{}: {e}", self.name)))?;
        if let (Some(tag), Value::Object(map)) = (&self.tag, &mut value) {
            map.insert(SCHEMA_TAG.to_string(), Value::String(tag.clone()));
        }
        let decision: D = serde_json::from_value(value)
            .map_err(|e| FlowError::InvalidArgument(format!("{}: {e}", self.name)))?;
        Ok(Arc::new(decision))
    }
}

/// Choice offered to the closing agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum HangupChoice {
    DoHangUp,
}

/// Terminal decision of the conventional `hangup` agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HangupDecision {
    pub decision: HangupChoice,
}

impl HangupDecision {
    pub const NAME: &'static str = "DoHangUp";

    pub fn schema() -> TypedSchema<Self> {
        let params = ToolParameters::object()
            .string_enum(
                "decision",
                "Hang up once the closing words have been said",
                &["DoHangUp"],
                true,
            )
            .build();
        TypedSchema::new(Self::NAME, "End the phone call.", params)
    }
}

impl Decision for HangupDecision {
    fn schema_name(&self) -> &str {
        Self::NAME
    }

    fn route(&self) -> Route {
        Route::Hangup
    }

    fn fields(&self) -> Map<String, Value> {
        Map::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, Serialize)]
    #[serde(tag = "schema")]
    enum Probe {
        Ask { answered: bool },
        Note { text: String },
    }

    impl Decision for Probe {
        fn schema_name(&self) -> &str {
            match self {
                Self::Ask { .. } => "Ask",
                Self::Note { .. } => "Note",
            }
        }

        fn route(&self) -> Route {
            match self {
                Self::Ask { answered: true } => Route::Transfer(RoutingTarget::agent("next")),
                Self::Ask { answered: false } => Route::Transfer(RoutingTarget::End),
                Self::Note { .. } => Route::Informational,
            }
        }

        fn fields(&self) -> Map<String, Value> {
            fields_of(self)
        }
    }

    fn ask_schema() -> TypedSchema<Probe> {
        TypedSchema::variant(
            "Ask",
            "ask",
            ToolParameters::object().boolean("answered", "answered", true).build(),
        )
    }

    #[test]
    fn routing_ids_map_to_targets() {
        assert_eq!(RoutingTarget::from_id(Some("end")), RoutingTarget::End);
        assert_eq!(RoutingTarget::from_id(Some("hangup")), RoutingTarget::Agent("hangup".into()));
        assert_eq!(RoutingTarget::from_id(Some("")), RoutingTarget::Unresolved);
        assert_eq!(RoutingTarget::from_id(None), RoutingTarget::Unresolved);
    }

    #[test]
    fn variant_schema_inserts_tag_and_parses_string_args() {
        let decision = ask_schema().parse(&json!(r#"{"answered": true}"#)).unwrap();
        assert_eq!(decision.schema_name(), "Ask");
        assert_eq!(decision.route(), Route::Transfer(RoutingTarget::Agent("next".into())));
    }

    #[test]
    fn fields_exclude_the_tag() {
        let decision = ask_schema().parse(&json!({"answered": false})).unwrap();
        let fields = decision.fields();
        assert_eq!(fields.get("answered"), Some(&json!(false)));
        assert!(!fields.contains_key(SCHEMA_TAG));
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let err = ask_schema().parse(&json!({"answered": "yes"})).unwrap_err();
        assert!(matches!(err, FlowError::InvalidArgument(_)));
    }

    #[test]
    fn output_tool_name_uses_prefix() {
        assert_eq!(ask_schema().output_tool_name(), "final_result_Ask");
        assert!(is_output_tool("final_result_Ask"));
        assert!(!is_output_tool("add_wechat_account"));
    }

    #[test]
    fn hangup_decision_routes_to_hangup() {
        let decision = HangupDecision::schema().parse(&json!({"decision": "DoHangUp"})).unwrap();
        assert_eq!(decision.route(), Route::Hangup);
        assert!(decision.fields().is_empty());
    }
}
