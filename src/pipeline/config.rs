//! Node configuration strings using winnow.
//!
//! Every node receives its configuration as an opaque `key=value` string:
//!
//! ```text
//! inputs=2 mode=async queue=5 policy=drop-front prefix="/var/rec/cam 1"
//! ```
//!
//! # Syntax
//!
//! - Properties are whitespace separated `key=value` pairs
//! - Keys start with a letter or `_` and may contain `-` and digits
//! - Values are quoted strings, booleans, integers, floats, or bare words
//! - Later occurrences of a key override earlier ones
//!
//! The engine itself only interprets the keys read by
//! [`EngineOptions::from_config`]; everything else is left to the node
//! implementation.

use crate::element::{BackpressurePolicy, DEFAULT_QUEUE_CAPACITY, SlotDirection, SlotSpec};
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use winnow::Parser;
use winnow::ascii::{alpha1, multispace0, multispace1};
use winnow::combinator::{alt, delimited, separated};
use winnow::error::ContextError;
use winnow::token::{take_till, take_while};

type WResult<T> = std::result::Result<T, ContextError>;

/// Default consecutive failures between two `ProcessFailure` events.
pub const DEFAULT_FAILURE_THRESHOLD: u64 = 3;

// ============================================================================
// Values
// ============================================================================

/// A property value in a configuration string.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A string value (quoted or unquoted).
    String(String),
    /// An integer value.
    Integer(i64),
    /// A floating-point value.
    Float(f64),
    /// A boolean value.
    Bool(bool),
}

impl PropertyValue {
    /// Get as a string, converting if necessary.
    pub fn as_string(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Integer(i) => i.to_string(),
            PropertyValue::Float(f) => f.to_string(),
            PropertyValue::Bool(b) => b.to_string(),
        }
    }

    /// Try to get as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get as a u64.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|i| u64::try_from(i).ok())
    }

    /// Try to get as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Integer(i) => Some(*i as f64),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            PropertyValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            },
            PropertyValue::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) if s.is_empty() || s.contains(char::is_whitespace) => {
                write!(f, "\"{s}\"")
            }
            other => f.write_str(&other.as_string()),
        }
    }
}

// ============================================================================
// NodeConfig
// ============================================================================

/// Parsed node configuration.
///
/// # Example
///
/// ```rust
/// use mediagraph::pipeline::NodeConfig;
///
/// let config: NodeConfig = "mode=async queue=5 prefix='cam 1'".parse().unwrap();
/// assert_eq!(config.get_str("mode"), Some("async".to_string()));
/// assert_eq!(config.get_u64("queue").unwrap(), Some(5));
/// assert_eq!(config.get_str("prefix"), Some("cam 1".to_string()));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeConfig {
    properties: Vec<(String, PropertyValue)>,
}

impl NodeConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration string.
    pub fn parse(input: &str) -> Result<Self> {
        let properties = config
            .parse(input.trim())
            .map_err(|e| Error::Config(format!("invalid node configuration '{input}': {e}")))?;
        Ok(Self { properties })
    }

    /// Add a property, builder style.
    pub fn with(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.set(key, value);
        self
    }

    /// Set a property, overriding any earlier value.
    pub fn set(&mut self, key: impl Into<String>, value: PropertyValue) {
        self.properties.push((key.into(), value));
    }

    /// Get the effective value of a key.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Check if a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Get a value as a string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(PropertyValue::as_string)
    }

    /// Get a non-negative integer, failing if the value is not one.
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        self.get(key)
            .map(|value| {
                value.as_u64().ok_or_else(|| {
                    Error::Config(format!("'{key}' expects a non-negative integer, got {value}"))
                })
            })
            .transpose()
    }

    /// Get a boolean, failing if the value is not one.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get(key)
            .map(|value| {
                value
                    .as_bool()
                    .ok_or_else(|| Error::Config(format!("'{key}' expects a boolean, got {value}")))
            })
            .transpose()
    }

    /// Get a millisecond count as a duration.
    pub fn get_millis(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.get_u64(key)?.map(Duration::from_millis))
    }

    /// Iterate over the effective keys in first-seen order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        let mut seen = Vec::new();
        self.properties.iter().filter_map(move |(k, _)| {
            if seen.contains(&k.as_str()) {
                None
            } else {
                seen.push(k.as_str());
                Some(k.as_str())
            }
        })
    }

    /// Check if no property is set.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl FromStr for NodeConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.keys().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if let Some(value) = self.get(key) {
                write!(f, "{key}={value}")?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Grammar
// ============================================================================

/// Parse a whole configuration string.
fn config(input: &mut &str) -> WResult<Vec<(String, PropertyValue)>> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let properties = separated(1.., property, multispace1).parse_next(input)?;
    multispace0.parse_next(input)?;
    Ok(properties)
}

/// Parse an identifier (property name).
fn identifier<'a>(input: &mut &'a str) -> WResult<&'a str> {
    (
        alt((alpha1::<_, ContextError>, "_")),
        take_while(0.., |c: char| c.is_alphanumeric() || c == '_' || c == '-'),
    )
        .take()
        .parse_next(input)
}

/// Parse a property (key=value).
fn property(input: &mut &str) -> WResult<(String, PropertyValue)> {
    let key = identifier.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    let _ = '='.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    let value = property_value.parse_next(input)?;
    Ok((key.to_string(), value))
}

/// Parse a property value.
fn property_value(input: &mut &str) -> WResult<PropertyValue> {
    alt((
        quoted_string.map(PropertyValue::String),
        bare_word.map(classify),
    ))
    .parse_next(input)
}

/// Parse a quoted string.
fn quoted_string(input: &mut &str) -> WResult<String> {
    alt((
        delimited('"', take_till(0.., '"'), '"'),
        delimited('\'', take_till(0.., '\''), '\''),
    ))
    .map(|s: &str| s.to_string())
    .parse_next(input)
}

/// Parse a bare (unquoted) word. Stops at whitespace or `=`.
fn bare_word<'a>(input: &mut &'a str) -> WResult<&'a str> {
    take_while(1.., |c: char| !c.is_whitespace() && c != '=').parse_next(input)
}

/// Type a bare word: boolean, integer, float, or string.
fn classify(word: &str) -> PropertyValue {
    match word {
        "true" | "yes" => PropertyValue::Bool(true),
        "false" | "no" => PropertyValue::Bool(false),
        _ => {
            if let Ok(i) = word.parse::<i64>() {
                PropertyValue::Integer(i)
            } else if word.contains('.')
                && word.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-')
                && let Ok(f) = word.parse::<f64>()
            {
                PropertyValue::Float(f)
            } else {
                PropertyValue::String(word.to_string())
            }
        }
    }
}

// ============================================================================
// Engine options
// ============================================================================

/// How and when a node's process function runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingModel {
    /// Inline on the thread delivering the input; no queue.
    Synchronous,
    /// On a dedicated worker whenever every wired input slot has a buffer.
    #[default]
    AsyncCommon,
    /// On a dedicated worker at a fixed interval, with the latest buffer
    /// seen per slot.
    AsyncPeriodic {
        /// Tick interval.
        interval: Duration,
    },
}

impl SchedulingModel {
    /// Configuration name of the model.
    pub fn name(&self) -> &'static str {
        match self {
            SchedulingModel::Synchronous => "sync",
            SchedulingModel::AsyncCommon => "async",
            SchedulingModel::AsyncPeriodic { .. } => "periodic",
        }
    }

    /// Whether the model runs its own worker thread.
    pub fn is_threaded(&self) -> bool {
        !matches!(self, SchedulingModel::Synchronous)
    }
}

impl fmt::Display for SchedulingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingModel::AsyncPeriodic { interval } => write!(f, "periodic({interval:?})"),
            other => f.write_str(other.name()),
        }
    }
}

/// The configuration keys the engine interprets.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Number of input slots.
    pub inputs: usize,
    /// Number of output slots.
    pub outputs: usize,
    /// Scheduling model.
    pub model: SchedulingModel,
    /// Queue capacity per input slot.
    pub capacities: Vec<usize>,
    /// Overflow policy for every input slot.
    pub policy: BackpressurePolicy,
    /// Consecutive failures between two `ProcessFailure` events.
    pub failure_threshold: u64,
}

impl EngineOptions {
    /// Read the engine keys from `config`.
    ///
    /// `inputs` and `outputs` default to the node kind's slot counts.
    ///
    /// # Example
    ///
    /// ```rust
    /// use mediagraph::pipeline::{EngineOptions, NodeConfig, SchedulingModel};
    ///
    /// let config = NodeConfig::parse("mode=periodic interval-ms=33").unwrap();
    /// let options = EngineOptions::from_config(&config, 1, 1).unwrap();
    /// assert!(matches!(options.model, SchedulingModel::AsyncPeriodic { .. }));
    ///
    /// // Queue options make no sense without a queue
    /// let config = NodeConfig::parse("mode=sync queue=4").unwrap();
    /// assert!(EngineOptions::from_config(&config, 1, 1).is_err());
    /// ```
    pub fn from_config(config: &NodeConfig, inputs: usize, outputs: usize) -> Result<Self> {
        let inputs = config.get_u64("inputs")?.map_or(inputs, |n| n as usize);
        let outputs = config.get_u64("outputs")?.map_or(outputs, |n| n as usize);

        let queue_keys: Vec<&str> = config
            .keys()
            .filter(|k| *k == "queue" || *k == "policy" || k.starts_with("queue-"))
            .collect();

        let interval = config.get_millis("interval-ms")?;
        let mode = config.get_str("mode").unwrap_or_else(|| "async".to_string());
        let model = match mode.as_str() {
            "sync" | "synchronous" => SchedulingModel::Synchronous,
            "async" | "async-common" => SchedulingModel::AsyncCommon,
            "periodic" | "async-periodic" => match interval {
                Some(interval) if !interval.is_zero() => {
                    SchedulingModel::AsyncPeriodic { interval }
                }
                _ => {
                    return Err(Error::Config(
                        "mode=periodic requires interval-ms greater than zero".into(),
                    ));
                }
            },
            other => return Err(Error::Config(format!("unknown scheduling mode '{other}'"))),
        };

        if interval.is_some() && !matches!(model, SchedulingModel::AsyncPeriodic { .. }) {
            return Err(Error::Config(format!(
                "interval-ms is incompatible with mode={}",
                model.name()
            )));
        }
        if let Some(key) = queue_keys.first()
            && model != SchedulingModel::AsyncCommon
        {
            return Err(Error::Config(format!(
                "'{key}' is incompatible with mode={}: the node has no input queue",
                model.name()
            )));
        }

        let default_capacity = match config.get_u64("queue")? {
            Some(0) => return Err(Error::Config("queue capacity must be at least 1".into())),
            Some(n) => n as usize,
            None => DEFAULT_QUEUE_CAPACITY,
        };
        let mut capacities = vec![default_capacity; inputs];
        for key in queue_keys.iter().filter(|k| k.starts_with("queue-")) {
            let index: usize = key["queue-".len()..]
                .parse()
                .map_err(|_| Error::Config(format!("malformed slot key '{key}'")))?;
            let slot = capacities.get_mut(index).ok_or(Error::InvalidSlot {
                node: String::new(),
                direction: SlotDirection::Input,
                index,
                count: inputs,
            })?;
            *slot = match config.get_u64(key)? {
                Some(0) | None => {
                    return Err(Error::Config(format!("'{key}' must be at least 1")));
                }
                Some(n) => n as usize,
            };
        }

        let policy = match config.get_str("policy") {
            Some(p) => p.parse()?,
            None => BackpressurePolicy::default(),
        };

        let failure_threshold = match config.get_u64("failure-threshold")? {
            Some(0) => {
                return Err(Error::Config(
                    "failure-threshold must be at least 1".into(),
                ));
            }
            Some(n) => n,
            None => DEFAULT_FAILURE_THRESHOLD,
        };

        Ok(Self {
            inputs,
            outputs,
            model,
            capacities,
            policy,
            failure_threshold,
        })
    }

    /// Input slot descriptions, named `in<n>`.
    pub fn input_slots(&self) -> Vec<SlotSpec> {
        self.capacities
            .iter()
            .enumerate()
            .map(|(i, &capacity)| {
                SlotSpec::new(format!("in{i}"))
                    .with_capacity(capacity)
                    .with_policy(self.policy)
            })
            .collect()
    }
}
