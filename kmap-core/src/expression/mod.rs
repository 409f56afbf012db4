/// Expression compilers for DynamoDB-style condition and update expressions
///
/// Supports:
/// - **Condition expressions**: nested `$and`/`$or`/`$nor` combinators and
///   comparison/function operators over entity props
/// - **Update expressions**: SET, REMOVE, ADD, DELETE clauses built from
///   update verbs such as `$set` or `$increment`
/// - Attribute name and value placeholders
///
/// # Condition Expression Examples
///
/// ```ignore
/// // {age: {$gt: 18}, active: true}
/// let expr = compile_condition(&props, &json!({"age": {"$gt": 18}, "active": true}))?;
/// assert_eq!(expr.text, "(#active = :v1 AND #age > :v2)");
/// ```
///
/// # Update Expression Examples
///
/// ```ignore
/// let expr = compile_update(&props, &json!({"$increment": {"total": 10}}))?;
/// assert_eq!(expr.text, "SET #total = #total + :v1");
/// ```

pub mod condition;
pub mod update;

pub use condition::{compile_condition, compile_key_condition, ConditionCompiler};
pub use update::{compile_update, UpdateCompiler};

use std::collections::{BTreeMap, HashMap};

use serde_json::Value as Json;

use crate::prop::Prop;
use crate::strategy::Strategy;
use crate::{Result, Value};

/// Rendered expression with its placeholder maps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledExpression {
    pub text: String,
    /// `#placeholder -> attribute name`
    pub names: HashMap<String, String>,
    /// `:placeholder -> encoded value`
    pub values: HashMap<String, Value>,
}

/// Placeholder allocator shared by every expression of one request.
///
/// Name placeholders are deduplicated per attribute; value placeholders are
/// never reused and numbered from `:v1`.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    names: BTreeMap<String, String>,
    values: BTreeMap<String, Value>,
    next_value: usize,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the `#name` placeholder for an attribute, registering it once.
    pub fn name(&mut self, attribute: &str) -> String {
        let base: String = attribute
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();

        let mut placeholder = format!("#{}", base);
        let mut suffix = 1;
        loop {
            match self.names.get(&placeholder) {
                Some(existing) if existing == attribute => return placeholder,
                Some(_) => {
                    suffix += 1;
                    placeholder = format!("#{}_{}", base, suffix);
                }
                None => {
                    self.names.insert(placeholder.clone(), attribute.to_string());
                    return placeholder;
                }
            }
        }
    }

    /// Registers a value under a fresh `:vN` placeholder.
    pub fn value(&mut self, value: Value) -> String {
        self.next_value += 1;
        let placeholder = format!(":v{}", self.next_value);
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn finish(self, text: String) -> CompiledExpression {
        CompiledExpression {
            text,
            names: self.names.into_iter().collect(),
            values: self.values.into_iter().collect(),
        }
    }
}

/// Key condition and post-filter of one strategy, sharing placeholders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyExpressions {
    pub key_condition: Option<String>,
    pub filter: Option<String>,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, Value>,
}

/// Compiles the key condition and the post-filter of a strategy.
///
/// Scans and direct gets have no key condition; an empty post-filter
/// compiles to `None`.
pub fn compile_strategy(strategy: &Strategy, props: &[Prop]) -> Result<StrategyExpressions> {
    let mut placeholders = Placeholders::new();

    let key_condition = match strategy.kind {
        crate::StrategyKind::PartitionQuery | crate::StrategyKind::RangeQuery => {
            Some(compile_key_condition(strategy, &mut placeholders)?)
        }
        _ => None,
    };

    let filter = if strategy.filter.is_empty() {
        None
    } else {
        let filter = Json::Object(strategy.filter.clone());
        Some(ConditionCompiler::new(props, &mut placeholders).compile(&filter)?)
    };

    let compiled = placeholders.finish(String::new());
    Ok(StrategyExpressions {
        key_condition,
        filter,
        names: compiled.names,
        values: compiled.values,
    })
}

/// Joins fragments, parenthesizing once there is more than one.
pub(crate) fn join_group(mut parts: Vec<String>, op: &str) -> String {
    if parts.len() == 1 {
        return parts.remove(0);
    }
    format!("({})", parts.join(&format!(" {} ", op)))
}

/// True when the whole text is one parenthesized group.
pub(crate) fn is_wrapped(text: &str) -> bool {
    if !text.starts_with('(') || !text.ends_with(')') {
        return false;
    }
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != text.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    true
}
