/// Condition expression compiler
///
/// Walks a filter object and renders one boolean expression. A node is a
/// combinator (`$and`, `$or`, `$nor`), a plain object whose keys are
/// operators or property names, or a bare scalar meaning equality with the
/// property currently in context.

use serde_json::{Map, Value as Json};
use std::str::FromStr;

use super::{is_wrapped, join_group, CompiledExpression, Placeholders};
use crate::prop::{find_prop, Prop, PropKind};
use crate::strategy::Strategy;
use crate::{Error, PropType, Result, Value};

/// Property in context: its rendered path and the prop used to encode values
#[derive(Debug, Clone)]
struct Target {
    path: String,
    prop: Prop,
}

impl Target {
    /// `size(<path>)` as a number-typed, prefixless pseudo-property.
    fn size(&self) -> Target {
        let path = format!("size({})", self.path);
        Target {
            prop: Prop {
                kind: PropKind::Dynamic { name: path.clone() },
                alias: path.clone(),
                prefix: String::new(),
                ty: PropType::Number,
                required: false,
                key: false,
                index: self.prop.index,
            },
            path,
        }
    }
}

pub struct ConditionCompiler<'a> {
    props: &'a [Prop],
    placeholders: &'a mut Placeholders,
}

impl<'a> ConditionCompiler<'a> {
    pub fn new(props: &'a [Prop], placeholders: &'a mut Placeholders) -> Self {
        Self { props, placeholders }
    }

    /// Renders a filter into expression text, registering placeholders.
    pub fn compile(&mut self, filter: &Json) -> Result<String> {
        self.node(filter, None)
    }

    fn node(&mut self, node: &Json, target: Option<&Target>) -> Result<String> {
        match node {
            Json::Object(entries) => self.object(entries, target),
            scalar => {
                let target = require_target("equality", target)?;
                self.compare(target, "=", scalar)
            }
        }
    }

    fn object(&mut self, entries: &Map<String, Json>, target: Option<&Target>) -> Result<String> {
        if entries.is_empty() {
            return Err(Error::InvalidExpression("empty filter object".into()));
        }

        let mut parts = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let part = if key.starts_with('$') {
                self.operator(key, value, target)?
            } else {
                let target = self.target_for(key)?;
                self.node(value, Some(&target))?
            };
            parts.push(part);
        }
        Ok(join_group(parts, "AND"))
    }

    fn target_for(&mut self, field: &str) -> Result<Target> {
        let prop = find_prop(self.props, field)
            .ok_or_else(|| Error::InvalidExpression(format!("unknown property {}", field)))?;
        Ok(Target {
            path: self.placeholders.name(&prop.alias),
            prop: prop.clone(),
        })
    }

    fn operator(&mut self, op: &str, operand: &Json, target: Option<&Target>) -> Result<String> {
        match op {
            "$and" => self.combine(operand, target, "AND"),
            "$or" => self.combine(operand, target, "OR"),
            "$nor" => {
                let children = self.children(op, operand, target)?;
                let inner = children.join(" OR ");
                if children.len() == 1 && is_wrapped(&inner) {
                    Ok(format!("NOT {}", inner))
                } else {
                    Ok(format!("NOT ({})", inner))
                }
            }
            "$eq" => self.compare(require_target(op, target)?, "=", operand),
            "$ne" => self.compare(require_target(op, target)?, "<>", operand),
            "$lt" => self.compare(require_target(op, target)?, "<", operand),
            "$lte" => self.compare(require_target(op, target)?, "<=", operand),
            "$gt" => self.compare(require_target(op, target)?, ">", operand),
            "$gte" => self.compare(require_target(op, target)?, ">=", operand),
            "$between" => {
                let target = require_target(op, target)?;
                match operand.as_array().map(Vec::as_slice) {
                    Some([low, high]) => {
                        let low = self.encoded(target, low)?;
                        let high = self.encoded(target, high)?;
                        Ok(format!("{} BETWEEN {} AND {}", target.path, low, high))
                    }
                    _ => Err(Error::InvalidExpression(format!(
                        "$between requires an array of two values, got {}",
                        operand
                    ))),
                }
            }
            "$in" => {
                let target = require_target(op, target)?;
                let values = match operand.as_array() {
                    Some(values) if !values.is_empty() => values,
                    _ => {
                        return Err(Error::InvalidExpression(format!(
                            "$in requires a non-empty array, got {}",
                            operand
                        )))
                    }
                };
                let placeholders = values
                    .iter()
                    .map(|v| self.encoded(target, v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{} IN ({})", target.path, placeholders.join(", ")))
            }
            "$beginsWith" => {
                let target = require_target(op, target)?;
                let value = self.encoded(target, operand)?;
                Ok(format!("begins_with({}, {})", target.path, value))
            }
            "$contains" => {
                let target = require_target(op, target)?;
                let value = target.prop.encode_unprefixed(operand)?;
                let value = self.placeholders.value(value);
                Ok(format!("contains({}, {})", target.path, value))
            }
            "$exists" => {
                let target = require_target(op, target)?;
                match operand {
                    Json::Bool(true) => Ok(format!("attribute_exists({})", target.path)),
                    Json::Bool(false) => Ok(format!("attribute_not_exists({})", target.path)),
                    other => Err(Error::InvalidExpression(format!(
                        "$exists requires a boolean, got {}",
                        other
                    ))),
                }
            }
            "$type" => {
                let target = require_target(op, target)?;
                let name = operand.as_str().ok_or_else(|| {
                    Error::InvalidExpression(format!("$type requires a type name, got {}", operand))
                })?;
                let ty = PropType::from_str(name)
                    .map_err(|_| Error::InvalidExpression(format!("$type: unknown type {}", name)))?;
                let value = self.placeholders.value(Value::string(ty.token()));
                Ok(format!("attribute_type({}, {})", target.path, value))
            }
            "$size" => {
                let sized = require_target(op, target)?.size();
                self.node(operand, Some(&sized))
            }
            other => Err(Error::InvalidExpression(format!("unknown operator {}", other))),
        }
    }

    fn combine(&mut self, operand: &Json, target: Option<&Target>, op: &str) -> Result<String> {
        let children = self.children(op, operand, target)?;
        Ok(join_group(children, op))
    }

    /// Compiles the children of a combinator: an array of nodes, or an
    /// object whose entries are taken one by one.
    fn children(&mut self, op: &str, operand: &Json, target: Option<&Target>) -> Result<Vec<String>> {
        let nodes: Vec<Json> = match operand {
            Json::Array(items) => items.clone(),
            Json::Object(entries) => entries
                .iter()
                .map(|(k, v)| {
                    let mut single = Map::new();
                    single.insert(k.clone(), v.clone());
                    Json::Object(single)
                })
                .collect(),
            other => {
                return Err(Error::InvalidExpression(format!(
                    "{} requires an object or an array, got {}",
                    op, other
                )))
            }
        };

        if nodes.is_empty() {
            return Err(Error::InvalidExpression(format!("{} requires at least one expression", op)));
        }

        nodes.iter().map(|n| self.node(n, target)).collect()
    }

    fn compare(&mut self, target: &Target, op: &str, operand: &Json) -> Result<String> {
        let value = self.encoded(target, operand)?;
        Ok(format!("{} {} {}", target.path, op, value))
    }

    fn encoded(&mut self, target: &Target, operand: &Json) -> Result<String> {
        let value = target.prop.encode(operand)?;
        Ok(self.placeholders.value(value))
    }
}

fn require_target<'t>(op: &str, target: Option<&'t Target>) -> Result<&'t Target> {
    target.ok_or_else(|| Error::InvalidExpression(format!("{} requires a property", op)))
}

/// Compiles a filter with a fresh set of placeholders.
pub fn compile_condition(props: &[Prop], filter: &Json) -> Result<CompiledExpression> {
    let mut placeholders = Placeholders::new();
    let text = ConditionCompiler::new(props, &mut placeholders).compile(filter)?;
    Ok(placeholders.finish(text))
}

const KEY_OPERATORS: [&str; 7] = ["$eq", "$lt", "$lte", "$gt", "$gte", "$between", "$beginsWith"];

/// Renders the key condition of a query strategy.
///
/// Key props are taken from the strategy, so secondary-index aliases and
/// prefixes apply; static keys compare against their constant value. The
/// store only accepts one comparison per key, joined with a bare `AND`.
pub fn compile_key_condition(strategy: &Strategy, placeholders: &mut Placeholders) -> Result<String> {
    if strategy.keys.is_empty() {
        return Err(Error::InvalidQuery("scan strategy has no key condition".into()));
    }

    let mut parts = Vec::with_capacity(strategy.keys.len());
    for prop in &strategy.keys {
        let path = placeholders.name(&prop.alias);
        if prop.is_static() {
            let value = placeholders.value(prop.static_value());
            parts.push(format!("{} = {}", path, value));
            continue;
        }

        let operand = strategy
            .query
            .get(prop.name())
            .ok_or_else(|| Error::InvalidQuery(format!("missing key condition for {}", prop.name())))?;

        if let Json::Object(ops) = operand {
            let valid = ops.len() == 1 && ops.keys().all(|k| KEY_OPERATORS.contains(&k.as_str()));
            if !valid {
                return Err(Error::InvalidQuery(format!(
                    "key {} accepts a single comparison, between or begins_with, got {}",
                    prop.name(),
                    operand
                )));
            }
        }

        let target = Target {
            path,
            prop: prop.clone(),
        };
        let mut compiler = ConditionCompiler::new(&strategy.keys, placeholders);
        parts.push(compiler.node(operand, Some(&target))?);
    }

    Ok(parts.join(" AND "))
}
