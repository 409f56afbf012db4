/// Update expression compiler
///
/// An update body maps clause verbs to `{property: operand}` bags. Each pair
/// renders one fragment into the SET, REMOVE, ADD or DELETE bucket; the
/// buckets are emitted in that order.

use serde_json::{Map, Value as Json};

use super::{CompiledExpression, Placeholders};
use crate::prop::{find_prop, Prop};
use crate::{Error, PropType, Result, Value};

const VERBS: [&str; 13] = [
    "$create",
    "$set",
    "$unset",
    "$setPath",
    "$unsetPath",
    "$setIndex",
    "$unsetIndex",
    "$append",
    "$prepend",
    "$increment",
    "$decrement",
    "$add",
    "$delete",
];

pub struct UpdateCompiler<'a> {
    props: &'a [Prop],
    placeholders: &'a mut Placeholders,
    set: Vec<String>,
    remove: Vec<String>,
    add: Vec<String>,
    delete: Vec<String>,
}

impl<'a> UpdateCompiler<'a> {
    pub fn new(props: &'a [Prop], placeholders: &'a mut Placeholders) -> Self {
        Self {
            props,
            placeholders,
            set: Vec::new(),
            remove: Vec::new(),
            add: Vec::new(),
            delete: Vec::new(),
        }
    }

    /// Renders an update body into expression text.
    pub fn compile(mut self, update: &Json) -> Result<String> {
        let verbs = update
            .as_object()
            .ok_or_else(|| Error::InvalidExpression(format!("update must be an object, got {}", update)))?;

        for (verb, bag) in verbs {
            let bag = bag.as_object().ok_or_else(|| {
                Error::InvalidExpression(format!("operand of {} must be an object, got {}", verb, bag))
            })?;
            self.clause(verb, bag)?;
        }

        let mut clauses = Vec::new();
        for (keyword, fragments) in [
            ("SET", &self.set),
            ("REMOVE", &self.remove),
            ("ADD", &self.add),
            ("DELETE", &self.delete),
        ] {
            if !fragments.is_empty() {
                clauses.push(format!("{} {}", keyword, fragments.join(", ")));
            }
        }

        if clauses.is_empty() {
            return Err(Error::InvalidExpression("update has no clauses".into()));
        }
        Ok(clauses.join(" "))
    }

    fn clause(&mut self, verb: &str, bag: &Map<String, Json>) -> Result<()> {
        if !VERBS.contains(&verb) {
            return Err(Error::InvalidExpression(format!("unknown update clause {}", verb)));
        }
        for (field, operand) in bag {
            match verb {
                "$create" => {
                    let (path, prop) = self.prop_path(field)?;
                    let value = self.value(prop.encode(operand)?);
                    self.set.push(format!("{} = if_not_exists({}, {})", path, path, value));
                }
                "$set" => {
                    let (path, prop) = self.prop_path(field)?;
                    let value = self.value(prop.encode(operand)?);
                    self.set.push(format!("{} = {}", path, value));
                }
                "$unset" => {
                    let (path, _) = self.prop_path(field)?;
                    self.remove.push(path);
                }
                "$setPath" => {
                    let path = self.nested_path(field)?;
                    let value = self.value(Value::from_json(operand));
                    self.set.push(format!("{} = {}", path, value));
                }
                "$unsetPath" => {
                    let path = self.nested_path(field)?;
                    self.remove.push(path);
                }
                "$setIndex" => {
                    let (path, _) = self.prop_path(field)?;
                    let entries = operand.as_object().ok_or_else(|| {
                        Error::InvalidExpression(format!(
                            "$setIndex on {} requires an object of index to value, got {}",
                            field, operand
                        ))
                    })?;
                    for (position, element) in entries {
                        let position = parse_list_index(field, &Json::String(position.clone()))?;
                        let value = self.value(Value::from_json(element));
                        self.set.push(format!("{}[{}] = {}", path, position, value));
                    }
                }
                "$unsetIndex" => {
                    let (path, _) = self.prop_path(field)?;
                    let positions = match operand {
                        Json::Array(items) => items.clone(),
                        single => vec![single.clone()],
                    };
                    for position in &positions {
                        let position = parse_list_index(field, position)?;
                        self.remove.push(format!("{}[{}]", path, position));
                    }
                }
                "$append" => {
                    let (path, _) = self.prop_path(field)?;
                    let value = self.value(as_list(operand));
                    self.set.push(format!("{} = list_append({}, {})", path, path, value));
                }
                "$prepend" => {
                    let (path, _) = self.prop_path(field)?;
                    let value = self.value(as_list(operand));
                    self.set.push(format!("{} = list_append({}, {})", path, value, path));
                }
                "$increment" => {
                    let (path, _) = self.prop_path(field)?;
                    let value = self.value(Value::encode(PropType::Number, operand, "")?);
                    self.set.push(format!("{} = {} + {}", path, path, value));
                }
                "$decrement" => {
                    let (path, _) = self.prop_path(field)?;
                    let value = self.value(Value::encode(PropType::Number, operand, "")?);
                    self.set.push(format!("{} = {} - {}", path, path, value));
                }
                "$add" => {
                    let (path, prop) = self.prop_path(field)?;
                    let ty = match prop.ty {
                        PropType::Number => PropType::Number,
                        ty => require_set(verb, field, ty)?,
                    };
                    let value = Value::encode(ty, operand, "")?;
                    let value = self.value(value);
                    self.add.push(format!("{} {}", path, value));
                }
                "$delete" => {
                    let (path, prop) = self.prop_path(field)?;
                    let value = Value::encode(require_set(verb, field, prop.ty)?, operand, "")?;
                    let value = self.value(value);
                    self.delete.push(format!("{} {}", path, value));
                }
                other => {
                    return Err(Error::InvalidExpression(format!("unknown update clause {}", other)));
                }
            }
        }
        Ok(())
    }

    fn prop_path(&mut self, field: &str) -> Result<(String, Prop)> {
        let prop = find_prop(self.props, field)
            .ok_or_else(|| Error::InvalidExpression(format!("unknown property {}", field)))?
            .clone();
        Ok((self.placeholders.name(&prop.alias), prop))
    }

    /// `a.b.c` rendered as `#a.#b.#c`; the head must be a known prop.
    fn nested_path(&mut self, field: &str) -> Result<String> {
        let mut segments = field.split('.');
        let head = segments.next().unwrap_or_default();
        let (head, _) = self.prop_path(head)?;

        let mut path = head;
        for segment in segments {
            if segment.is_empty() {
                return Err(Error::InvalidExpression(format!("invalid path {}", field)));
            }
            path.push('.');
            path.push_str(&self.placeholders.name(segment));
        }
        Ok(path)
    }

    fn value(&mut self, value: Value) -> String {
        self.placeholders.value(value)
    }
}

fn as_list(operand: &Json) -> Value {
    match operand {
        Json::Array(_) => Value::from_json(operand),
        single => Value::L(vec![Value::from_json(single)]),
    }
}

fn require_set(verb: &str, field: &str, ty: PropType) -> Result<PropType> {
    match ty.element_type() {
        Some(_) => Ok(ty),
        None => Err(Error::InvalidExpression(format!(
            "{} on {} requires a set property, got {}",
            verb, field, ty
        ))),
    }
}

fn parse_list_index(field: &str, position: &Json) -> Result<u64> {
    let parsed = match position {
        Json::Number(n) => n.as_u64(),
        Json::String(s) => s.parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        Error::InvalidExpression(format!("invalid list index {} for {}", position, field))
    })
}

/// Compiles an update body with a fresh set of placeholders.
pub fn compile_update(props: &[Prop], update: &Json) -> Result<CompiledExpression> {
    let mut placeholders = Placeholders::new();
    let text = UpdateCompiler::new(props, &mut placeholders).compile(update)?;
    Ok(placeholders.finish(text))
}
