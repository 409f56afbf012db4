pub mod error;
pub mod types;
pub mod prop;
pub mod index; // key declarations -> physical indices
pub mod schema;
pub mod strategy; // access plan selection
pub mod expression; // condition + update compilers

pub use error::{Error, Result};
pub use types::*;
pub use prop::{find_prop, Prop, PropKind};
pub use index::{build_indexes, CapacitySpec, CapacityUnits, Index, IndexProjection, KeySpec};
pub use schema::{EntitySchema, SchemaRegistry};
pub use strategy::{select_strategy, KeyMatch, Strategy, StrategyKind};
pub use expression::{
    compile_condition, compile_key_condition, compile_strategy, compile_update, CompiledExpression,
    ConditionCompiler, Placeholders, StrategyExpressions, UpdateCompiler,
};
