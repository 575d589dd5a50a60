pub mod action;
pub mod context;
pub mod input;
pub mod interpreter;

pub use action::{Action, ActionKind, ActionParams, OneOrMany};
pub use context::{ActionContext, ReferenceTables};
pub use input::InputType;
pub use interpreter::{ActionInterpreter, InterpreterSettings};
