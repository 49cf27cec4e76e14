//! Multi-step setup wizard: step definitions, field validation and the
//! controller that walks a single session from the first step to completion.

mod controller;
mod step;

pub use controller::{
    CompletionHook, StepAdvance, SubmitError, WizardController, WizardMode, WizardSession,
    WizardState, qualified_key,
};
pub use step::{FieldError, FieldSpec, FieldValues, Rule, StepDefinition, Validator, parse_bool};
