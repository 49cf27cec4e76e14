use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::wizard::{FieldError, FieldValues, StepDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WizardMode {
    #[default]
    Install,
    Reinstall,
}

impl WizardMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            WizardMode::Install => "install",
            WizardMode::Reinstall => "reinstall",
        }
    }
}

impl fmt::Display for WizardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WizardMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "install" => Ok(WizardMode::Install),
            "reinstall" => Ok(WizardMode::Reinstall),
            other => Err(format!(
                "モードが不正です: {other}（install|reinstall を指定してください）"
            )),
        }
    }
}

/// Runs once when the last step is accepted.
///
/// An error keeps the wizard on the last step so it can be resubmitted.
pub trait CompletionHook {
    type Summary;

    fn on_complete(&mut self, mode: WizardMode, values: &FieldValues) -> Result<Self::Summary>;
}

impl<S, F> CompletionHook for F
where
    F: FnMut(WizardMode, &FieldValues) -> Result<S>,
{
    type Summary = S;

    fn on_complete(&mut self, mode: WizardMode, values: &FieldValues) -> Result<S> {
        self(mode, values)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WizardSession {
    pub current_step_id: String,
    /// Accepted values keyed as `<step_id>.<field>`.
    pub collected_values: FieldValues,
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardState<'a> {
    Step(&'a str),
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAdvance<S> {
    Next { step_id: String },
    Completed(S),
    AlreadyCompleted,
}

#[derive(Debug)]
pub enum SubmitError {
    Validation(Vec<FieldError>),
    InvalidStep { expected: String, got: String },
    CompletionFailed(anyhow::Error),
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Validation(errors) => {
                write!(f, "入力内容に {} 件のエラーがあります", errors.len())?;
                for err in errors {
                    write!(f, "\n  - {err}")?;
                }
                Ok(())
            }
            SubmitError::InvalidStep { expected, got } => {
                write!(f, "ステップが不正です: {got}（現在のステップ: {expected}）")
            }
            SubmitError::CompletionFailed(err) => write!(f, "完了処理に失敗しました: {err:#}"),
        }
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SubmitError::CompletionFailed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

pub struct WizardController<H: CompletionHook> {
    steps: Vec<StepDefinition>,
    mode: WizardMode,
    session: WizardSession,
    hook: H,
}

impl<H: CompletionHook> WizardController<H> {
    /// Builds a controller positioned on the first step.
    ///
    /// Rejects step lists that are empty, reuse an id, point at an unknown next
    /// step, or do not chain from the first step to a single terminal step.
    pub fn new(steps: Vec<StepDefinition>, mode: WizardMode, hook: H) -> Result<Self> {
        validate_steps(&steps)?;
        let session = initial_session(&steps);
        Ok(Self {
            steps,
            mode,
            session,
            hook,
        })
    }

    pub fn mode(&self) -> WizardMode {
        self.mode
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn session(&self) -> &WizardSession {
        &self.session
    }

    pub fn state(&self) -> WizardState<'_> {
        if self.session.completed {
            WizardState::Completed
        } else {
            WizardState::Step(&self.session.current_step_id)
        }
    }

    pub fn current_step(&self) -> Option<&StepDefinition> {
        if self.session.completed {
            return None;
        }
        self.step(&self.session.current_step_id)
    }

    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Discards all collected values and returns to the first step.
    pub fn reset(&mut self) {
        self.session = initial_session(&self.steps);
    }

    pub fn submit(
        &mut self,
        step_id: &str,
        values: &FieldValues,
    ) -> Result<StepAdvance<H::Summary>, SubmitError> {
        if self.session.completed {
            if step_id == self.session.current_step_id {
                return Ok(StepAdvance::AlreadyCompleted);
            }
            return Err(SubmitError::InvalidStep {
                expected: "completed".to_string(),
                got: step_id.to_string(),
            });
        }
        if step_id != self.session.current_step_id {
            return Err(SubmitError::InvalidStep {
                expected: self.session.current_step_id.clone(),
                got: step_id.to_string(),
            });
        }

        let step = self
            .step(step_id)
            .ok_or_else(|| SubmitError::InvalidStep {
                expected: self.session.current_step_id.clone(),
                got: step_id.to_string(),
            })?;
        let accepted = step.validate(values).map_err(SubmitError::Validation)?;
        let next = step.next_step_id.clone();

        let mut collected = self.session.collected_values.clone();
        for field in &step.fields {
            collected.remove(&qualified_key(step_id, &field.key));
        }
        for (key, value) in accepted {
            collected.insert(qualified_key(step_id, &key), value);
        }

        match next {
            Some(next) => {
                self.session.collected_values = collected;
                self.session.current_step_id = next.clone();
                Ok(StepAdvance::Next { step_id: next })
            }
            None => {
                let summary = self
                    .hook
                    .on_complete(self.mode, &collected)
                    .map_err(SubmitError::CompletionFailed)?;
                self.session.collected_values = collected;
                self.session.completed = true;
                Ok(StepAdvance::Completed(summary))
            }
        }
    }
}

pub fn qualified_key(step_id: &str, field: &str) -> String {
    format!("{step_id}.{field}")
}

fn initial_session(steps: &[StepDefinition]) -> WizardSession {
    WizardSession {
        current_step_id: steps.first().map(|s| s.id.clone()).unwrap_or_default(),
        collected_values: FieldValues::new(),
        completed: false,
    }
}

fn validate_steps(steps: &[StepDefinition]) -> Result<()> {
    let Some(first) = steps.first() else {
        bail!("ウィザードにステップがありません");
    };

    let mut ids = HashSet::new();
    for step in steps {
        if step.id.trim().is_empty() {
            bail!("ステップIDが空です");
        }
        if !ids.insert(step.id.as_str()) {
            bail!("ステップIDが重複しています: {}", step.id);
        }
    }
    for step in steps {
        if let Some(next) = &step.next_step_id {
            if !ids.contains(next.as_str()) {
                bail!("次のステップが存在しません: {} -> {next}", step.id);
            }
        }
    }

    let mut visited = HashSet::new();
    let mut cursor = first;
    loop {
        if !visited.insert(cursor.id.as_str()) {
            bail!("ステップが循環しています: {}", cursor.id);
        }
        let Some(next) = &cursor.next_step_id else {
            break;
        };
        cursor = steps
            .iter()
            .find(|s| &s.id == next)
            .ok_or_else(|| anyhow!("次のステップが存在しません: {next}"))?;
    }
    if visited.len() != steps.len() {
        let unreachable: Vec<&str> = steps
            .iter()
            .map(|s| s.id.as_str())
            .filter(|id| !visited.contains(id))
            .collect();
        bail!("到達できないステップがあります: {}", unreachable.join(", "));
    }
    Ok(())
}
