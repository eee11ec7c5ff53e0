use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error("Prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),
}

/// Asks the user before a destructive or remote change.
pub trait Confirm: Send + Sync {
    fn confirm(&self, question: &str) -> Result<bool, ConfirmError>;
}

/// Answers yes without asking.
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, question: &str) -> Result<bool, ConfirmError> {
        log::info!("{} yes (assumed)", question);
        Ok(true)
    }
}

/// Interactive prompt on the terminal. Defaults to no.
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, question: &str) -> Result<bool, ConfirmError> {
        Ok(dialoguer::Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()?)
    }
}
