use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

/// User-facing yes/no decisions and notices.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
    async fn alert(&self, message: &str);
}

/// Answers yes to everything (`--yes`, auto-unlock).
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl Prompter for AutoConfirm {
    async fn confirm(&self, message: &str) -> bool {
        info!("{} [auto-confirmed]", message);
        true
    }

    async fn alert(&self, message: &str) {
        warn!("{}", message);
    }
}

/// Asks on the terminal; anything but `y`/`yes` declines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn confirm(&self, message: &str) -> bool {
        let mut stderr = tokio::io::stderr();
        if stderr
            .write_all(format!("{} [y/N] ", message).as_bytes())
            .await
            .is_err()
        {
            return false;
        }
        let _ = stderr.flush().await;

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(_) => is_yes(&line),
            Err(e) => {
                warn!("Could not read confirmation: {}", e);
                false
            }
        }
    }

    async fn alert(&self, message: &str) {
        let mut stderr = tokio::io::stderr();
        let _ = stderr.write_all(format!("{}\n", message).as_bytes()).await;
        warn!("{}", message);
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every prompt and answers with a fixed decision.
    #[derive(Debug, Default)]
    pub struct ScriptedPrompter {
        pub answer: bool,
        pub confirms: Mutex<Vec<String>>,
        pub alerts: Mutex<Vec<String>>,
    }

    impl ScriptedPrompter {
        pub fn answering(answer: bool) -> Self {
            Self {
                answer,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Prompter for ScriptedPrompter {
        async fn confirm(&self, message: &str) -> bool {
            self.confirms.lock().unwrap().push(message.to_string());
            self.answer
        }

        async fn alert(&self, message: &str) {
            self.alerts.lock().unwrap().push(message.to_string());
        }
    }
}
