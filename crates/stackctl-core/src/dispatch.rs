//! Container entrypoint dispatch.
//!
//! Maps the first argument of the container command to a launch plan. The
//! lookup is a pure function of argv and configuration; running the plan is
//! the caller's business (the entrypoint binary replaces itself with it).

use serde::Serialize;

use crate::config::StackConfig;

/// What a command token selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Api,
    Ui,
    Train,
    Demo,
    Notebook,
    Shell,
    Health,
    Test,
    /// Unrecognized token: run argv as given.
    Passthrough,
}

impl Action {
    /// First match wins; anything unlisted is passthrough.
    pub fn from_token(token: &str) -> Self {
        match token {
            "api" => Action::Api,
            "ui" => Action::Ui,
            "train" => Action::Train,
            "demo" => Action::Demo,
            "notebook" => Action::Notebook,
            "shell" => Action::Shell,
            "health" => Action::Health,
            "test" => Action::Test,
            _ => Action::Passthrough,
        }
    }
}

/// A parsed container command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    pub token: String,
    pub action: Action,
    /// Arguments after the token.
    pub extra_args: Vec<String>,
}

impl Command {
    /// Parse argv without the program name. Empty argv means `api`.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        match args.next() {
            None => Command {
                token: "api".to_string(),
                action: Action::Api,
                extra_args: Vec::new(),
            },
            Some(token) => Command {
                action: Action::from_token(&token),
                token,
                extra_args: args.collect(),
            },
        }
    }

    /// Resolve to something runnable.
    pub fn plan(&self, config: &StackConfig) -> LaunchPlan {
        let (program, mut args): (&str, Vec<String>) = match self.action {
            Action::Api => (
                "python",
                strings(&["app/api.py", "--host"])
                    .into_iter()
                    .chain([config.api_host.clone(), "--port".to_string()])
                    .chain([config.api_port.to_string()])
                    .collect(),
            ),
            Action::Ui => ("python", strings(&["app/gradio_app.py"])),
            Action::Train => (
                "python",
                strings(&[
                    "scripts/train_production.py",
                    "--config",
                    "configs/production-config.yaml",
                ]),
            ),
            Action::Demo => ("python", strings(&["quick_start.py"])),
            Action::Notebook => (
                "jupyter",
                strings(&[
                    "lab",
                    "--ip=0.0.0.0",
                    "--port=8888",
                    "--no-browser",
                    "--allow-root",
                ]),
            ),
            Action::Shell => ("/bin/bash", Vec::new()),
            Action::Test => ("python", strings(&["-m", "pytest", "tests/", "-v"])),
            Action::Health => {
                return LaunchPlan::Probe {
                    url: config.primary_health_url(),
                }
            }
            Action::Passthrough => {
                return LaunchPlan::Exec {
                    program: self.token.clone(),
                    args: self.extra_args.clone(),
                }
            }
        };
        args.extend(self.extra_args.iter().cloned());
        LaunchPlan::Exec {
            program: program.to_string(),
            args,
        }
    }
}

/// How to carry out a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchPlan {
    /// Replace the current process.
    Exec { program: String, args: Vec<String> },
    /// One GET; exit 0 on 2xx, 1 otherwise.
    Probe { url: String },
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
