//! Operator console output.
//!
//! Passed explicitly to the components that talk to the operator; quiet mode
//! is [`Ui::silent`] rather than a redirected global.

use std::fmt::Display;

use crossterm::style::Stylize;

use jsonwatch_core::state::resource_names;
use jsonwatch_core::{RouteRules, StoreState};

#[derive(Debug, Clone, Copy)]
pub struct Ui {
    quiet: bool,
}

impl Ui {
    pub fn stdout() -> Self {
        Self { quiet: false }
    }

    pub fn silent() -> Self {
        Self { quiet: true }
    }

    pub fn line(&self, message: impl Display) {
        if !self.quiet {
            println!("{message}");
        }
    }

    /// Gray status line (`Loading db.json`).
    pub fn status(&self, message: impl Display) {
        self.line(format!("  {}", message.to_string().grey()));
    }

    pub fn error(&self, message: impl Display) {
        self.line(format!("  {}", message.to_string().red()));
    }

    pub fn clear_screen(&self) {
        self.line("\u{1B}[2J\u{1B}[0;0f");
    }

    pub fn banner(&self) {
        self.line("");
        self.line(format!("  {}", "\\{^_^}/ hi!".cyan()));
    }

    /// Resource URLs, other routes, and the home URL.
    pub fn pretty_print(&self, host: &str, port: u16, state: &StoreState, rules: Option<&RouteRules>) {
        if self.quiet {
            return;
        }
        let root = root_url(host, port);

        self.line(format!("\n  {}", "Resources".bold()));
        for url in resource_urls(&root, state) {
            self.line(format!("  {url}"));
        }

        if let Some(rules) = rules.filter(|r| !r.is_empty()) {
            self.line(format!("\n  {}", "Other routes".bold()));
            for (pattern, target) in rules.iter() {
                self.line(format!("  {pattern} -> {target}"));
            }
        }

        self.line(format!("\n  {}", "Home".bold()));
        self.line(format!("  {root}"));
        self.line("");
    }
}

pub fn root_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}")
}

pub fn resource_urls(root: &str, state: &StoreState) -> Vec<String> {
    resource_names(state).map(|name| format!("{root}/{name}")).collect()
}
