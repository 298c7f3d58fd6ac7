use std::env;

/// Environment variable selecting the runtime environment.
pub const ENVIRONMENT_VAR: &str = "ENVIRONMENT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    /// Parse an environment name; anything unrecognised is treated as development.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn from_env() -> Self {
        env::var(ENVIRONMENT_VAR)
            .map(|value| Self::parse(&value))
            .unwrap_or_default()
    }
}
