//! Repository selection model

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a bundled starter template
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(String);

impl TemplateId {
    pub const NEXTJS_STARTER: &'static str = "nextjs-starter";
    pub const VITE_REACT_STARTER: &'static str = "vite-react-starter";
    pub const CRA_STARTER: &'static str = "cra-starter";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Template used when a repository does not name one
    pub fn baseline() -> Self {
        Self::new(Self::NEXTJS_STARTER)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Repository chosen for a launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_branch: Option<String>,
    pub default_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<TemplateId>,
}

impl RepositoryRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, default_branch: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            selected_branch: None,
            default_branch: default_branch.into(),
            template_id: None,
        }
    }

    /// Branch to synchronize: the selected one, else the default
    pub fn branch(&self) -> &str {
        self.selected_branch
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(&self.default_branch)
    }

    /// Template to fall back on, defaulting to the baseline
    pub fn fallback_template(&self) -> TemplateId {
        self.template_id.clone().unwrap_or_else(TemplateId::baseline)
    }

    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selected_branch_overrides_default() {
        let mut repo = RepositoryRef::new("acme", "web", "main");
        assert_eq!(repo.branch(), "main");
        repo.selected_branch = Some("feature/x".to_string());
        assert_eq!(repo.branch(), "feature/x");
        repo.selected_branch = Some(String::new());
        assert_eq!(repo.branch(), "main");
    }

    #[test]
    fn fallback_template_defaults_to_baseline() {
        let mut repo = RepositoryRef::new("acme", "web", "main");
        assert_eq!(repo.fallback_template().as_str(), "nextjs-starter");
        repo.template_id = Some(TemplateId::from("vite-react-starter"));
        assert_eq!(repo.fallback_template().as_str(), "vite-react-starter");
    }

    #[test]
    fn deserializes_snake_case_fields() {
        let repo: RepositoryRef = serde_json::from_str(
            r#"{"owner":"acme","name":"web","default_branch":"main","template_id":"cra-starter"}"#,
        )
        .unwrap();
        assert_eq!(repo.full_name(), "acme/web");
        assert_eq!(repo.template_id, Some(TemplateId::from("cra-starter")));
    }
}
